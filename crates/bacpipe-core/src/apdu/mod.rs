/// Confirmed-service request/response headers and error types.
pub mod confirmed;
/// APDU type discriminant.
pub mod pdu;
/// Unconfirmed-service request header.
pub mod unconfirmed;

pub use confirmed::{
    AbortPdu, BacnetError, ComplexAckHeader, ConfirmedRequestHeader, RejectPdu, SimpleAck,
};
pub use pdu::ApduType;
pub use unconfirmed::UnconfirmedRequestHeader;

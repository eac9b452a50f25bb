//! BACnet protocol encoding and decoding for the bacpipe daemons.
//!
//! `bacpipe-core` provides zero-copy encoding and decoding of the BACnet
//! APDUs, NPDUs, and service payloads the two daemons exchange. It covers
//! both directions of each service the daemons use: the client daemon
//! encodes requests and decodes acknowledgments, the server daemon decodes
//! requests and encodes acknowledgments and errors.

/// APDU (Application Protocol Data Unit) types for confirmed/unconfirmed requests and responses.
pub mod apdu;
/// Binary encoding primitives, tag system, and zero-copy reader/writer.
pub mod encoding;
/// Error types for encoding and decoding operations.
pub mod error;
/// NPDU (Network Protocol Data Unit) encoding and decoding.
pub mod npdu;
/// BACnet service request and response codecs.
pub mod services;
/// Core BACnet data types: object identifiers, property identifiers, and data values.
pub mod types;

pub use error::{DecodeError, EncodeError};

/// Largest valid device instance number (22-bit instance space).
pub const MAX_DEVICE_INSTANCE: u32 = 0x3F_FFFF;

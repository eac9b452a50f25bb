/// BVLC (BACnet Virtual Link Control) header codec.
pub mod bvlc;
/// UDP transport implementing [`DataLink`](crate::DataLink) for BACnet/IP.
pub mod transport;

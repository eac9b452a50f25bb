//! BACnet/IP client daemon.
//!
//! `bacpipec` speaks BACnet/IP on one side and a JSON-line control socket on
//! the other. Callers connect over loopback TCP, send one JSON command, and
//! get one JSON response back. Confirmed requests are tracked in a pending
//! table keyed by invoke ID; the network loop completes them as replies
//! arrive.

pub mod bridge;
pub mod commands;
pub mod context;
pub mod cov;
pub mod devices;
pub mod error;
pub mod pending;
pub mod text;
pub mod value;

#[cfg(test)]
mod testutil;

pub use context::{ClientConfig, ClientContext};
pub use cov::{CovCache, CovSubscription};
pub use devices::{DeviceCache, DeviceEntry};
pub use error::ClientError;
pub use pending::{Completion, PendingTable};
pub use value::ClientDataValue;

//! BACnet/IP server daemon.
//!
//! `bacpiped` serves a configurable object model over BACnet/IP and a
//! plain-text line protocol over a loopback TCP control socket. The
//! object model is replaceable at runtime with `CFGJSON` and persisted
//! back to the config file when dirty. Trend logs sample other objects'
//! present values on a timer.

pub mod config;
pub mod control;
pub mod cov;
pub mod error;
pub mod objects;
pub mod service;
pub mod state;
pub mod trendlog;

#[cfg(test)]
mod testutil;

pub use config::{ConfigError, ServerConfig};
pub use cov::{CovSubscriber, SubscriberTable};
pub use error::ServerError;
pub use objects::{PresentValue, Registry, ServerObject};
pub use service::Responder;
pub use state::ServerState;
pub use trendlog::{TrendLogSet, TrendLogSummary, TrendRecord};

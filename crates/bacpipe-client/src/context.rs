use std::time::Duration;

use bacpipe_datalink::{DataLink, DataLinkAddress};

use crate::cov::CovCache;
use crate::devices::DeviceCache;
use crate::pending::PendingTable;

/// Tunables for the client daemon.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a confirmed request waits for its reply.
    pub request_timeout: Duration,
    /// How long `whois` lingers collecting I-Am responses.
    pub discovery_wait: Duration,
    /// UDP port assumed when a target is given as a bare IP.
    pub bacnet_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            discovery_wait: Duration::from_secs(4),
            bacnet_port: DataLinkAddress::BACNET_IP_DEFAULT_PORT,
        }
    }
}

/// Shared state of the client daemon. One instance is created at startup
/// and handed (behind an `Arc`) to the network loop, the sweep task, and
/// the command dispatcher.
pub struct ClientContext<D: DataLink> {
    pub datalink: D,
    pub pending: PendingTable,
    pub devices: DeviceCache,
    pub cov: CovCache,
    pub config: ClientConfig,
}

impl<D: DataLink> ClientContext<D> {
    pub fn new(datalink: D, config: ClientConfig) -> Self {
        Self {
            datalink,
            pending: PendingTable::new(),
            devices: DeviceCache::new(),
            cov: CovCache::new(),
            config,
        }
    }
}

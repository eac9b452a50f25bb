use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use bacpipe_datalink::DataLinkAddress;
use log::{debug, info};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Cache capacity. When full, the entry unseen for the longest is evicted.
pub const MAX_DEVICES: usize = 256;

/// One discovered device, learned from an I-Am.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub device_id: u32,
    pub address: DataLinkAddress,
    pub max_apdu: u32,
    pub segmentation: u32,
    pub vendor_id: u32,
    pub name: Option<String>,
    pub last_seen: Instant,
}

/// Devices seen on the network, keyed by device instance number.
pub struct DeviceCache {
    entries: Mutex<Vec<DeviceEntry>>,
}

impl DeviceCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Records (or refreshes) a device from its I-Am announcement. A known
    /// device keeps its learned object name.
    pub async fn upsert(
        &self,
        device_id: u32,
        address: DataLinkAddress,
        max_apdu: u32,
        segmentation: u32,
        vendor_id: u32,
    ) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.device_id == device_id) {
            entry.address = address;
            entry.max_apdu = max_apdu;
            entry.segmentation = segmentation;
            entry.vendor_id = vendor_id;
            entry.last_seen = Instant::now();
            return;
        }

        if entries.len() >= MAX_DEVICES {
            if let Some(oldest) = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.last_seen)
                .map(|(i, _)| i)
            {
                let evicted = entries.swap_remove(oldest);
                debug!("device cache full, evicting device {}", evicted.device_id);
            }
        }

        info!("discovered device {device_id} at {address}");
        entries.push(DeviceEntry {
            device_id,
            address,
            max_apdu,
            segmentation,
            vendor_id,
            name: None,
            last_seen: Instant::now(),
        });
    }

    pub async fn lookup(&self, device_id: u32) -> Option<DeviceEntry> {
        let entries = self.entries.lock().await;
        entries.iter().find(|e| e.device_id == device_id).cloned()
    }

    pub async fn set_name(&self, device_id: u32, name: String) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.device_id == device_id) {
            entry.name = Some(name);
        }
    }

    /// All entries, ordered by device instance.
    pub async fn snapshot(&self) -> Vec<DeviceEntry> {
        let entries = self.entries.lock().await;
        let mut out: Vec<DeviceEntry> = entries.clone();
        out.sort_by_key(|e| e.device_id);
        out
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Drops devices not heard from within `max_age`. Returns the number
    /// removed.
    pub async fn sweep_stale(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.last_seen.elapsed() <= max_age);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("dropped {removed} stale devices");
        }
        removed
    }
}

impl Default for DeviceCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders an address in the 6-octet MAC notation used on the control
/// surface: four IP octets followed by the two port bytes, colon separated.
pub fn mac_string(address: DataLinkAddress) -> String {
    let addr = address.as_socket_addr();
    let ip_octets = match addr.ip() {
        IpAddr::V4(v4) => v4.octets(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.octets(),
            None => [0, 0, 0, 0],
        },
    };
    let port = addr.port().to_be_bytes();
    [
        ip_octets[0],
        ip_octets[1],
        ip_octets[2],
        ip_octets[3],
        port[0],
        port[1],
    ]
    .iter()
    .map(|b| format!("{b:02X}"))
    .collect::<Vec<_>>()
    .join(":")
}

/// Parses the 6-octet MAC notation back into an IP address and port.
pub fn mac_from_string(s: &str) -> Option<DataLinkAddress> {
    let bytes: Vec<u8> = s
        .split(':')
        .map(|part| u8::from_str_radix(part, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    if bytes.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);
    Some(DataLinkAddress::Ip(SocketAddr::new(IpAddr::V4(ip), port)))
}

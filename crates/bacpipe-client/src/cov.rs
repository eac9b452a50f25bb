use std::time::Duration;

use bacpipe_core::types::ObjectId;
use bacpipe_datalink::DataLinkAddress;
use log::debug;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// An active COV subscription, keyed by device instance and monitored
/// object.
#[derive(Debug, Clone)]
pub struct CovSubscription {
    pub device_id: u32,
    pub object_id: ObjectId,
    pub address: DataLinkAddress,
    pub process_id: u32,
    /// Zero means an indefinite subscription.
    pub lifetime_seconds: u32,
    pub created: Instant,
}

impl CovSubscription {
    fn expired(&self) -> bool {
        self.lifetime_seconds != 0
            && self.created.elapsed() > Duration::from_secs(u64::from(self.lifetime_seconds))
    }
}

/// Subscriptions this client holds on remote objects. Notifications are
/// matched back to entries here; expired entries are dropped by the
/// periodic sweep.
pub struct CovCache {
    subscriptions: Mutex<Vec<CovSubscription>>,
}

impl CovCache {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Records a subscription. Re-subscribing to the same object replaces
    /// the entry, so the latest lifetime wins.
    pub async fn upsert(
        &self,
        device_id: u32,
        object_id: ObjectId,
        address: DataLinkAddress,
        process_id: u32,
        lifetime_seconds: u32,
    ) {
        let mut subs = self.subscriptions.lock().await;
        subs.retain(|s| !(s.device_id == device_id && s.object_id == object_id));
        subs.push(CovSubscription {
            device_id,
            object_id,
            address,
            process_id,
            lifetime_seconds,
            created: Instant::now(),
        });
    }

    pub async fn find(&self, device_id: u32, object_id: ObjectId) -> Option<CovSubscription> {
        let subs = self.subscriptions.lock().await;
        subs.iter()
            .find(|s| s.device_id == device_id && s.object_id == object_id)
            .cloned()
    }

    /// Removes the subscription, returning it when one existed.
    pub async fn remove(&self, device_id: u32, object_id: ObjectId) -> Option<CovSubscription> {
        let mut subs = self.subscriptions.lock().await;
        let pos = subs
            .iter()
            .position(|s| s.device_id == device_id && s.object_id == object_id)?;
        Some(subs.swap_remove(pos))
    }

    /// Points all of a device's subscriptions at a new address. Used when a
    /// notification arrives from somewhere other than the recorded source.
    pub async fn refresh_address(&self, device_id: u32, address: DataLinkAddress) {
        let mut subs = self.subscriptions.lock().await;
        for sub in subs.iter_mut().filter(|s| s.device_id == device_id) {
            sub.address = address;
        }
    }

    pub async fn len(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Drops subscriptions whose lifetime has elapsed. Indefinite
    /// subscriptions are never dropped here.
    pub async fn sweep_expired(&self) -> usize {
        let mut subs = self.subscriptions.lock().await;
        let before = subs.len();
        subs.retain(|s| !s.expired());
        let removed = before - subs.len();
        if removed > 0 {
            debug!("dropped {removed} expired subscriptions");
        }
        removed
    }
}

impl Default for CovCache {
    fn default() -> Self {
        Self::new()
    }
}

//! COV subscriber tracking for the server side: who asked to be told
//! when an object's present value changes.

use bacpipe_core::types::ObjectId;
use bacpipe_datalink::DataLinkAddress;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct CovSubscriber {
    pub process_id: u32,
    pub object_id: ObjectId,
    pub address: DataLinkAddress,
    /// 0 means the subscription never expires.
    pub lifetime_seconds: u32,
    pub created: Instant,
}

impl CovSubscriber {
    fn expired(&self, now: Instant) -> bool {
        self.lifetime_seconds != 0
            && now.duration_since(self.created)
                >= Duration::from_secs(self.lifetime_seconds.into())
    }

    fn matches(&self, process_id: u32, object_id: ObjectId, address: DataLinkAddress) -> bool {
        self.process_id == process_id && self.object_id == object_id && self.address == address
    }
}

#[derive(Default)]
pub struct SubscriberTable {
    subscribers: Mutex<Vec<CovSubscriber>>,
}

impl SubscriberTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or refreshes a subscription. A resubscription restarts the
    /// lifetime clock.
    pub async fn upsert(
        &self,
        process_id: u32,
        object_id: ObjectId,
        address: DataLinkAddress,
        lifetime_seconds: u32,
    ) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|s| !s.matches(process_id, object_id, address));
        subscribers.push(CovSubscriber {
            process_id,
            object_id,
            address,
            lifetime_seconds,
            created: Instant::now(),
        });
    }

    /// Cancellation. Returns whether a subscription existed.
    pub async fn remove(
        &self,
        process_id: u32,
        object_id: ObjectId,
        address: DataLinkAddress,
    ) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let before = subscribers.len();
        subscribers.retain(|s| !s.matches(process_id, object_id, address));
        subscribers.len() != before
    }

    /// Live subscribers for an object, expired ones pruned as a side
    /// effect.
    pub async fn for_object(&self, object_id: ObjectId) -> Vec<CovSubscriber> {
        let now = Instant::now();
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|s| !s.expired(now));
        subscribers
            .iter()
            .filter(|s| s.object_id == object_id)
            .copied()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

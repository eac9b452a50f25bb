use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

/// Slot count, one per possible invoke ID. ID 0 is never handed out so that
/// a zero return can only ever mean exhaustion.
pub const MAX_PENDING: usize = 256;

/// Outcome delivered to a waiter when its reply (or a protocol-level
/// failure) arrives.
#[derive(Debug)]
pub struct Completion {
    pub payload: serde_json::Value,
    pub is_error: bool,
}

struct Slot {
    created: Instant,
    tx: oneshot::Sender<Completion>,
}

/// A claimed invoke ID together with the receiving half of its channel.
/// Dropping the ticket releases the slot for reuse.
pub struct Ticket {
    pub invoke_id: u8,
    rx: oneshot::Receiver<Completion>,
}

/// Tracks outstanding confirmed requests by invoke ID.
///
/// The network loop completes slots as acks, errors, rejects, and aborts
/// arrive; command handlers block on [`wait`](Self::wait) with a deadline.
/// Slots whose waiter has gone away are overwritten on the next allocation,
/// and [`sweep_expired`](Self::sweep_expired) reclaims slots that saw
/// neither a reply nor a waiter timeout.
pub struct PendingTable {
    slots: Mutex<Vec<Option<Slot>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_PENDING);
        slots.resize_with(MAX_PENDING, || None);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Claims the lowest free invoke ID, or `None` when all 255 are in use.
    pub async fn register(&self) -> Option<Ticket> {
        let mut slots = self.slots.lock().await;
        for invoke_id in 1..MAX_PENDING {
            let free = match &slots[invoke_id] {
                None => true,
                Some(slot) => slot.tx.is_closed(),
            };
            if free {
                let (tx, rx) = oneshot::channel();
                slots[invoke_id] = Some(Slot {
                    created: Instant::now(),
                    tx,
                });
                return Some(Ticket {
                    invoke_id: invoke_id as u8,
                    rx,
                });
            }
        }
        warn!("all invoke IDs in use");
        None
    }

    /// Delivers a completion to the waiter registered under `invoke_id`.
    /// Returns false when no request is outstanding under that ID.
    pub async fn complete(&self, invoke_id: u8, completion: Completion) -> bool {
        let mut slots = self.slots.lock().await;
        match slots[invoke_id as usize].take() {
            Some(slot) => {
                if slot.tx.send(completion).is_err() {
                    debug!("waiter for invoke id {invoke_id} already gave up");
                }
                true
            }
            None => false,
        }
    }

    /// Blocks until the ticket's completion arrives or `timeout` elapses.
    /// The slot is released either way.
    pub async fn wait(&self, ticket: Ticket, timeout: Duration) -> Option<Completion> {
        let invoke_id = ticket.invoke_id;
        match tokio::time::timeout(timeout, ticket.rx).await {
            Ok(Ok(completion)) => Some(completion),
            Ok(Err(_)) | Err(_) => {
                let mut slots = self.slots.lock().await;
                slots[invoke_id as usize] = None;
                None
            }
        }
    }

    /// Drops slots older than `max_age`, waking their waiters (if any) with
    /// a closed channel. Returns the number reclaimed.
    pub async fn sweep_expired(&self, max_age: Duration) -> usize {
        let mut slots = self.slots.lock().await;
        let mut reclaimed = 0;
        for (invoke_id, entry) in slots.iter_mut().enumerate() {
            let expired = match entry {
                Some(slot) => slot.created.elapsed() > max_age,
                None => false,
            };
            if expired {
                debug!("reclaiming stale invoke id {invoke_id}");
                *entry = None;
                reclaimed += 1;
            }
        }
        reclaimed
    }

    #[cfg(test)]
    pub async fn outstanding(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.iter().filter(|slot| slot.is_some()).count()
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{Completion, PendingTable};
    use std::time::Duration;

    fn ok_completion(invoke_id: u8) -> Completion {
        Completion {
            payload: serde_json::json!({ "status": "success", "invokeId": invoke_id }),
            is_error: false,
        }
    }

    #[tokio::test]
    async fn register_allocates_distinct_ids_and_exhausts() {
        let table = PendingTable::new();
        let mut tickets = Vec::new();
        for _ in 0..255 {
            tickets.push(table.register().await.unwrap());
        }
        let mut ids: Vec<u8> = tickets.iter().map(|t| t.invoke_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 255);
        assert!(!ids.contains(&0));

        assert!(table.register().await.is_none());
    }

    #[tokio::test]
    async fn complete_wakes_waiter() {
        let table = PendingTable::new();
        let ticket = table.register().await.unwrap();
        let id = ticket.invoke_id;

        assert!(table.complete(id, ok_completion(id)).await);
        let completion = table.wait(ticket, Duration::from_secs(1)).await.unwrap();
        assert!(!completion.is_error);
        assert_eq!(completion.payload["invokeId"], id);
        assert_eq!(table.outstanding().await, 0);
    }

    #[tokio::test]
    async fn complete_unknown_id_is_rejected() {
        let table = PendingTable::new();
        assert!(!table.complete(7, ok_completion(7)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_and_frees_slot() {
        let table = PendingTable::new();
        let ticket = table.register().await.unwrap();
        let id = ticket.invoke_id;

        assert!(table.wait(ticket, Duration::from_secs(5)).await.is_none());
        assert_eq!(table.outstanding().await, 0);

        // A late reply for the abandoned ID must not be delivered anywhere.
        assert!(!table.complete(id, ok_completion(id)).await);
    }

    #[tokio::test]
    async fn abandoned_slot_is_reusable() {
        let table = PendingTable::new();
        let first = table.register().await.unwrap();
        let id = first.invoke_id;
        drop(first);

        let second = table.register().await.unwrap();
        assert_eq!(second.invoke_id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reclaims_old_slots_only() {
        let table = PendingTable::new();
        let old = table.register().await.unwrap();
        tokio::time::advance(Duration::from_secs(90)).await;
        let fresh = table.register().await.unwrap();

        assert_eq!(table.sweep_expired(Duration::from_secs(60)).await, 1);
        assert_eq!(table.outstanding().await, 1);

        // The swept waiter observes a closed channel, not a stuck future.
        assert!(table.wait(old, Duration::from_secs(5)).await.is_none());
        assert!(table.complete(fresh.invoke_id, ok_completion(fresh.invoke_id)).await);
        let completion = table.wait(fresh, Duration::from_secs(1)).await.unwrap();
        assert!(!completion.is_error);
    }
}

// Notification hub - in-process pub/sub of transaction snapshots
//
// One instance per process, shared by the API layer (subscribe) and the
// reconciler (publish). Delivery is best effort: publishing never blocks,
// and a subscriber whose queue is full is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::SessionClaims;
use crate::error::{AppError, AppResult};
use crate::ledger::models::Transaction;

/// Snapshots queued per subscriber before it counts as unresponsive
const SUBSCRIBER_BUFFER: usize = 16;

struct Subscriber {
    id: Uuid,
    sender: mpsc::Sender<String>,
}

pub struct NotificationHub {
    subscribers: Mutex<HashMap<i64, Vec<Subscriber>>>,
    buffer: usize,
}

/// A live registration; dropping it deregisters the subscriber
pub struct Subscription {
    hub: Arc<NotificationHub>,
    transaction_id: i64,
    id: Uuid,
    receiver: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn transaction_id(&self) -> i64 {
        self.transaction_id
    }

    /// Next snapshot; `None` once the hub has dropped this subscriber
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.transaction_id, self.id);
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::with_buffer(SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Check that the caller is the POS terminal that created `transaction`
    pub fn authorize(claims: &SessionClaims, transaction: &Transaction) -> AppResult<()> {
        let (vendor_id, pos_id) = claims.require_pos()?;
        if !transaction.is_owned_by(vendor_id, pos_id) {
            return Err(AppError::Unauthorized(
                "Transaction does not belong to this POS".to_string(),
            ));
        }
        Ok(())
    }

    pub fn subscribe(self: &Arc<Self>, transaction_id: i64) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();

        self.subscribers
            .lock()
            .entry(transaction_id)
            .or_default()
            .push(Subscriber { id, sender });

        debug!("Subscriber {} registered for transaction {}", id, transaction_id);

        Subscription {
            hub: Arc::clone(self),
            transaction_id,
            id,
            receiver,
        }
    }

    fn unsubscribe(&self, transaction_id: i64, id: Uuid) {
        let mut subscribers = self.subscribers.lock();
        if let Some(list) = subscribers.get_mut(&transaction_id) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subscribers.remove(&transaction_id);
            }
        }
    }

    /// Push the current state of a transaction to its subscribers
    ///
    /// Returns the number of subscribers the snapshot was queued for.
    pub fn publish(&self, transaction: &Transaction) -> usize {
        let message = match serde_json::to_string(transaction) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to serialize transaction {}: {}", transaction.id, e);
                return 0;
            }
        };

        let mut subscribers = self.subscribers.lock();
        let Some(list) = subscribers.get_mut(&transaction.id) else {
            return 0;
        };

        let mut delivered = 0;
        list.retain(|subscriber| match subscriber.sender.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "Dropping slow subscriber {} for transaction {}",
                    subscriber.id, transaction.id
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if list.is_empty() {
            subscribers.remove(&transaction.id);
        }

        delivered
    }

    pub fn subscriber_count(&self, transaction_id: i64) -> usize {
        self.subscribers
            .lock()
            .get(&transaction_id)
            .map_or(0, Vec::len)
    }
}

//! Push notifications for the UI layer
//!
//! Delivery is fire-and-forget: an event with no subscribers, or one a slow
//! subscriber lags past, is dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultEvent {
    FileUploaded {
        file_id: String,
        name: String,
        size: u64,
        chunk_count: u32,
    },
    FileDeleted {
        file_id: String,
        orphaned_chunks: usize,
    },
    AccountAdded {
        account_id: String,
        identity: String,
    },
    VaultLocked,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VaultEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }
}

impl EventBus {
    pub fn emit(&self, event: VaultEvent) {
        // no receivers is not an error
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.tx.subscribe()
    }
}

//! Per-entity mutation serialization.
//!
//! Update, delete and complete on the same kata take the kata's slot for the
//! whole optimistic-apply / remote-call / reconcile sequence, so two
//! overlapping mutations on one id run back to back. Different ids never
//! block each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use dojo_core::TaskId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct EntityLocks {
    slots: Mutex<HashMap<TaskId, Arc<AsyncMutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `id`; released when the guard drops.
    pub async fn acquire(&self, id: &TaskId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // idle slots are only referenced by the map
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(id.clone()).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of ids with a holder or waiter.
    pub fn busy(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|slot| Arc::strong_count(slot) > 1).count()
    }
}

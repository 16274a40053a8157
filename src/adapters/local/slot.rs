//! Singular "current operation" handle shared by the process and fetch adapters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Holds the cancellation token of the one operation currently in flight.
///
/// Seizing the slot cancels whatever held it before.
#[derive(Debug, Default)]
pub(crate) struct ActiveSlot {
    current: Mutex<Option<(u64, CancellationToken)>>,
    next_id: AtomicU64,
}

impl ActiveSlot {
    pub fn seize(&self, parent: &CancellationToken) -> SlotLease<'_> {
        let token = parent.child_token();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace((id, token.clone()));
        if let Some((_, previous)) = previous {
            previous.cancel();
        }
        SlotLease {
            slot: self,
            id,
            token,
        }
    }

    pub fn cancel(&self) {
        if let Some((_, token)) = self
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            token.cancel();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

/// Clears the slot on drop, unless a newer operation has taken it over.
pub(crate) struct SlotLease<'a> {
    slot: &'a ActiveSlot,
    id: u64,
    token: CancellationToken,
}

impl SlotLease<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        let mut current = self.slot.current.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(current.as_ref(), Some((id, _)) if *id == self.id) {
            *current = None;
        }
    }
}

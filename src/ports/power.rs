use std::error::Error;

/// Keeps the machine from sleeping while a job runs.
///
/// Failures are reported but the caller never treats them as fatal.
#[cfg_attr(test, mockall::automock)]
pub trait PowerInhibitor: Send + Sync {
    /// Returns an opaque blocker id.
    fn acquire(&self) -> Result<u32, Box<dyn Error + Send + Sync>>;

    fn release(&self, id: u32) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Scoped inhibitor acquisition; released on drop.
pub struct InhibitGuard<'a> {
    inhibitor: &'a dyn PowerInhibitor,
    id: Option<u32>,
}

impl<'a> InhibitGuard<'a> {
    pub fn acquire(inhibitor: &'a dyn PowerInhibitor) -> Self {
        let id = match inhibitor.acquire() {
            Ok(id) => {
                tracing::info!("Successfully blocked power-save");
                Some(id)
            }
            Err(e) => {
                tracing::warn!("Failed to block power-save: {e}");
                None
            }
        };
        Self { inhibitor, id }
    }

    pub fn is_held(&self) -> bool {
        self.id.is_some()
    }
}

impl Drop for InhibitGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            match self.inhibitor.release(id) {
                Ok(()) => tracing::info!("Successfully unblocked power-save"),
                Err(e) => tracing::error!("Failed to unblock power-save: {e}"),
            }
        }
    }
}

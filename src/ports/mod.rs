//! Ports - trait seams between the application services and the outside world.

pub mod fetch;
pub mod power;
pub mod process;
pub mod store;

/// An operation that can be interrupted from another task.
///
/// Implemented by every adapter that owns a singular in-flight operation, so
/// the job runner can interrupt whatever stage is active without knowing which.
pub trait Cancellable: Send + Sync {
    fn cancel(&self);
}

pub mod hub;

pub use crate::domain::jobs::QueueEvent;

//! stemq - Single-flight stem separation queue
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (jobs, stems)
//! - ports/: Trait definitions (process, fetch, store, power)
//! - adapters/: Concrete implementations (local processes, HTTP, JSON file)
//! - application/: Queue manager, job runner, status store
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

// Re-exports for convenience
pub use config::AppConfig;
pub use domain::jobs::{Job, JobStatus, MediaSource};

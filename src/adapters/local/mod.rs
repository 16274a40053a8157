//! Local adapters for single-machine deployment.

pub mod events;
pub mod fetch;
pub mod fs;
pub mod http;
pub mod power;
pub mod process;
mod slot;
pub mod store;

pub use events::hub::EventHub;
pub use fetch::HttpFetcher;
pub use fs::Janitor;
pub use power::SystemInhibitor;
pub use process::ProcessSupervisor;
pub use store::JsonFileStore;

//! Application layer - Services that drive the ports.

pub mod queue;
pub mod runner;
pub mod status;

#[cfg(test)]
pub mod testing;

//! Domain layer - Pure business logic.

// Job and status definitions shared by every layer
pub mod jobs;

// Stem separation: tool arguments, output layout, worker sizing
pub mod stems;

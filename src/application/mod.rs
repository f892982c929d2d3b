//! Application layer - the worker loop and notification fan-out
//!
//! Coordinates the domain planning logic with the infrastructure adapters:
//! one long-running worker per process, plus the notifier it hands new
//! tickets to.

pub mod notifier;
pub mod worker;

// Re-export commonly used items
pub use notifier::Notifier;
pub use worker::Worker;

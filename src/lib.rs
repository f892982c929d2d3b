//! deskwatch - Service desk portal synchronization worker
//!
//! Keeps a local document store in sync with the new-ticket list of an
//! external service desk portal. The worker drives a real browser session
//! through login, list filtering and detail pages, diffs the scraped tickets
//! against what it already knows, and queues a notification for every
//! genuinely new ticket.

// Module declarations
pub mod domain;
pub mod application;
pub mod infrastructure;

// Re-export the main entry points for binary and test use
pub use application::worker::Worker;
pub use infrastructure::config::{Credentials, WorkerConfig};

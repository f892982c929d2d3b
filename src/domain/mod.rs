//! Domain module - core synchronization logic and entities
//!
//! Ticket records, the diff/sync planning algorithm, the working-hours
//! window, and the ports to the worker's external collaborators.

pub mod ports;
pub mod schedule;
pub mod sync;
pub mod ticket;

// Re-export commonly used items
pub use ports::{DocumentStore, RemoteSession, SessionError, SessionFactory};
pub use sync::{plan_cycle, CyclePlan, SyncPlan};
pub use ticket::{NotificationWorkItem, TicketDetails, TicketRecord, SENTINEL_VALUE};

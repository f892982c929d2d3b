//! Infrastructure layer for the portal session, scraping, and persistence
//!
//! Adapters for everything outside the process: the WebDriver-controlled
//! browser, the portal's login and list/detail pages, the SQLite document
//! store, plus configuration and logging setup.

pub mod config;
pub mod detail;
pub mod list_view;
pub mod logging;
pub mod memory_store;
pub mod session_manager;
pub mod sqlite_store;
pub mod webdriver;

// Re-export commonly used items
pub use config::{Credentials, WorkerConfig};
pub use detail::DetailEnricher;
pub use list_view::ListView;
pub use logging::init_logging_with_config;
pub use memory_store::MemoryStore;
pub use session_manager::SessionManager;
pub use sqlite_store::SqliteDocumentStore;
pub use webdriver::WebDriverSessionFactory;

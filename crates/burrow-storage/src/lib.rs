//! Backing stores and the cache-aside link store built on top of them.

pub mod access;
pub mod hybrid;
pub mod memory;
pub mod mysql;

pub use access::{AccessRecorder, AccessRecorderSettings};
pub use hybrid::{HybridStore, HybridStoreSettings};
pub use memory::InMemoryRepository;
pub use mysql::MySqlRepository;

pub use burrow_core::repository::{HistoryRepository, LinkRepository};
pub use burrow_core::StorageError;

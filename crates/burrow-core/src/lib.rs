pub mod error;
pub mod history;
pub mod record;
pub mod repository;
pub mod shortcode;
pub mod store;

pub use error::{CoreError, StorageError, StoreError};
pub use history::{HistoryTable, DEFAULT_HISTORY_PREFIX, LIVE_TABLE};
pub use record::LinkRecord;
pub use repository::{HistoryRepository, LinkRepository};
pub use shortcode::ShortCode;
pub use store::LinkStore;

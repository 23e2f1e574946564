use crate::error::StoreError;
use crate::record::LinkRecord;
use crate::shortcode::ShortCode;
use async_trait::async_trait;

/// The storage contract the web tier talks to.
#[async_trait]
pub trait LinkStore: Send + Sync + 'static {
    /// Persists a record, assigning an id when it has none, and returns the
    /// stored record. A subsequent [`get`](LinkStore::get) observes it.
    async fn save(&self, record: LinkRecord) -> Result<LinkRecord, StoreError>;

    /// Resolves a code to its live, unexpired record.
    ///
    /// Unknown and expired codes both yield [`StoreError::NotFound`].
    async fn get(&self, code: &ShortCode) -> Result<LinkRecord, StoreError>;

    /// Flushes pending background work and releases the backing store.
    async fn close(&self) -> Result<(), StoreError>;
}

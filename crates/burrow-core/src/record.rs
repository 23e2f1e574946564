use crate::shortcode::ShortCode;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

/// A short link as stored in the live table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Row identifier. `None` until the store assigns one on save.
    pub id: Option<i64>,
    pub code: ShortCode,
    /// The destination the code redirects to.
    pub original_url: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub access_count: u64,
    pub last_access: Option<Timestamp>,
}

impl LinkRecord {
    /// Creates an unsaved record with no accesses.
    pub fn new(
        code: ShortCode,
        original_url: impl Into<String>,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            id: None,
            code,
            original_url: original_url.into(),
            created_at,
            expires_at,
            access_count: 0,
            last_access: None,
        }
    }

    /// Creates an unsaved record created now that lives for `ttl`.
    pub fn with_ttl(code: ShortCode, original_url: impl Into<String>, ttl: SignedDuration) -> Self {
        let now = Timestamp::now();
        let expires_at = now.saturating_add(ttl).unwrap_or(Timestamp::MAX);
        Self::new(code, original_url, now, expires_at)
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// A record is expired strictly after its expiry instant.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Timestamp::now())
    }
}

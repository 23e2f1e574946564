//! Bounded in-memory caches shared across Burrow services.
//!
//! The cache here is deliberately ignorant of time: it never expires entries
//! on its own. Callers that store records with a deadline must validate
//! freshness themselves after a hit.

pub mod lru;

pub use lru::LruCache;

//! TTL cache for API responses.
//!
//! Entries are JSON envelopes `{data, storedAt, expiresAt}` stored under a
//! fixed namespace in the key-value store. `Ttl::Never` entries never expire;
//! everything else is evicted the first time it is read past its expiry.

pub mod store;

pub use store::{CacheEntry, CacheHit, CacheStore, Ttl};

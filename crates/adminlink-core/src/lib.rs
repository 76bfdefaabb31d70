//! Client-side data-access layer for the admin console.
//!
//! The crate is organized leaf-first:
//! - `store`: infallible key-value facade over a persistent backend
//! - `auth`: access/refresh token lifecycle and request identity headers
//! - `api`: HTTP request executor with typed error classification
//! - `cache`: namespaced TTL cache on top of the key-value store
//! - `resource`: cached-resource orchestrator that decides fetch vs. reuse
//!
//! Domain service code only ever touches the verbs exposed here.

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod resource;
pub mod store;

pub use api::{ApiError, ClientError, HttpClient, RequestOptions, ResponseBody};
pub use auth::{AuthTokens, SessionIdentity, SessionSnapshot, TokenManager};
pub use cache::{CacheHit, CacheStore, Ttl};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use resource::{CachedResource, Dep, Fingerprint, ResourceState};
pub use store::{KvStore, StorageBackend, StorageError};

/// Re-exported so fetchers and callers share one cancellation type.
pub use tokio_util::sync::CancellationToken;

//! Cached, dependency-keyed resource fetching.
//!
//! A [`CachedResource`] decides on each sync whether its dependencies moved,
//! serves the first enabled fetch from the response cache when it can, and
//! discards fetch results that a later sync, refresh or drop has superseded.

mod fingerprint;
mod orchestrator;

pub use fingerprint::{Dep, Fingerprint};
pub use orchestrator::{CachedResource, ResourceState};

//! Greylist Stores
//!
//! A greylist record is nothing but `fingerprint -> first-seen Unix
//! timestamp`, with an expiry age. Two interchangeable stores provide the
//! same capability set behind the [`StoreBackend`] enum:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      StoreBackend                        │
//! │                                                          │
//! │  ┌────────────────────┐      ┌────────────────────────┐  │
//! │  │   InternalStore    │      │    MemcachedClient     │  │
//! │  │  Mutex<HashMap>    │      │  text protocol client, │  │
//! │  │  + sweeper task    │      │  TTL native to server  │  │
//! │  └────────────────────┘      └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The backend is selected by configuration (`grey_list_store`) and may be
//! swapped at runtime. There is deliberately no "uninitialized" variant: the
//! daemon is born with an internal store and always holds a usable backend.
//!
//! With the internal store, expiry is active: a background sweeper deletes
//! aged records every five minutes. With memcached, each record carries its
//! expiry as the entry TTL and aging out is the server's business.
//!
//! ## Modules
//!
//! - `internal`: the in-process mutex-guarded map
//! - `memcached`: the remote cache client
//! - `sweeper`: the background cleaner for the internal store

pub mod internal;
pub mod memcached;
pub mod sweeper;

// Re-export commonly used types for convenience
pub use internal::InternalStore;
pub use memcached::MemcachedClient;
pub use sweeper::spawn_sweeper;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// The runtime-selected greylist store.
///
/// Cloning clones the inner `Arc` handles, so a handler can take a cheap
/// private copy of the current selection without holding any lock across its
/// store calls.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// In-process map, owned by this daemon
    Internal(Arc<InternalStore>),
    /// Shared handle to an external memcached service
    Memcached(Arc<MemcachedClient>),
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

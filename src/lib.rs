//! # greylag - A Greylisting Policy Daemon for Postfix
//!
//! greylag is a Postfix policy delegate written in Rust. Postfix queries it
//! over a line-based TCP protocol once per recipient, and greylag answers with
//! an action string implementing the greylisting anti-spam heuristic:
//! a previously unseen (sender, recipient, client address) triplet is asked to
//! come back later; a triplet that retries after the configured delay is let
//! through.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              greylag                                 │
//! │                                                                      │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐               │
//! │  │ TCP Server  │───>│ Connection  │───>│  Greylist   │               │
//! │  │ (Listener)  │    │  Handler    │    │  Engine     │               │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘               │
//! │                           │                  │                      │
//! │                           ▼                  ▼                      │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────────────┐ │
//! │  │   Config    │    │   Policy    │    │       StoreBackend       │ │
//! │  │   Manager   │    │   Parser    │    │  ┌─────────┐ ┌─────────┐ │ │
//! │  └─────────────┘    └─────────────┘    │  │Internal │ │Memcached│ │ │
//! │                                        │  │ (Mutex) │ │ (TCP)   │ │ │
//! │                                        │  └────▲────┘ └─────────┘ │ │
//! │                                        └───────┼──────────────────┘ │
//! │                                        ┌───────┴──────────────────┐ │
//! │                                        │     Greylist Sweeper     │ │
//! │                                        │  (Background Tokio Task) │ │
//! │                                        └──────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Protocol
//!
//! Postfix sends `key=value` attribute lines terminated by a blank line and
//! expects `action=<value>` terminated the same way:
//!
//! ```text
//! request=smtpd_access_policy
//! protocol_state=RCPT
//! client_address=203.0.113.7
//! sender=alice@example.org
//! recipient=bob@example.net
//!
//! ```
//!
//! ```text
//! action=DEFER_IF_PERMIT Greylisted for 300 seconds please try again
//!
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Postfix policy protocol parser and request type
//! - [`policy`]: triplet fingerprinting and the greylisting decision engine
//! - [`store`]: interchangeable greylist stores (internal map, memcached)
//! - [`connection`]: client connection management
//! - [`config`]: configuration defaults, file loading and live application
//! - [`state`]: process-wide shared state container
//! - [`server`]: TCP listener and accept loop
//! - [`stats`]: periodic statistics collector
//! - [`sys`]: local interface enumeration and privilege dropping
//!
//! ## Design Highlights
//!
//! ### Fail-Open Policy
//!
//! A misbehaving store or a malformed request never blocks mail delivery.
//! Every degraded path answers the default action (`DUNNO`) and logs; only
//! bootstrap failures (bind, privilege drop, unreadable configuration) are
//! fatal.
//!
//! ### Live Reconfiguration
//!
//! SIGHUP re-reads the configuration file. Tunables are applied parameter by
//! parameter; switching `grey_list_store` swaps the backend at runtime and
//! the internal sweeper notices the drift on its next wake and terminates
//! itself.

pub mod config;
pub mod connection;
pub mod policy;
pub mod protocol;
pub mod server;
pub mod state;
pub mod stats;
pub mod store;
pub mod sys;

// Re-export commonly used types for convenience
pub use connection::handle_connection;
pub use policy::{decide, triplet_fingerprint, DEFAULT_ACTION};
pub use protocol::{ParseError, PolicyParser, PolicyRequest};
pub use state::SharedState;
pub use store::{InternalStore, MemcachedClient, StoreBackend};

/// The default port greylag listens on
pub const DEFAULT_PORT: u16 = 10033;

/// The default host greylag binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of greylag
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Connection Handling
//!
//! One handler task per accepted Postfix connection, living until the peer
//! closes its end. Postfix keeps policy connections open and sends many
//! requests over each, so the handler is a loop: read, frame, decide,
//! respond.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Postfix connects (accept loop spawns a handler task)
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  read bytes ──► frame one    │
//!    │                 request      │
//!    │                     │        │
//!    │                     ▼        │
//!    │            engine decides    │
//!    │                     │        │
//!    │                     ▼        │
//!    │            write action=…    │
//!    │                [loop back]   │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 3. Postfix disconnects; handler logs the request count and ends
//! ```

pub mod handler;

// Re-export commonly used items for convenience
pub use handler::{handle_connection, ConnectionError, ConnectionHandler};

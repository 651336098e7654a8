//! Postfix Policy Delegate Protocol
//!
//! This module implements the request side of the Postfix policy delegate
//! protocol (`smtpd_policy_service`).
//!
//! ## Overview
//!
//! A policy request is a sequence of `key=value` attribute lines terminated
//! by a blank line. The server answers with a single `action=<value>` line,
//! also terminated by a blank line, and the client may then send further
//! requests on the same connection.
//!
//! ## Modules
//!
//! - `types`: the [`PolicyRequest`] attribute map and well-known attribute names
//! - `parser`: incremental parser for the blank-line-framed request stream
//!
//! ## Example
//!
//! ```
//! use greylag::protocol::PolicyParser;
//!
//! let parser = PolicyParser::new();
//! let data = b"request=smtpd_access_policy\nprotocol_state=RCPT\n\n";
//!
//! let (request, consumed) = parser.parse(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert_eq!(request.get("protocol_state"), Some("RCPT"));
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{ParseError, ParseResult, PolicyParser};
pub use types::{attr, PolicyRequest};

//! Policy Request Type
//!
//! One [`PolicyRequest`] is built per framed client message and lives for a
//! single request/response cycle. It is nothing more than an attribute map;
//! Postfix decides which attributes it sends, and the engine only consumes
//! the handful named in [`attr`].

use std::collections::HashMap;
use std::fmt;

/// The blank-line terminator ending one policy request
pub const TERMINATOR: &[u8] = b"\n\n";

/// Well-known policy request attribute names
pub mod attr {
    /// Request type; the only supported value is `smtpd_access_policy`
    pub const REQUEST: &str = "request";
    /// SMTP protocol state; policy runs on `RCPT` only
    pub const PROTOCOL_STATE: &str = "protocol_state";
    /// Connecting client IP address
    pub const CLIENT_ADDRESS: &str = "client_address";
    /// Envelope sender
    pub const SENDER: &str = "sender";
    /// Envelope recipient
    pub const RECIPIENT: &str = "recipient";
    /// Queue identifier; may be empty in a policy request, logged if present
    pub const QUEUE_ID: &str = "queue_id";
}

/// The request type Postfix sends for smtpd access policy queries
pub const ACCESS_POLICY_REQUEST: &str = "smtpd_access_policy";

/// The protocol state that triggers the greylist check
pub const STATE_RCPT: &str = "RCPT";

/// One parsed policy request: an attribute name to attribute value map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyRequest {
    attrs: HashMap<String, String>,
}

impl PolicyRequest {
    pub fn new(attrs: HashMap<String, String>) -> Self {
        Self { attrs }
    }

    /// Looks up an attribute value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Looks up an attribute value, defaulting to the empty string.
    pub fn get_or_empty(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    /// Number of attributes in the request.
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// True for a request with no attributes at all (a bare terminator).
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// The queue id, when Postfix sent a non-empty one.
    pub fn queue_id(&self) -> Option<&str> {
        self.get(attr::QUEUE_ID).filter(|qid| !qid.is_empty())
    }
}

impl fmt::Display for PolicyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.attrs {
            writeln!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

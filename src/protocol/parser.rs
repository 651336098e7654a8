//! Incremental Policy Request Parser
//!
//! TCP is a stream protocol: a read may deliver a partial request or several
//! requests at once, so the parser works against an accumulation buffer and
//! reports how many bytes it consumed.
//!
//! ## How the Parser Works
//!
//! The parser scans the buffer for the blank-line terminator (two consecutive
//! newline characters) that ends one policy request and returns either:
//!
//! - `Ok(Some((request, consumed)))` - a complete request, `consumed` bytes used
//! - `Ok(None)` - no terminator buffered yet, the caller should read more
//! - `Err(ParseError)` - the framed text is not a valid request
//!
//! The caller appends incoming data to its buffer, calls [`PolicyParser::parse`],
//! advances the buffer by `consumed` on success and repeats until `Ok(None)`.
//!
//! ## Malformed Lines
//!
//! Postfix always sends well-formed `key=value` lines, but a policy service
//! is reachable by anything that can open a TCP connection. A line without a
//! `=` separator fails the request with a distinct error rather than being
//! silently dropped or crashing the handler; the connection handler decides
//! what to answer (it fails open).

use crate::protocol::types::{PolicyRequest, TERMINATOR};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur while parsing a policy request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A request line carried no `=` separator
    #[error("malformed attribute line: {0:?}")]
    MalformedLine(String),

    /// The framed request text is not valid UTF-8
    #[error("invalid UTF-8 in request: {0}")]
    InvalidUtf8(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// An incremental parser for blank-line-framed policy requests.
///
/// The parser itself is stateless; all buffering lives with the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct PolicyParser;

impl PolicyParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self
    }

    /// Attempts to parse one complete policy request from the buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((request, consumed)))` - successfully parsed a request
    /// - `Ok(None)` - incomplete data, need more bytes
    /// - `Err(e)` - parse error; the terminated frame is invalid
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(PolicyRequest, usize)>> {
        let Some(pos) = find_terminator(buf) else {
            return Ok(None);
        };
        let consumed = pos + TERMINATOR.len();

        let text = std::str::from_utf8(&buf[..pos])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        let mut attrs = HashMap::new();
        for line in text.split('\n') {
            if line.is_empty() {
                // the end of request
                break;
            }
            let (name, value) = line
                .split_once('=')
                .ok_or_else(|| ParseError::MalformedLine(line.to_string()))?;
            attrs.insert(name.to_string(), value.to_string());
        }

        Ok(Some((PolicyRequest::new(attrs), consumed)))
    }
}

/// Finds the offset of the first `\n\n` terminator in `buf`.
fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::attr;

    const REQUEST: &[u8] = b"request=smtpd_access_policy\n\
        protocol_state=RCPT\n\
        client_address=203.0.113.7\n\
        sender=alice@example.org\n\
        recipient=bob@example.net\n\n";

    #[test]
    fn parses_complete_request() {
        let parser = PolicyParser::new();
        let (req, consumed) = parser.parse(REQUEST).unwrap().unwrap();

        assert_eq!(consumed, REQUEST.len());
        assert_eq!(req.get(attr::REQUEST), Some("smtpd_access_policy"));
        assert_eq!(req.get(attr::PROTOCOL_STATE), Some("RCPT"));
        assert_eq!(req.get(attr::CLIENT_ADDRESS), Some("203.0.113.7"));
        assert_eq!(req.get(attr::SENDER), Some("alice@example.org"));
        assert_eq!(req.get(attr::RECIPIENT), Some("bob@example.net"));
    }

    #[test]
    fn incomplete_request_needs_more_data() {
        let parser = PolicyParser::new();

        // No terminator yet, not even after the last full line
        assert_eq!(parser.parse(b"").unwrap(), None);
        assert_eq!(parser.parse(b"request=smtpd_access_policy").unwrap(), None);
        assert_eq!(parser.parse(b"request=smtpd_access_policy\n").unwrap(), None);
    }

    #[test]
    fn consumes_only_the_first_request() {
        let parser = PolicyParser::new();
        let mut buf = Vec::new();
        buf.extend_from_slice(b"sender=a@x\n\n");
        buf.extend_from_slice(b"sender=b@y\n\n");

        let (first, consumed) = parser.parse(&buf).unwrap().unwrap();
        assert_eq!(first.get(attr::SENDER), Some("a@x"));
        assert_eq!(consumed, b"sender=a@x\n\n".len());

        let (second, _) = parser.parse(&buf[consumed..]).unwrap().unwrap();
        assert_eq!(second.get(attr::SENDER), Some("b@y"));
    }

    #[test]
    fn value_may_contain_equals_signs() {
        let parser = PolicyParser::new();
        let (req, _) = parser
            .parse(b"sasl_sender=user=alice,host=mx\n\n")
            .unwrap()
            .unwrap();
        assert_eq!(req.get("sasl_sender"), Some("user=alice,host=mx"));
    }

    #[test]
    fn line_without_separator_is_an_error() {
        let parser = PolicyParser::new();
        let err = parser.parse(b"this is not an attribute\n\n").unwrap_err();
        assert_eq!(
            err,
            ParseError::MalformedLine("this is not an attribute".to_string())
        );
    }

    #[test]
    fn bare_terminator_is_an_empty_request() {
        let parser = PolicyParser::new();
        let (req, consumed) = parser.parse(b"\n\n").unwrap().unwrap();
        assert!(req.is_empty());
        assert_eq!(consumed, 2);
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let parser = PolicyParser::new();
        let err = parser.parse(b"sender=\xff\xfe\n\n").unwrap_err();
        assert!(matches!(err, ParseError::InvalidUtf8(_)));
    }
}

//! Connection Handler
//!
//! Handles a single Postfix policy connection: accumulates incoming bytes in
//! a buffer, frames complete requests, lets the engine decide and writes the
//! `action=` response back. TCP is a stream protocol - one read may carry a
//! partial request or several pipelined requests, so framing is driven by
//! the incremental [`PolicyParser`] and never by read boundaries.
//!
//! Read errors other than end-of-stream are logged and tolerated; the
//! handler only gives up on a connection after several consecutive failures.
//! A request that cannot be parsed is answered with the default action
//! (fail open) before the connection is dropped as unsynchronized.

use crate::policy::{decide, DEFAULT_ACTION};
use crate::protocol::{ParseError, PolicyParser, PolicyRequest};
use crate::state::SharedState;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Maximum size for the read buffer (64 KB); a policy request is a few
/// hundred bytes, so anything approaching this is not Postfix
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity; enough for a usual request
const INITIAL_BUFFER_SIZE: usize = 1024;

/// Consecutive read failures tolerated before the connection is dropped
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 5;

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request stream could not be parsed
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Buffer size limit exceeded without a complete request
    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// Handles a single Postfix policy connection.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Peer address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Request framing
    parser: PolicyParser,

    /// Process-wide shared state
    state: Arc<SharedState>,

    /// Requests answered on this connection
    requests_served: u64,

    /// Consecutive read failures, reset by any successful read
    read_errors: u32,
}

impl ConnectionHandler {
    pub fn new(stream: TcpStream, addr: SocketAddr, state: Arc<SharedState>) -> Self {
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: PolicyParser::new(),
            state,
            requests_served: 0,
            read_errors: 0,
        }
    }

    /// Runs the connection to completion.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(
                "connection closed from {} after {} req sent",
                self.addr, self.requests_served
            ),
            Err(e) => warn!(
                "connection from {} aborted after {} req sent: {}",
                self.addr, self.requests_served, e
            ),
        }

        result
    }

    /// The read-frame-decide-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            loop {
                match self.next_request() {
                    Ok(Some((request, size))) => self.process(request, size).await?,
                    Ok(None) => break,
                    Err(e) => {
                        // Fail open, then drop the unsynchronized stream
                        warn!("malformed policy request from {}: {}", self.addr, e);
                        self.respond(DEFAULT_ACTION).await?;
                        return Err(e.into());
                    }
                }
            }

            if !self.read_more().await? {
                // connection closed by client
                return Ok(());
            }
        }
    }

    /// Frames the next complete request out of the buffer.
    fn next_request(&mut self) -> Result<Option<(PolicyRequest, usize)>, ParseError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        match self.parser.parse(&self.buffer)? {
            Some((request, consumed)) => {
                let _ = self.buffer.split_to(consumed);
                Ok(Some((request, consumed)))
            }
            None => Ok(None),
        }
    }

    /// Decides and answers one framed request.
    async fn process(&mut self, request: PolicyRequest, size: usize) -> Result<(), ConnectionError> {
        self.requests_served += 1;

        if self.state.settings.debug_enabled() {
            debug!(
                "policy request from {} {} ({} bytes)",
                self.addr, self.requests_served, size
            );
            debug!("{request}");
        }

        let started = (self.state.settings.stat_interval_secs() > 0).then(Instant::now);

        if !request.is_empty() {
            let action = decide(&self.state, &request).await;
            self.respond(&action).await?;
        }

        if let Some(started) = started {
            self.state.stats.record_request(started.elapsed());
        }

        Ok(())
    }

    async fn respond(&mut self, action: &str) -> Result<(), ConnectionError> {
        self.stream
            .write_all(format!("action={action}\n\n").as_bytes())
            .await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads more data into the buffer. `Ok(false)` means end-of-stream.
    async fn read_more(&mut self) -> Result<bool, ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            warn!(
                "dropping connection from {}: {} buffered bytes without a complete request",
                self.addr,
                self.buffer.len()
            );
            return Err(ConnectionError::BufferFull);
        }
        if self.buffer.capacity() - self.buffer.len() < 256 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        loop {
            match self.stream.get_mut().read_buf(&mut self.buffer).await {
                Ok(0) => return Ok(false),
                Ok(_) => {
                    self.read_errors = 0;
                    return Ok(true);
                }
                Err(e) => {
                    warn!("error reading from {}: {}", self.addr, e);
                    self.read_errors += 1;
                    if self.read_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                        return Err(e.into());
                    }
                }
            }
        }
    }
}

/// Runs a handler for one accepted connection to completion.
///
/// Errors are fully handled (and logged) inside; a handler fault never
/// reaches the accept loop.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: Arc<SharedState>) {
    let handler = ConnectionHandler::new(stream, addr, state);
    if let Err(e) = handler.run().await {
        debug!("connection from {} ended with error: {}", addr, e);
    }
}

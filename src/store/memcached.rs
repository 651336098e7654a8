//! Memcached Greylist Store
//!
//! A thin client for the memcached text protocol, carrying exactly the two
//! operations greylisting needs: `get` and `set` with a TTL. The stored
//! value is the record's first-seen timestamp as a decimal string; the TTL
//! is the greylist expiry, so aged records simply vanish server-side and no
//! local sweeping is needed for this backend.
//!
//! ## Wire Exchanges
//!
//! ```text
//! >> get GrlstPlc9f3c21aa77b01d4e\r\n
//! << VALUE GrlstPlc9f3c21aa77b01d4e 0 10\r\n
//! << 1700000000\r\n
//! << END\r\n                              (or just END\r\n on a miss)
//!
//! >> set GrlstPlc9f3c21aa77b01d4e 0 14400 10\r\n
//! >> 1700000000\r\n
//! << STORED\r\n
//! ```
//!
//! ## Synchronization
//!
//! One lazily-established connection per configured server, each behind its
//! own async mutex: the connection is a plain stream and is not safe for
//! interleaved use from concurrent handler tasks. Keys are spread over the
//! server list by checksum. Any I/O error drops the connection; the next
//! call reconnects. A miss is normal control flow, never an error.

use crate::policy::fingerprint::checksum;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Time allowed for establishing a server connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Time allowed for one whole get/set exchange, connect included
const OP_TIMEOUT: Duration = Duration::from_secs(2);

/// A memcached client over one or more servers.
#[derive(Debug)]
pub struct MemcachedClient {
    endpoints: Vec<Endpoint>,
}

#[derive(Debug)]
struct Endpoint {
    addr: String,
    conn: Mutex<Option<BufStream<TcpStream>>>,
}

impl MemcachedClient {
    /// Builds a client from a comma-separated `host:port` list.
    ///
    /// Entries are whitespace-trimmed; an effectively empty list falls back
    /// to the stock local memcached address.
    pub fn new(servers: &str) -> Self {
        let mut endpoints: Vec<Endpoint> = servers
            .split(',')
            .map(str::trim)
            .filter(|server| !server.is_empty())
            .map(|server| Endpoint {
                addr: server.to_string(),
                conn: Mutex::new(None),
            })
            .collect();

        if endpoints.is_empty() {
            endpoints.push(Endpoint {
                addr: "127.0.0.1:11211".to_string(),
                conn: Mutex::new(None),
            });
        }

        Self { endpoints }
    }

    /// The configured server addresses.
    pub fn servers(&self) -> Vec<&str> {
        self.endpoints.iter().map(|ep| ep.addr.as_str()).collect()
    }

    fn endpoint_for(&self, key: &str) -> &Endpoint {
        let index = if self.endpoints.len() == 1 {
            0
        } else {
            (checksum(key.as_bytes()) % self.endpoints.len() as u64) as usize
        };
        &self.endpoints[index]
    }

    /// Fetches a value. `Ok(None)` is a cache miss.
    pub async fn get(&self, key: &str) -> io::Result<Option<String>> {
        let endpoint = self.endpoint_for(key);
        let mut conn = endpoint.conn.lock().await;

        let result = timeout(OP_TIMEOUT, get_on(&mut conn, &endpoint.addr, key))
            .await
            .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "get timed out")));

        if result.is_err() {
            *conn = None;
        }
        result
    }

    /// Stores a value with a TTL in seconds.
    pub async fn set(&self, key: &str, value: &str, ttl_secs: i64) -> io::Result<()> {
        let endpoint = self.endpoint_for(key);
        let mut conn = endpoint.conn.lock().await;

        let result = timeout(OP_TIMEOUT, set_on(&mut conn, &endpoint.addr, key, value, ttl_secs))
            .await
            .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "set timed out")));

        if result.is_err() {
            *conn = None;
        }
        result
    }
}

async fn ensure_connected<'a>(
    conn: &'a mut Option<BufStream<TcpStream>>,
    addr: &str,
) -> io::Result<&'a mut BufStream<TcpStream>> {
    if conn.is_none() {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        *conn = Some(BufStream::new(stream));
    }
    Ok(conn.as_mut().unwrap())
}

async fn get_on(
    conn: &mut Option<BufStream<TcpStream>>,
    addr: &str,
    key: &str,
) -> io::Result<Option<String>> {
    let stream = ensure_connected(conn, addr).await?;

    stream.write_all(format!("get {key}\r\n").as_bytes()).await?;
    stream.flush().await?;

    let mut line = String::new();
    stream.read_line(&mut line).await?;
    let header = line.trim_end();

    if header == "END" {
        // cache miss
        return Ok(None);
    }

    // VALUE <key> <flags> <bytes>
    let mut fields = header.split_whitespace();
    if fields.next() != Some("VALUE") {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected get response: {header:?}"),
        ));
    }
    let length: usize = fields
        .nth(2)
        .and_then(|bytes| bytes.parse().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad VALUE line: {header:?}"),
            )
        })?;

    // data block plus its trailing CRLF
    let mut data = vec![0u8; length + 2];
    stream.read_exact(&mut data).await?;
    data.truncate(length);

    let mut end = String::new();
    stream.read_line(&mut end).await?;
    if end.trim_end() != "END" {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("missing END after value: {:?}", end.trim_end()),
        ));
    }

    String::from_utf8(data)
        .map(Some)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 value"))
}

async fn set_on(
    conn: &mut Option<BufStream<TcpStream>>,
    addr: &str,
    key: &str,
    value: &str,
    ttl_secs: i64,
) -> io::Result<()> {
    let stream = ensure_connected(conn, addr).await?;

    stream
        .write_all(format!("set {key} 0 {ttl_secs} {}\r\n", value.len()).as_bytes())
        .await?;
    stream.write_all(value.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;

    let mut line = String::new();
    stream.read_line(&mut line).await?;
    match line.trim_end() {
        "STORED" => Ok(()),
        reply => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("memcache did not store: {reply:?}"),
        )),
    }
}

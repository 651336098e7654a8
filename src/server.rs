//! TCP Listener
//!
//! Binds the configured `listen_ip:listen_port` and accepts Postfix policy
//! connections forever. Each accepted connection bumps the shared connection
//! counter and gets its own fire-and-forget handler task; the accept loop
//! never waits for handlers and a handler fault never reaches it.
//!
//! Bind and accept failures are fatal: a policy daemon that cannot accept
//! connections is of no use, and an early exit is how the supervisor learns
//! about it. This is a deliberate crash-on-accept-failure policy, not a
//! transient-retry one.

use crate::connection::handle_connection;
use crate::state::SharedState;
use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Binds the listener and serves until an accept error.
pub async fn run(state: Arc<SharedState>) -> anyhow::Result<()> {
    let addr = state.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;

    if state.settings.debug_enabled() {
        debug!("listening on {addr}");
    }

    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;

        info!("connect from {peer}");
        state.stats.connection_opened();

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            handle_connection(stream, peer, state).await;
        });
    }
}

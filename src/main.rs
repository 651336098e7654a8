//! greylag - A Greylisting Policy Daemon for Postfix
//!
//! This is the main entry point. It reads the configuration file, applies
//! it (dropping privileges if asked to), wires up SIGHUP-driven reloads and
//! runs the TCP server until an accept failure or a shutdown signal.

use anyhow::Context;
use clap::Parser;
use greylag::state::SharedState;
use greylag::{config, server};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// A greylisting policy daemon for Postfix.
///
/// Point the Postfix smtpd_recipient_restrictions at it with
/// `check_policy_service inet:127.0.0.1:10033`.
#[derive(Parser, Debug)]
#[command(name = "greylag", version)]
struct Cli {
    /// Set configuration file name
    #[arg(short = 'c', long = "config", value_name = "CONFIG_FILE")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The ceiling is DEBUG; the runtime `debug` tunable decides whether the
    // debug channel actually emits
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let state = Arc::new(SharedState::new());

    let initial = config::load_file(&cli.config)?;
    config::apply(&state, true, &initial).context("cannot apply configuration")?;
    info!(
        "greylag {} started, configuration read from {}",
        greylag::VERSION,
        cli.config.display()
    );

    spawn_reload_task(Arc::clone(&state), cli.config.clone());

    // Set up graceful shutdown
    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("shutdown signal received, stopping server...");
    };

    tokio::select! {
        result = server::run(state) => result,
        _ = shutdown => Ok(()),
    }
}

/// Re-reads and re-applies the configuration on every SIGHUP.
///
/// A failed re-read or re-apply logs and keeps the running configuration;
/// only the initial load is allowed to be fatal.
fn spawn_reload_task(state: Arc<SharedState>, path: PathBuf) {
    tokio::spawn(async move {
        let mut hangup = match unix_signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("cannot install SIGHUP handler: {e}");
                return;
            }
        };

        while hangup.recv().await.is_some() {
            info!("SIGHUP received, re-reading {}", path.display());
            match config::load_file(&path) {
                Ok(delta) => {
                    if let Err(e) = config::apply(&state, false, &delta) {
                        error!("configuration reload failed: {e:#}");
                    }
                }
                Err(e) => error!("configuration reload failed: {e:#}"),
            }
        }
    });
}

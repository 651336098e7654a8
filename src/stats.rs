//! Statistics Collector
//!
//! An optional background task that prints a one-line summary every
//! `stat_interval` seconds: connections and requests since the last line
//! (with per-second rates), the average request handling time, and - when
//! greylisting runs on the internal store - the current greylist size.
//! The counters are swapped to zero on every report, so each line covers
//! exactly one interval.
//!
//! Like the sweeper, the collector starts idempotently through the task
//! registry and terminates itself when it wakes up to find `stat_interval`
//! set to 0; the next configuration apply starts a fresh one if the
//! interval comes back.

use crate::state::SharedState;
use crate::store::StoreBackend;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Name under which the collector registers itself
pub const TASK_NAME: &str = "stats_collector";

/// Starts the collector unless one is already running or statistics are
/// disabled.
pub fn spawn_stats_collector(state: Arc<SharedState>) {
    if state.settings.stat_interval_secs() == 0 {
        // need no statistics
        return;
    }
    if !state.tasks.try_register(TASK_NAME) {
        // already running
        return;
    }
    if state.settings.debug_enabled() {
        debug!("stats collector run");
    }

    tokio::spawn(async move {
        let mut prev = Instant::now();
        loop {
            let secs = state.settings.stat_interval_secs();
            if secs == 0 {
                state.tasks.deregister(TASK_NAME);
                return;
            }
            tokio::time::sleep(Duration::from_secs(secs)).await;

            let now = Instant::now();
            let interval = now.duration_since(prev).as_secs_f32();
            prev = now;

            let connections = state.stats.take_connections();
            let (requests, duration) = state.stats.take_requests();
            let avg = if requests > 0 {
                duration / requests as u32
            } else {
                Duration::ZERO
            };

            let greylisted = match (state.settings.greylisting(), state.backend()) {
                (true, StoreBackend::Internal(store)) => {
                    format!(", greylisted {}", store.len())
                }
                _ => String::new(),
            };

            info!(
                "statistics: interval {}s, connections {} ({:.4} p/s), \
                 requests {} ({:.4} p/s, {:?} avg p/req){}",
                secs,
                connections,
                connections as f32 / interval,
                requests,
                requests as f32 / interval,
                avg,
                greylisted
            );
        }
    });
}

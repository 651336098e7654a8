//! Background Greylist Sweeper
//!
//! The internal store needs active expiry: a triplet that never comes back
//! would otherwise sit in the map forever. A background task wakes every
//! five minutes, deletes every record older than the configured expiry and
//! logs how many went and how long the pass took.
//!
//! ## Lifecycle
//!
//! Starting the sweeper is idempotent: registration in the process-wide
//! [`TaskRegistry`](crate::state::TaskRegistry) guarantees at most one
//! instance. The task is never cancelled from outside. Instead it checks at
//! every wake whether greylisting is still enabled and the configured
//! backend is still the internal store it was started for; when the
//! configuration has drifted (greylisting off, store switched to memcached,
//! or a fresh internal store installed) it clears its map, deregisters and
//! terminates itself. Records from before the switch can therefore never
//! resurface.

use crate::state::SharedState;
use crate::store::{unix_now, InternalStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Interval between sweep passes
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Name under which the sweeper registers itself
pub const TASK_NAME: &str = "greylist_sweeper";

/// Starts the sweeper for `store` unless one is already running.
pub fn spawn_sweeper(state: Arc<SharedState>, store: Arc<InternalStore>) {
    spawn_sweeper_with_interval(state, store, SWEEP_INTERVAL);
}

/// As [`spawn_sweeper`], with the wake interval exposed for tests.
pub(crate) fn spawn_sweeper_with_interval(
    state: Arc<SharedState>,
    store: Arc<InternalStore>,
    interval: Duration,
) {
    if !state.tasks.try_register(TASK_NAME) {
        // already running
        return;
    }
    if state.settings.debug_enabled() {
        debug!("starting greylist cleaner");
    }

    tokio::spawn(async move {
        loop {
            if !state.settings.greylisting() || !state.backend_is(&store) {
                // Drift: this store is no longer serving greylist checks
                store.clear();
                state.tasks.deregister(TASK_NAME);
                return;
            }

            tokio::time::sleep(interval).await;

            let now = unix_now();
            let expire = state.settings.expire_secs();
            let started = Instant::now();
            let deleted = store.sweep(now, expire);
            info!(
                "internal greylist cleaner: {} greylist entries deleted in {:?}",
                deleted,
                started.elapsed()
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreBackend;

    fn state_with_store() -> (Arc<SharedState>, Arc<InternalStore>) {
        let state = Arc::new(SharedState::new());
        state.settings.set_greylisting(true);
        let store = match state.backend() {
            StoreBackend::Internal(store) => store,
            StoreBackend::Memcached(_) => unreachable!(),
        };
        (state, store)
    }

    #[tokio::test]
    async fn sweeps_aged_records() {
        let (state, store) = state_with_store();
        let now = unix_now();
        store.insert(1, now - 20000); // past the 14400 s default expiry
        store.insert(2, now - 10);

        spawn_sweeper_with_interval(
            Arc::clone(&state),
            Arc::clone(&store),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.get(1), None);
        assert_eq!(store.get(2), Some(now - 10));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (state, store) = state_with_store();

        spawn_sweeper_with_interval(
            Arc::clone(&state),
            Arc::clone(&store),
            Duration::from_secs(300),
        );
        assert!(state.tasks.is_running(TASK_NAME));

        // The second start must not claim the registration for itself
        spawn_sweeper_with_interval(
            Arc::clone(&state),
            Arc::clone(&store),
            Duration::from_secs(300),
        );
        assert!(state.tasks.is_running(TASK_NAME));
    }

    #[tokio::test]
    async fn terminates_and_clears_on_backend_drift() {
        let (state, store) = state_with_store();
        store.insert(1, unix_now());

        spawn_sweeper_with_interval(
            Arc::clone(&state),
            Arc::clone(&store),
            Duration::from_millis(10),
        );

        // Swap the backend out from under the sweeper
        state.set_backend(StoreBackend::Internal(Arc::new(InternalStore::new())));

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!state.tasks.is_running(TASK_NAME));
        assert!(store.is_empty(), "old records must not survive the switch");
    }

    #[tokio::test]
    async fn terminates_when_greylisting_is_disabled() {
        let (state, store) = state_with_store();
        store.insert(1, unix_now());

        spawn_sweeper_with_interval(
            Arc::clone(&state),
            Arc::clone(&store),
            Duration::from_millis(10),
        );

        state.settings.set_greylisting(false);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!state.tasks.is_running(TASK_NAME));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn restart_after_drift_is_possible() {
        let (state, store) = state_with_store();

        spawn_sweeper_with_interval(
            Arc::clone(&state),
            Arc::clone(&store),
            Duration::from_millis(10),
        );

        let fresh = Arc::new(InternalStore::new());
        state.set_backend(StoreBackend::Internal(Arc::clone(&fresh)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!state.tasks.is_running(TASK_NAME));

        spawn_sweeper_with_interval(Arc::clone(&state), fresh, Duration::from_millis(10));
        assert!(state.tasks.is_running(TASK_NAME));
    }
}

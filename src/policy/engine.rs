//! Greylisting Decision Engine
//!
//! [`decide`] turns one parsed policy request into the action string written
//! back to Postfix. The engine never fails: every degraded path (store
//! trouble, unparsable stored value) logs and falls back to the default
//! action, so a broken greylist store can delay mail classification but
//! never delivery.
//!
//! ## Decision Flow
//!
//! ```text
//! request != smtpd_access_policy ──────────────► empty action
//! greylisting off / state != RCPT ─────────────► DUNNO
//! client address is a local interface ─────────► DUNNO
//! triplet never seen (or record expired) ──────► record it, DUNNO
//! seen, within delay window ───────────────────► DEFER_IF_PERMIT <wait>
//! seen, delay elapsed ─────────────────────────► DUNNO
//! ```
//!
//! A triplet's first sighting is recorded but not deferred; the deferral
//! starts with the second sighting inside the delay window.

use crate::policy::fingerprint::triplet_fingerprint;
use crate::protocol::types::{attr, ACCESS_POLICY_REQUEST, STATE_RCPT};
use crate::protocol::PolicyRequest;
use crate::state::SharedState;
use crate::store::memcached::MemcachedClient;
use crate::store::{unix_now, InternalStore, StoreBackend};
use tracing::{debug, warn};

/// The action returned whenever no policy objection exists
pub const DEFAULT_ACTION: &str = "DUNNO";

/// Key prefix for greylist records in memcached
const GREYLIST_PREFIX: &str = "GrlstPlc";

/// Formats the deferral action for a remaining wait in seconds.
fn defer_action(wait: i64) -> String {
    format!("DEFER_IF_PERMIT Greylisted for {wait} seconds please try again")
}

/// Decides the action for one policy request.
pub async fn decide(state: &SharedState, req: &PolicyRequest) -> String {
    if req.get(attr::REQUEST) != Some(ACCESS_POLICY_REQUEST) {
        warn!("policy request type unknown");
        return String::new();
    }

    match req.get(attr::PROTOCOL_STATE) {
        Some(STATE_RCPT) => check_rcpt(state, req).await,
        other => {
            warn!(
                "unknown or unsupported protocol state {}",
                other.unwrap_or("")
            );
            DEFAULT_ACTION.to_string()
        }
    }
}

async fn check_rcpt(state: &SharedState, req: &PolicyRequest) -> String {
    if state.settings.debug_enabled() {
        debug!("check on RCPT state");
    }

    if state.settings.greylisting() {
        check_grey(state, req).await
    } else {
        DEFAULT_ACTION.to_string()
    }
}

async fn check_grey(state: &SharedState, req: &PolicyRequest) -> String {
    let client_address = req.get_or_empty(attr::CLIENT_ADDRESS);
    let sender = req.get_or_empty(attr::SENDER);
    let recipient = req.get_or_empty(attr::RECIPIENT);

    // Skip checking if client has an IP address local for our host
    if state.is_local_addr(client_address) {
        return DEFAULT_ACTION.to_string();
    }

    let fingerprint = triplet_fingerprint(sender, recipient, client_address);

    if state.settings.debug_enabled() {
        let qid = req
            .queue_id()
            .map(|qid| format!("{qid}: "))
            .unwrap_or_default();
        debug!(
            "{qid}grey list check: client {client_address}, sender {sender}, \
             recipient {recipient}, checksum {fingerprint:x}"
        );
    }

    let now = unix_now();
    let delay = state.settings.delay_secs();
    let expire = state.settings.expire_secs();

    // Clone the backend handle out; the slot lock is never held across awaits.
    match state.backend() {
        StoreBackend::Internal(store) => check_internal(&store, fingerprint, now, delay, expire),
        StoreBackend::Memcached(client) => {
            check_memcached(state, &client, fingerprint, now, delay, expire).await
        }
    }
}

/// Greylist check against the in-process store.
///
/// The store performs the whole lookup-or-record step in one critical
/// section, so concurrent first sightings of a triplet end up with exactly
/// one record and one first-seen time.
fn check_internal(store: &InternalStore, fingerprint: u64, now: i64, delay: i64, expire: i64) -> String {
    match store.observe(fingerprint, now, expire) {
        None => DEFAULT_ACTION.to_string(),
        Some(first_seen) => {
            let delta = now - first_seen;
            let wait = delay - delta;
            if wait > 0 {
                defer_action(wait)
            } else {
                DEFAULT_ACTION.to_string()
            }
        }
    }
}

/// Greylist check against memcached.
///
/// The stored value is the first-seen timestamp as a decimal string and the
/// entry's own TTL carries the expiry, so aging out is delegated entirely to
/// memcached: an expired record is simply a miss here.
async fn check_memcached(
    state: &SharedState,
    client: &MemcachedClient,
    fingerprint: u64,
    now: i64,
    delay: i64,
    expire: i64,
) -> String {
    let key = format!("{GREYLIST_PREFIX}{fingerprint:x}");

    let stored = match client.get(&key).await {
        Ok(stored) => stored,
        Err(e) => {
            // Fail open: an unreachable cache must not hold up mail
            if state.settings.debug_enabled() {
                debug!("memcache get failed for {key}: {e}");
            }
            None
        }
    };

    let Some(value) = stored else {
        if let Err(e) = client.set(&key, &now.to_string(), expire).await {
            warn!("cannot set memcache item: {e}");
        }
        return DEFAULT_ACTION.to_string();
    };

    let Ok(first_seen) = value.parse::<i64>() else {
        warn!("cannot convert {value:?} to int");
        return DEFAULT_ACTION.to_string();
    };

    let wait = delay - (now - first_seen);
    if state.settings.debug_enabled() {
        debug!("now:{now}, try_time:{first_seen}, delay:{delay}, wait:{wait}");
    }
    if wait > 0 {
        defer_action(wait)
    } else {
        DEFAULT_ACTION.to_string()
    }
}

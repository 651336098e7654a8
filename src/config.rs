//! Configuration Manager
//!
//! Configuration is a flat map of named tunables. [`defaults`] supplies the
//! shipped values, [`load_file`] reads a TOML file of `name = "value"`
//! pairs, and [`apply`] validates and installs a delta into the shared
//! state - at startup and again on every SIGHUP.
//!
//! ## Apply Semantics
//!
//! Validation is per parameter and fail-soft: an unrecognized value is
//! logged and that one parameter keeps its previous setting, while the rest
//! of the delta still applies. Readers observe each parameter's change
//! atomically, but nothing synchronizes across parameters - an in-flight
//! request may see half-old, half-new tunables.
//!
//! The `debug` toggle is applied before anything else, because every
//! subsequent validation message depends on it. The only fatal outcome of
//! an apply is a failed privilege drop on the initial load.

use crate::state::SharedState;
use crate::stats::spawn_stats_collector;
use crate::store::{spawn_sweeper, InternalStore, MemcachedClient, StoreBackend};
use crate::sys;
use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// The unset sentinel for the `user` parameter
const NONE_SENTINEL: &str = "-none-";

/// The shipped configuration defaults.
pub fn defaults() -> HashMap<String, String> {
    [
        ("debug", "yes"),
        ("grey_listing", "no"),
        ("grey_list_delay", "300"),
        ("grey_list_expire", "14400"),
        ("grey_list_store", "internal"),
        ("listen_ip", "127.0.0.1"),
        ("listen_port", "10033"),
        ("memcached_servers", "127.0.0.1:11211"),
        ("stat_interval", "0"),
        ("user", NONE_SENTINEL),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .collect()
}

/// Reads a configuration file into a name/value delta.
///
/// The file is flat TOML; string, integer and boolean values are accepted
/// and normalized to strings (booleans become `yes`/`no`). Empty names or
/// values are skipped.
pub fn load_file(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read configuration file {}", path.display()))?;
    let table: toml::Table = text
        .parse()
        .with_context(|| format!("cannot parse configuration file {}", path.display()))?;

    let mut delta = HashMap::new();
    for (name, value) in table {
        let value = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Boolean(true) => "yes".to_string(),
            toml::Value::Boolean(false) => "no".to_string(),
            other => {
                warn!("ignoring configuration parameter {name}: unsupported value {other}");
                continue;
            }
        };
        if !name.is_empty() && !value.is_empty() {
            delta.insert(name, value);
        }
    }
    Ok(delta)
}

/// Validates and applies a configuration delta.
///
/// `initial` marks the startup load; it is the only time the `user`
/// parameter drops privileges. The returned error is fatal (privilege-drop
/// failure); everything else inside is fail-soft.
pub fn apply(
    state: &Arc<SharedState>,
    initial: bool,
    delta: &HashMap<String, String>,
) -> anyhow::Result<()> {
    // Set debug logging first
    if let Some(value) = delta.get("debug") {
        match value.as_str() {
            "yes" => {
                state.settings.set_debug(true);
                state.set_cfg_value("debug", value);
            }
            "no" => {
                state.settings.set_debug(false);
                state.set_cfg_value("debug", value);
            }
            other => {
                if state.settings.debug_enabled() {
                    debug!("unknown setting {other} for parameter debug");
                }
            }
        }
    }
    if state.settings.debug_enabled() {
        debug!("set configuration parameters");
    }

    for (name, value) in delta {
        if name == "debug" {
            continue;
        }
        if state.settings.debug_enabled() && state.cfg_value(name).as_deref() != Some(value) {
            debug!("new configuration value: {name} {value}");
        }

        match name.as_str() {
            "grey_listing" => match value.as_str() {
                "yes" => {
                    state.settings.set_greylisting(true);
                    state.set_cfg_value(name, value);
                }
                "no" => {
                    state.settings.set_greylisting(false);
                    state.set_cfg_value(name, value);
                }
                other => warn!("unknown setting {other} for parameter grey_listing"),
            },
            "grey_list_delay" => match value.parse::<i64>() {
                Ok(secs) => {
                    state.settings.set_delay_secs(secs);
                    state.set_cfg_value(name, value);
                }
                Err(_) => warn!("incorrect setting {value} for parameter grey_list_delay"),
            },
            "grey_list_expire" => match value.parse::<i64>() {
                Ok(secs) => {
                    state.settings.set_expire_secs(secs);
                    state.set_cfg_value(name, value);
                }
                Err(_) => warn!("incorrect setting {value} for parameter grey_list_expire"),
            },
            "grey_list_store" => match value.as_str() {
                "internal" | "memcached" => state.set_cfg_value(name, value),
                other => {
                    if state.settings.debug_enabled() {
                        debug!("unknown setting {other} for parameter grey_list_store");
                    }
                }
            },
            "listen_ip" => state.set_cfg_value(name, value),
            "listen_port" => match value.parse::<u16>() {
                Ok(_) => state.set_cfg_value(name, value),
                Err(_) => warn!("incorrect setting {value} for parameter listen_port"),
            },
            "memcached_servers" => state.set_cfg_value(name, value),
            "stat_interval" => match value.parse::<u64>() {
                Ok(secs) => {
                    state.settings.set_stat_interval_secs(secs);
                    state.set_cfg_value(name, value);
                    if state.settings.debug_enabled() {
                        debug!("stat_interval set to {secs}");
                    }
                }
                Err(_) => warn!("incorrect value for stat_interval: {value}"),
            },
            "user" => {
                if initial && value != NONE_SENTINEL {
                    sys::drop_privileges(value)?;
                }
                state.set_cfg_value(name, value);
            }
            other => {
                if state.settings.debug_enabled() {
                    debug!("unknown configuration parameter {other}");
                }
            }
        }
    }

    if state.settings.greylisting() {
        let addrs = sys::local_interface_addrs();
        if state.settings.debug_enabled() {
            let mut list: Vec<&str> = addrs.iter().map(String::as_str).collect();
            list.sort_unstable();
            debug!(
                "local IP addresses on the host excluded from grey list check: {}",
                list.join(" ")
            );
        }
        state.set_local_addrs(addrs);

        match state.cfg_value("grey_list_store").as_deref() {
            Some("memcached") => {
                let servers = state
                    .cfg_value("memcached_servers")
                    .unwrap_or_else(|| "127.0.0.1:11211".to_string());
                state.set_backend(StoreBackend::Memcached(Arc::new(MemcachedClient::new(
                    &servers,
                ))));
            }
            _ => {
                // Keep an existing internal store (and its records); build a
                // fresh one only when coming back from memcached
                let store = match state.backend() {
                    StoreBackend::Internal(store) => store,
                    StoreBackend::Memcached(_) => {
                        let store = Arc::new(InternalStore::new());
                        state.set_backend(StoreBackend::Internal(Arc::clone(&store)));
                        store
                    }
                };
                spawn_sweeper(Arc::clone(state), store);
            }
        }
    }

    spawn_stats_collector(Arc::clone(state));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sweeper;

    fn delta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_complete() {
        let defaults = defaults();
        assert_eq!(defaults.get("grey_listing").unwrap(), "no");
        assert_eq!(defaults.get("grey_list_delay").unwrap(), "300");
        assert_eq!(defaults.get("grey_list_expire").unwrap(), "14400");
        assert_eq!(defaults.get("grey_list_store").unwrap(), "internal");
        assert_eq!(defaults.get("listen_port").unwrap(), "10033");
        assert_eq!(defaults.get("stat_interval").unwrap(), "0");
    }

    #[tokio::test]
    async fn applies_valid_tunables() {
        let state = Arc::new(SharedState::new());
        apply(
            &state,
            false,
            &delta(&[("grey_list_delay", "600"), ("grey_list_expire", "7200")]),
        )
        .unwrap();

        assert_eq!(state.settings.delay_secs(), 600);
        assert_eq!(state.settings.expire_secs(), 7200);
        assert_eq!(state.cfg_value("grey_list_delay").unwrap(), "600");
    }

    #[tokio::test]
    async fn invalid_value_leaves_parameter_unchanged() {
        let state = Arc::new(SharedState::new());
        apply(
            &state,
            false,
            &delta(&[
                ("grey_list_delay", "ten minutes"),
                ("stat_interval", "often"),
                ("listen_port", "99999"),
                ("grey_listing", "maybe"),
            ]),
        )
        .unwrap();

        assert_eq!(state.settings.delay_secs(), 300);
        assert_eq!(state.settings.stat_interval_secs(), 0);
        assert_eq!(state.cfg_value("listen_port").unwrap(), "10033");
        assert!(!state.settings.greylisting());
    }

    #[tokio::test]
    async fn debug_toggle_applies() {
        let state = Arc::new(SharedState::new());
        apply(&state, false, &delta(&[("debug", "no")])).unwrap();
        assert!(!state.settings.debug_enabled());
        apply(&state, false, &delta(&[("debug", "yes")])).unwrap();
        assert!(state.settings.debug_enabled());
    }

    #[tokio::test]
    async fn enabling_greylisting_starts_the_sweeper() {
        let state = Arc::new(SharedState::new());
        apply(&state, false, &delta(&[("grey_listing", "yes")])).unwrap();

        assert!(state.settings.greylisting());
        assert!(state.tasks.is_running(sweeper::TASK_NAME));
        assert!(state.is_local_addr("127.0.0.1"));
        assert!(matches!(state.backend(), StoreBackend::Internal(_)));
    }

    #[tokio::test]
    async fn switching_to_memcached_installs_a_client() {
        let state = Arc::new(SharedState::new());
        apply(
            &state,
            false,
            &delta(&[
                ("grey_listing", "yes"),
                ("grey_list_store", "memcached"),
                ("memcached_servers", "10.0.0.1:11211,10.0.0.2:11211"),
            ]),
        )
        .unwrap();

        match state.backend() {
            StoreBackend::Memcached(client) => {
                assert_eq!(client.servers(), vec!["10.0.0.1:11211", "10.0.0.2:11211"]);
            }
            StoreBackend::Internal(_) => panic!("expected memcached backend"),
        }
    }

    #[tokio::test]
    async fn switching_back_builds_a_fresh_internal_store() {
        let state = Arc::new(SharedState::new());
        apply(
            &state,
            false,
            &delta(&[("grey_listing", "yes"), ("grey_list_store", "memcached")]),
        )
        .unwrap();
        apply(
            &state,
            false,
            &delta(&[("grey_list_store", "internal")]),
        )
        .unwrap();

        match state.backend() {
            StoreBackend::Internal(store) => assert!(store.is_empty()),
            StoreBackend::Memcached(_) => panic!("expected internal backend"),
        }
    }

    #[tokio::test]
    async fn unknown_store_value_keeps_the_previous_backend() {
        let state = Arc::new(SharedState::new());
        apply(
            &state,
            false,
            &delta(&[("grey_listing", "yes"), ("grey_list_store", "redis")]),
        )
        .unwrap();

        assert_eq!(state.cfg_value("grey_list_store").unwrap(), "internal");
        assert!(matches!(state.backend(), StoreBackend::Internal(_)));
    }

    #[tokio::test]
    async fn user_is_ignored_after_the_initial_load() {
        let state = Arc::new(SharedState::new());
        // Would be fatal on the initial load; later applies only record it
        apply(&state, false, &delta(&[("user", "no-such-user-greylag")])).unwrap();
        assert_eq!(state.cfg_value("user").unwrap(), "no-such-user-greylag");
    }

    #[tokio::test]
    async fn bogus_user_on_initial_load_is_fatal() {
        let state = Arc::new(SharedState::new());
        let err = apply(&state, true, &delta(&[("user", "no-such-user-greylag")])).unwrap_err();
        assert!(err.to_string().contains("cannot find UID"));
    }

    #[test]
    fn load_file_normalizes_values() {
        let dir = std::env::temp_dir().join(format!("greylag-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("greylag.cfg");
        std::fs::write(
            &path,
            "grey_listing = \"yes\"\ngrey_list_delay = 120\ndebug = false\n",
        )
        .unwrap();

        let delta = load_file(&path).unwrap();
        assert_eq!(delta.get("grey_listing").unwrap(), "yes");
        assert_eq!(delta.get("grey_list_delay").unwrap(), "120");
        assert_eq!(delta.get("debug").unwrap(), "no");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let err = load_file(Path::new("/no/such/greylag.cfg")).unwrap_err();
        assert!(err.to_string().contains("cannot read configuration file"));
    }
}

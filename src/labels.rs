//! Watchtower and Docker Compose label parsing.
//!
//! Label keys are matched byte-for-byte against what the runtime returns.
//! Every parser here is total: a missing or malformed label yields `None`
//! (or the documented default) rather than an error.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::types::LifecycleStage;

pub const WATCHTOWER: &str = "com.centurylinklabs.watchtower";
pub const ENABLE: &str = "com.centurylinklabs.watchtower.enable";
pub const MONITOR_ONLY: &str = "com.centurylinklabs.watchtower.monitor-only";
pub const NO_PULL: &str = "com.centurylinklabs.watchtower.no-pull";
pub const DEPENDS_ON: &str = "com.centurylinklabs.watchtower.depends-on";
pub const SCOPE: &str = "com.centurylinklabs.watchtower.scope";
pub const STOP_SIGNAL: &str = "com.centurylinklabs.watchtower.stop-signal";
pub const PRE_CHECK: &str = "com.centurylinklabs.watchtower.lifecycle.pre-check";
pub const POST_CHECK: &str = "com.centurylinklabs.watchtower.lifecycle.post-check";
pub const PRE_UPDATE: &str = "com.centurylinklabs.watchtower.lifecycle.pre-update";
pub const POST_UPDATE: &str = "com.centurylinklabs.watchtower.lifecycle.post-update";
pub const PRE_UPDATE_TIMEOUT: &str = "com.centurylinklabs.watchtower.lifecycle.pre-update-timeout";
pub const POST_UPDATE_TIMEOUT: &str =
    "com.centurylinklabs.watchtower.lifecycle.post-update-timeout";
pub const LIFECYCLE_UID: &str = "com.centurylinklabs.watchtower.lifecycle.uid";
pub const LIFECYCLE_GID: &str = "com.centurylinklabs.watchtower.lifecycle.gid";
pub const ZODIAC_ORIGINAL_IMAGE: &str = "com.centurylinklabs.zodiac.original-image";
pub const COMPOSE_DEPENDS_ON: &str = "com.docker.compose.depends_on";
pub const COMPOSE_SERVICE: &str = "com.docker.compose.service";
pub const COMPOSE_PROJECT: &str = "com.docker.compose.project";
pub const COMPOSE_CONTAINER_NUMBER: &str = "com.docker.compose.container-number";

/// Hook timeout used when the timeout label is absent or unparsable.
pub const DEFAULT_HOOK_TIMEOUT_MINUTES: u64 = 1;

/// Parses a boolean the way operators write them in compose files.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

pub fn get_bool(labels: &HashMap<String, String>, key: &str) -> Option<bool> {
    let raw = labels.get(key)?;
    let parsed = parse_bool(raw.trim());
    if parsed.is_none() {
        debug!("Ignoring malformed boolean label {}={:?}", key, raw);
    }
    parsed
}

/// Combines a container label with the matching global flag.
///
/// An absent or malformed label defers to `global`. Otherwise the label
/// wins outright under `label_precedence`, and is OR-ed with `global`
/// when it does not.
pub fn effective_flag(label: Option<bool>, global: bool, label_precedence: bool) -> bool {
    match label {
        None => global,
        Some(value) if label_precedence => value,
        Some(value) => value || global,
    }
}

pub fn get_string<'a>(labels: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    labels
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Adds the leading slash the runtime uses for container names.
fn as_link(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{}", name)
    }
}

/// Names listed in `com.centurylinklabs.watchtower.depends-on`.
pub fn depends_on(labels: &HashMap<String, String>) -> Vec<String> {
    let Some(raw) = labels.get(DEPENDS_ON) else {
        return Vec::new();
    };
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(as_link)
        .collect()
}

/// Service names listed in `com.docker.compose.depends_on`.
///
/// Accepts both `a,b` and the extended `service:condition[:required]` form.
pub fn compose_depends_on(labels: &HashMap<String, String>) -> Vec<String> {
    let Some(raw) = labels.get(COMPOSE_DEPENDS_ON) else {
        return Vec::new();
    };
    raw.split(',')
        .filter_map(|entry| entry.split(':').next())
        .map(str::trim)
        .filter(|service| !service.is_empty())
        .map(as_link)
        .collect()
}

pub fn hook_command_key(stage: LifecycleStage) -> &'static str {
    match stage {
        LifecycleStage::PreCheck => PRE_CHECK,
        LifecycleStage::PostCheck => POST_CHECK,
        LifecycleStage::PreUpdate => PRE_UPDATE,
        LifecycleStage::PostUpdate => POST_UPDATE,
    }
}

pub fn hook_command(labels: &HashMap<String, String>, stage: LifecycleStage) -> Option<String> {
    get_string(labels, hook_command_key(stage)).map(str::to_string)
}

/// Hook timeout in minutes; `0` means unbounded.
///
/// Only the update stages have a timeout label, check stages always use
/// the default.
pub fn hook_timeout_minutes(labels: &HashMap<String, String>, stage: LifecycleStage) -> u64 {
    let key = match stage {
        LifecycleStage::PreUpdate => PRE_UPDATE_TIMEOUT,
        LifecycleStage::PostUpdate => POST_UPDATE_TIMEOUT,
        _ => return DEFAULT_HOOK_TIMEOUT_MINUTES,
    };
    match labels.get(key).map(|v| v.trim().parse::<u64>()) {
        Some(Ok(minutes)) => minutes,
        Some(Err(_)) => {
            debug!(
                "Invalid {} label, using {} minute",
                key, DEFAULT_HOOK_TIMEOUT_MINUTES
            );
            DEFAULT_HOOK_TIMEOUT_MINUTES
        }
        None => DEFAULT_HOOK_TIMEOUT_MINUTES,
    }
}

fn get_id(labels: &HashMap<String, String>, key: &str) -> u32 {
    labels
        .get(key)
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

/// `(uid, gid)` to run hooks as; `0` means "leave to the runtime".
pub fn hook_user(labels: &HashMap<String, String>) -> (u32, u32) {
    (get_id(labels, LIFECYCLE_UID), get_id(labels, LIFECYCLE_GID))
}

/// The watchtower-namespaced subset of labels exposed to hook scripts.
pub fn watchtower_labels(labels: &HashMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter(|(key, _)| {
            key.as_str() == WATCHTOWER || key.starts_with("com.centurylinklabs.watchtower.")
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn precedence_rule() {
        assert!(effective_flag(None, true, false));
        assert!(!effective_flag(None, false, true));
        assert!(!effective_flag(Some(false), true, true));
        assert!(effective_flag(Some(false), true, false));
        assert!(effective_flag(Some(true), false, false));
    }

    #[test]
    fn malformed_bool_is_absent() {
        let l = labels(&[(MONITOR_ONLY, "yes please")]);
        assert_eq!(get_bool(&l, MONITOR_ONLY), None);
        let l = labels(&[(MONITOR_ONLY, "TRUE")]);
        assert_eq!(get_bool(&l, MONITOR_ONLY), Some(true));
    }

    #[test]
    fn depends_on_adds_slash_and_drops_blanks() {
        let l = labels(&[(DEPENDS_ON, "db, /cache,, ")]);
        assert_eq!(depends_on(&l), vec!["/db", "/cache"]);
    }

    #[test]
    fn compose_depends_on_extended_form() {
        let l = labels(&[(
            COMPOSE_DEPENDS_ON,
            "postgres:service_healthy:true, redis:service_started,,worker",
        )]);
        assert_eq!(
            compose_depends_on(&l),
            vec!["/postgres", "/redis", "/worker"]
        );
    }

    #[test]
    fn hook_timeouts() {
        let l = labels(&[
            (PRE_UPDATE_TIMEOUT, "0"),
            (POST_UPDATE_TIMEOUT, "ten"),
        ]);
        assert_eq!(hook_timeout_minutes(&l, LifecycleStage::PreUpdate), 0);
        assert_eq!(hook_timeout_minutes(&l, LifecycleStage::PostUpdate), 1);
        assert_eq!(hook_timeout_minutes(&l, LifecycleStage::PreCheck), 1);
        assert_eq!(
            hook_timeout_minutes(&HashMap::new(), LifecycleStage::PreUpdate),
            1
        );
    }

    #[test]
    fn watchtower_label_subset() {
        let l = labels(&[
            (WATCHTOWER, "true"),
            (SCOPE, "prod"),
            ("com.centurylinklabs.watchtowerish", "x"),
            (COMPOSE_SERVICE, "web"),
        ]);
        let filtered = watchtower_labels(&l);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.contains_key(SCOPE));
    }
}

//! How a recreated container gets its networks back.
//!
//! Engines before API 1.44 accept a single endpoint on create, so the
//! remaining networks have to be connected one by one afterwards.

use std::collections::HashMap;

use bollard::models::EndpointSettings;

use crate::container::Container;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ApiVersion {
    pub major: usize,
    pub minor: usize,
}

impl ApiVersion {
    pub const MULTI_NETWORK_CREATE: ApiVersion = ApiVersion {
        major: 1,
        minor: 44,
    };

    pub fn parse(version: &str) -> Option<Self> {
        let (major, minor) = version.trim().trim_start_matches('v').split_once('.')?;
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkPlan {
    /// Endpoints sent in `NetworkingConfig` on create.
    pub create: HashMap<String, EndpointSettings>,
    /// Endpoints connected after create, in order.
    pub connect: Vec<(String, EndpointSettings)>,
    /// Top-level `Config.MacAddress`, used by engines before 1.44.
    pub mac_address: Option<String>,
}

pub fn plan_networks(container: &Container, api: ApiVersion) -> NetworkPlan {
    let mut plan = NetworkPlan::default();
    let Some(networks) = container.network_settings() else {
        return plan;
    };
    let network_mode = container
        .host_config()
        .and_then(|h| h.network_mode.as_deref())
        .unwrap_or_default();
    if network_mode.starts_with("container:") || network_mode == "host" {
        return plan;
    }

    let primary = match network_mode {
        "" | "default" => "bridge",
        mode => mode,
    };
    let mut endpoints: Vec<(String, EndpointSettings)> = networks
        .iter()
        .map(|(name, endpoint)| (name.clone(), strip_own_aliases(endpoint, container)))
        .collect();
    endpoints.sort_by(|(a, _), (b, _)| (a != primary, a).cmp(&(b != primary, b)));

    let modern = api >= ApiVersion::MULTI_NETWORK_CREATE;
    if !modern {
        plan.mac_address = endpoints
            .iter()
            .find_map(|(_, e)| e.mac_address.clone().filter(|m| !m.is_empty()));
        for (_, endpoint) in endpoints.iter_mut() {
            endpoint.mac_address = None;
        }
    }

    if modern || endpoints.len() == 1 {
        plan.create = endpoints.into_iter().collect();
    } else {
        let mut rest = endpoints.into_iter();
        if let Some((name, endpoint)) = rest.next() {
            plan.create.insert(name, endpoint);
        }
        plan.connect = rest.collect();
    }
    plan
}

/// Drops the container's own id from the endpoint aliases.
fn strip_own_aliases(endpoint: &EndpointSettings, container: &Container) -> EndpointSettings {
    let mut endpoint = endpoint.clone();
    endpoint.aliases = endpoint
        .aliases
        .take()
        .map(|aliases| {
            aliases
                .into_iter()
                .filter(|a| a != container.id() && a != container.short_id())
                .collect::<Vec<_>>()
        })
        .filter(|aliases| !aliases.is_empty());
    endpoint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::inspect;
    use bollard::models::{HostConfig, NetworkSettings};

    const OLD: ApiVersion = ApiVersion {
        major: 1,
        minor: 41,
    };
    const NEW: ApiVersion = ApiVersion {
        major: 1,
        minor: 45,
    };

    fn container(networks: &[(&str, Option<&str>)], mode: &str) -> Container {
        let id = "c".repeat(64);
        let mut info = inspect(&id, "app", "app");
        info.host_config = Some(HostConfig {
            network_mode: Some(mode.to_string()),
            ..Default::default()
        });
        info.network_settings = Some(NetworkSettings {
            networks: Some(
                networks
                    .iter()
                    .map(|(name, mac)| {
                        (
                            name.to_string(),
                            EndpointSettings {
                                aliases: Some(vec!["app".to_string(), id[..12].to_string()]),
                                mac_address: mac.map(str::to_string),
                                ..Default::default()
                            },
                        )
                    })
                    .collect(),
            ),
            ..Default::default()
        });
        Container::new(info, None).unwrap()
    }

    #[test]
    fn parses_versions() {
        assert_eq!(ApiVersion::parse("1.44"), Some(ApiVersion::MULTI_NETWORK_CREATE));
        assert!(ApiVersion::parse("1.43").unwrap() < ApiVersion::MULTI_NETWORK_CREATE);
        assert_eq!(ApiVersion::parse("latest"), None);
    }

    #[test]
    fn own_id_alias_is_removed() {
        let plan = plan_networks(&container(&[("backend", None)], "backend"), NEW);
        let aliases = plan.create["backend"].aliases.clone().unwrap();
        assert_eq!(aliases, vec!["app".to_string()]);
    }

    #[test]
    fn modern_api_sends_everything_on_create() {
        let plan = plan_networks(
            &container(&[("backend", Some("02:42:ac:11:00:02")), ("frontend", None)], "backend"),
            NEW,
        );
        assert_eq!(plan.create.len(), 2);
        assert!(plan.connect.is_empty());
        assert!(plan.mac_address.is_none());
        assert_eq!(
            plan.create["backend"].mac_address.as_deref(),
            Some("02:42:ac:11:00:02")
        );
    }

    #[test]
    fn legacy_api_connects_extra_networks() {
        let plan = plan_networks(
            &container(&[("alpha", None), ("zeta", Some("02:42:ac:11:00:09"))], "zeta"),
            OLD,
        );
        assert_eq!(plan.create.len(), 1);
        assert!(plan.create.contains_key("zeta"));
        assert_eq!(plan.connect.len(), 1);
        assert_eq!(plan.connect[0].0, "alpha");
        assert_eq!(plan.mac_address.as_deref(), Some("02:42:ac:11:00:09"));
        assert!(plan.create["zeta"].mac_address.is_none());
    }

    #[test]
    fn shared_namespace_has_no_networks() {
        let plan = plan_networks(&container(&[("bridge", None)], "container:vpn"), NEW);
        assert!(plan.create.is_empty() && plan.connect.is_empty());
    }
}

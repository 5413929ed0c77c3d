//! Semantic view over a runtime inspect payload.
//!
//! A [`Container`] wraps the container inspect response together with the
//! inspect response of the image it was created from, and exposes the
//! handful of accessors the orchestrator reasons about. The raw payloads
//! are retained verbatim so the container can be recreated later (see
//! [`create_config`]).

pub mod create_config;

use std::collections::HashMap;

use bollard::models::{
    ContainerConfig, ContainerInspectResponse, ContainerStateStatusEnum, EndpointSettings,
    HealthStatusEnum, HostConfig, ImageInspect,
};

use crate::error::{Error, Result};
use crate::labels;
use crate::types::{ContainerState, UpdateParams};

const DEFAULT_STOP_SIGNAL: &str = "SIGTERM";

#[derive(Debug, Clone)]
pub struct Container {
    info: ContainerInspectResponse,
    image_info: Option<ImageInspect>,
    labels: HashMap<String, String>,
    stale: bool,
    linked_to_restarting: bool,
}

/// Identity a compose container is addressed by from its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeIdentity {
    pub project: String,
    pub service: String,
    pub number: Option<String>,
}

impl Container {
    pub fn new(info: ContainerInspectResponse, image_info: Option<ImageInspect>) -> Result<Self> {
        if info.id.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::InvalidConfiguration(
                "inspect payload carries no container id".to_string(),
            ));
        }
        let labels = info
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();
        Ok(Self {
            info,
            image_info,
            labels,
            stale: false,
            linked_to_restarting: false,
        })
    }

    pub fn id(&self) -> &str {
        self.info.id.as_deref().unwrap_or_default()
    }

    pub fn short_id(&self) -> &str {
        let id = self.id();
        &id[..id.len().min(12)]
    }

    /// Display name without the runtime's leading slash.
    pub fn name(&self) -> &str {
        self.info
            .name
            .as_deref()
            .unwrap_or_default()
            .trim_start_matches('/')
    }

    /// Image reference the container should be recreated from.
    ///
    /// The zodiac original-image label wins over `Config.Image`. Untagged
    /// references get `:latest`; `sha256:` references are returned as-is.
    pub fn image_name(&self) -> String {
        let raw = labels::get_string(&self.labels, labels::ZODIAC_ORIGINAL_IMAGE)
            .or_else(|| self.container_config().and_then(|c| c.image.as_deref()))
            .unwrap_or_default();
        if raw.starts_with("sha256:") || raw.contains('@') {
            return raw.to_string();
        }
        let last_segment = raw.rsplit('/').next().unwrap_or(raw);
        if last_segment.contains(':') {
            raw.to_string()
        } else {
            format!("{}:latest", raw)
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.image_name().starts_with("sha256:")
    }

    pub fn image_id(&self) -> &str {
        self.info.image.as_deref().unwrap_or_default()
    }

    pub fn has_image_info(&self) -> bool {
        self.image_info.is_some()
    }

    pub fn image_config(&self) -> Option<&ContainerConfig> {
        self.image_info.as_ref().and_then(|i| i.config.as_ref())
    }

    /// Digests after the `@` of every `RepoDigests` entry of the current image.
    pub fn image_digests(&self) -> Vec<&str> {
        self.image_info
            .as_ref()
            .and_then(|i| i.repo_digests.as_ref())
            .map(|digests| {
                digests
                    .iter()
                    .filter_map(|d| d.split_once('@').map(|(_, digest)| digest))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn container_config(&self) -> Option<&ContainerConfig> {
        self.info.config.as_ref()
    }

    pub fn host_config(&self) -> Option<&HostConfig> {
        self.info.host_config.as_ref()
    }

    pub fn network_settings(&self) -> Option<&HashMap<String, EndpointSettings>> {
        self.info
            .network_settings
            .as_ref()
            .and_then(|s| s.networks.as_ref())
    }

    pub fn inspect(&self) -> &ContainerInspectResponse {
        &self.info
    }

    pub fn hostname(&self) -> Option<&str> {
        self.container_config().and_then(|c| c.hostname.as_deref())
    }

    pub fn state(&self) -> ContainerState {
        let status = self.info.state.as_ref().and_then(|s| s.status);
        match status {
            Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
            Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
            Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
            Some(ContainerStateStatusEnum::EXITED) => ContainerState::Exited,
            Some(ContainerStateStatusEnum::REMOVING) => ContainerState::Removing,
            Some(ContainerStateStatusEnum::DEAD) => ContainerState::Dead,
            Some(ContainerStateStatusEnum::CREATED)
            | Some(ContainerStateStatusEnum::EMPTY)
            | None => ContainerState::Created,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            ContainerState::Running | ContainerState::Restarting
        )
    }

    pub fn auto_remove(&self) -> bool {
        self.host_config()
            .and_then(|h| h.auto_remove)
            .unwrap_or(false)
    }

    /// True when the container runs a healthcheck the runtime will report on.
    pub fn has_healthcheck(&self) -> bool {
        self.container_config()
            .and_then(|c| c.healthcheck.as_ref())
            .and_then(|h| h.test.as_ref())
            .and_then(|test| test.first())
            .map(|first| first != "NONE")
            .unwrap_or(false)
    }

    pub fn health_status(&self) -> Option<HealthStatusEnum> {
        self.info
            .state
            .as_ref()
            .and_then(|s| s.health.as_ref())
            .and_then(|h| h.status)
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn stop_signal(&self) -> String {
        labels::get_string(&self.labels, labels::STOP_SIGNAL)
            .unwrap_or(DEFAULT_STOP_SIGNAL)
            .to_string()
    }

    /// Whether this container is a watchtower instance.
    pub fn is_watchtower(&self) -> bool {
        labels::get_bool(&self.labels, labels::WATCHTOWER).unwrap_or(false)
    }

    pub fn scope(&self) -> Option<&str> {
        labels::get_string(&self.labels, labels::SCOPE)
    }

    pub fn enabled(&self) -> Option<bool> {
        labels::get_bool(&self.labels, labels::ENABLE)
    }

    pub fn is_monitor_only(&self, params: &UpdateParams) -> bool {
        labels::effective_flag(
            labels::get_bool(&self.labels, labels::MONITOR_ONLY),
            params.monitor_only,
            params.label_precedence,
        )
    }

    pub fn is_no_pull(&self, params: &UpdateParams) -> bool {
        labels::effective_flag(
            labels::get_bool(&self.labels, labels::NO_PULL),
            params.no_pull,
            params.label_precedence,
        )
    }

    pub fn compose_identity(&self) -> Option<ComposeIdentity> {
        let project = labels::get_string(&self.labels, labels::COMPOSE_PROJECT)?;
        let service = labels::get_string(&self.labels, labels::COMPOSE_SERVICE)?;
        Some(ComposeIdentity {
            project: project.to_string(),
            service: service.to_string(),
            number: labels::get_string(&self.labels, labels::COMPOSE_CONTAINER_NUMBER)
                .map(str::to_string),
        })
    }

    /// Every name this container can be referred to by from a link.
    pub fn identities(&self) -> Vec<String> {
        let mut names = vec![self.name().to_string(), self.id().to_string()];
        if let Some(compose) = self.compose_identity() {
            names.push(format!("{}-{}", compose.project, compose.service));
            if let Some(number) = &compose.number {
                names.push(format!("{}-{}-{}", compose.project, compose.service, number));
            }
        }
        names
    }

    /// Containers this one must be restarted after.
    ///
    /// The first non-empty source wins: the watchtower `depends-on` label,
    /// then the compose `depends_on` label, then host-config links together
    /// with a `container:` network mode target.
    pub fn links(&self) -> Vec<String> {
        let explicit = labels::depends_on(&self.labels);
        if !explicit.is_empty() {
            return explicit;
        }
        let compose = labels::compose_depends_on(&self.labels);
        if !compose.is_empty() {
            return compose;
        }

        let mut links = Vec::new();
        if let Some(host_config) = self.host_config() {
            for link in host_config.links.iter().flatten() {
                if let Some((name, _)) = link.split_once(':') {
                    links.push(format!("/{}", name.trim_start_matches('/')));
                }
            }
            if let Some(target) = host_config
                .network_mode
                .as_deref()
                .and_then(|mode| mode.strip_prefix("container:"))
            {
                links.push(format!("/{}", target.trim_start_matches('/')));
            }
        }
        links
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn is_linked_to_restarting(&self) -> bool {
        self.linked_to_restarting
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn mark_linked_to_restarting(&mut self) {
        self.linked_to_restarting = true;
    }

    pub fn to_restart(&self) -> bool {
        self.stale || self.linked_to_restarting
    }

    /// Checks the payload is complete enough to recreate the container.
    pub fn verify_configuration(&mut self) -> Result<()> {
        let name = self.name().to_string();
        if !self.has_image_info() {
            return Err(Error::InvalidConfiguration(format!(
                "no image info for {}",
                name
            )));
        }
        if self.info.host_config.is_none() {
            return Err(Error::InvalidConfiguration(format!(
                "no host config for {}",
                name
            )));
        }
        let has_bindings = self
            .info
            .host_config
            .as_ref()
            .and_then(|h| h.port_bindings.as_ref())
            .map(|b| !b.is_empty())
            .unwrap_or(false);
        let Some(config) = self.info.config.as_mut() else {
            return Err(Error::InvalidConfiguration(format!(
                "no container config for {}",
                name
            )));
        };
        if has_bindings && config.exposed_ports.is_none() {
            config.exposed_ports = Some(HashMap::new());
        }
        Ok(())
    }
}

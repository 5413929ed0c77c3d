//! Docker vs Podman detection and the host-config fields that do not
//! round-trip through Podman's Docker-compatible API.

use std::path::Path;

use bollard::models::HostConfig;
use log::debug;

use super::RuntimeDetails;
use crate::types::CpuCopyMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeKind {
    #[default]
    Docker,
    Podman,
}

/// Host-side markers read once at startup.
#[derive(Debug, Clone, Default)]
pub struct VariantProbe {
    pub containerenv: bool,
    pub dockerenv: bool,
    pub container_env: Option<String>,
}

impl VariantProbe {
    pub fn from_host() -> Self {
        Self {
            containerenv: Path::new("/run/.containerenv").exists(),
            dockerenv: Path::new("/.dockerenv").exists(),
            container_env: std::env::var("CONTAINER").ok(),
        }
    }
}

pub fn detect_runtime(probe: &VariantProbe, details: &RuntimeDetails) -> RuntimeKind {
    if probe.containerenv {
        debug!("Found /run/.containerenv, assuming Podman");
        return RuntimeKind::Podman;
    }
    if probe.dockerenv {
        debug!("Found /.dockerenv, assuming Docker");
        return RuntimeKind::Docker;
    }
    if matches!(probe.container_env.as_deref(), Some("podman") | Some("oci")) {
        return RuntimeKind::Podman;
    }
    let named_podman = details
        .name
        .as_deref()
        .map(|n| n.eq_ignore_ascii_case("podman"))
        .unwrap_or(false);
    let version_podman = details
        .server_version
        .as_deref()
        .map(|v| v.to_ascii_lowercase().contains("podman"))
        .unwrap_or(false);
    if named_podman || version_podman {
        RuntimeKind::Podman
    } else {
        RuntimeKind::Docker
    }
}

pub fn apply_host_config_policy(
    host_config: &mut HostConfig,
    kind: RuntimeKind,
    disable_memory_swappiness: bool,
    cpu_copy_mode: CpuCopyMode,
) {
    if disable_memory_swappiness {
        host_config.memory_swappiness = None;
    }
    match cpu_copy_mode {
        CpuCopyMode::Full => {}
        CpuCopyMode::None => {
            host_config.nano_cpus = Some(0);
            host_config.cpu_shares = Some(0);
            host_config.cpu_quota = Some(0);
            host_config.cpu_period = Some(0);
            host_config.cpuset_cpus = Some(String::new());
            host_config.cpuset_mems = Some(String::new());
        }
        CpuCopyMode::Auto => {
            if kind == RuntimeKind::Podman {
                host_config.nano_cpus = Some(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_limited() -> HostConfig {
        HostConfig {
            nano_cpus: Some(1_000_000_000),
            cpu_shares: Some(1024),
            cpu_quota: Some(50_000),
            cpu_period: Some(100_000),
            cpuset_cpus: Some("0-1".to_string()),
            memory_swappiness: Some(60),
            ..Default::default()
        }
    }

    #[test]
    fn detection_order() {
        let details = RuntimeDetails {
            name: Some("podman".to_string()),
            ..Default::default()
        };
        let docker_marker = VariantProbe {
            dockerenv: true,
            ..Default::default()
        };
        assert_eq!(detect_runtime(&docker_marker, &details), RuntimeKind::Docker);

        let both = VariantProbe {
            containerenv: true,
            dockerenv: true,
            ..Default::default()
        };
        assert_eq!(detect_runtime(&both, &RuntimeDetails::default()), RuntimeKind::Podman);

        let env = VariantProbe {
            container_env: Some("oci".to_string()),
            ..Default::default()
        };
        assert_eq!(detect_runtime(&env, &RuntimeDetails::default()), RuntimeKind::Podman);

        assert_eq!(detect_runtime(&VariantProbe::default(), &details), RuntimeKind::Podman);

        let versioned = RuntimeDetails {
            server_version: Some("4.9.3-podman".to_string()),
            ..Default::default()
        };
        assert_eq!(
            detect_runtime(&VariantProbe::default(), &versioned),
            RuntimeKind::Podman
        );
        assert_eq!(
            detect_runtime(&VariantProbe::default(), &RuntimeDetails::default()),
            RuntimeKind::Docker
        );
    }

    #[test]
    fn auto_drops_nano_cpus_on_podman_only() {
        let mut podman = cpu_limited();
        apply_host_config_policy(&mut podman, RuntimeKind::Podman, false, CpuCopyMode::Auto);
        assert_eq!(podman.nano_cpus, Some(0));
        assert_eq!(podman.cpu_shares, Some(1024));
        assert_eq!(podman.cpu_quota, Some(50_000));

        let mut docker = cpu_limited();
        apply_host_config_policy(&mut docker, RuntimeKind::Docker, false, CpuCopyMode::Auto);
        assert_eq!(docker.nano_cpus, Some(1_000_000_000));
    }

    #[test]
    fn none_zeroes_all_cpu_fields() {
        let mut host = cpu_limited();
        apply_host_config_policy(&mut host, RuntimeKind::Docker, true, CpuCopyMode::None);
        assert_eq!(host.nano_cpus, Some(0));
        assert_eq!(host.cpu_shares, Some(0));
        assert_eq!(host.cpu_period, Some(0));
        assert_eq!(host.cpuset_cpus.as_deref(), Some(""));
        assert_eq!(host.memory_swappiness, None);
    }
}

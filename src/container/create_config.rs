//! Recreation configs derived from a container's inspect payload.
//!
//! Runtime inspect merges image defaults into the container config, so
//! sending it back verbatim would bake the old image's defaults into the
//! new container. [`Container::build_create_config`] subtracts everything
//! that still equals the image default and keeps the operator's overrides.

use std::collections::HashMap;

use bollard::container::Config;
use bollard::models::{ContainerConfig, HostConfig};
use log::warn;

use super::Container;

impl Container {
    pub fn build_create_config(&self) -> Config<String> {
        let mut config = self.container_config().cloned().unwrap_or_default();

        let Some(image_config) = self.image_config() else {
            config.image = Some(self.image_name());
            return into_create_config(config);
        };

        if same_str(&config.working_dir, &image_config.working_dir) {
            config.working_dir = None;
        }
        if same_str(&config.user, &image_config.user) {
            config.user = None;
        }

        let host_config = self.host_config();
        let shares_network = host_config
            .and_then(|h| h.network_mode.as_deref())
            .map(|mode| mode.starts_with("container:"))
            .unwrap_or(false);
        let has_uts_mode = host_config
            .and_then(|h| h.uts_mode.as_deref())
            .map(|mode| !mode.is_empty())
            .unwrap_or(false);
        if shares_network || has_uts_mode {
            config.hostname = None;
        }

        if same_list(&config.entrypoint, &image_config.entrypoint) {
            config.entrypoint = None;
            if same_list(&config.cmd, &image_config.cmd) {
                config.cmd = None;
            }
        }

        if let (Some(check), Some(image_check)) = (
            config.healthcheck.as_mut(),
            image_config.healthcheck.as_ref(),
        ) {
            if check.test == image_check.test {
                check.test = None;
            }
            if check.retries == image_check.retries {
                check.retries = None;
            }
            if check.interval == image_check.interval {
                check.interval = None;
            }
            if check.timeout == image_check.timeout {
                check.timeout = None;
            }
            if check.start_period == image_check.start_period {
                check.start_period = None;
            }
        }

        let image_env = image_config.env.as_deref().unwrap_or_default();
        config.env = config
            .env
            .take()
            .map(|env| {
                env.into_iter()
                    .filter(|entry| !image_env.contains(entry))
                    .collect::<Vec<_>>()
            })
            .filter(|env| !env.is_empty());

        let image_labels = image_config.labels.clone().unwrap_or_default();
        config.labels = config
            .labels
            .take()
            .map(|labels| {
                labels
                    .into_iter()
                    .filter(|(key, value)| image_labels.get(key) != Some(value))
                    .collect::<HashMap<_, _>>()
            })
            .filter(|labels| !labels.is_empty());

        let image_volumes = image_config.volumes.clone().unwrap_or_default();
        config.volumes = config
            .volumes
            .take()
            .map(|volumes| {
                volumes
                    .into_iter()
                    .filter(|(path, _)| !image_volumes.contains_key(path))
                    .collect::<HashMap<_, _>>()
            })
            .filter(|volumes| !volumes.is_empty());

        let image_ports = image_config.exposed_ports.clone().unwrap_or_default();
        let mut exposed: HashMap<String, HashMap<(), ()>> = config
            .exposed_ports
            .take()
            .unwrap_or_default()
            .into_iter()
            .filter(|(port, _)| !image_ports.contains_key(port))
            .collect();
        if let Some(bindings) = host_config.and_then(|h| h.port_bindings.as_ref()) {
            for port in bindings.keys() {
                exposed.entry(port.clone()).or_default();
            }
        }
        config.exposed_ports = if exposed.is_empty() {
            None
        } else {
            Some(exposed)
        };

        config.image = Some(self.image_name());
        into_create_config(config)
    }

    /// Host config for recreation, with links rewritten to `name:/alias`.
    ///
    /// Runtime-variant mutations are applied separately by the gateway.
    pub fn build_create_host_config(&self) -> HostConfig {
        let mut host_config = self.host_config().cloned().unwrap_or_default();
        if let Some(links) = host_config.links.take() {
            host_config.links = Some(links.iter().filter_map(|l| rewrite_link(l)).collect());
        }
        host_config
    }
}

fn rewrite_link(link: &str) -> Option<String> {
    let Some((name, alias)) = link.split_once(':') else {
        warn!("Skipping malformed link {:?}", link);
        return None;
    };
    let alias = alias.rsplit('/').next().unwrap_or(alias);
    Some(format!("{}:/{}", name, alias))
}

fn same_str(a: &Option<String>, b: &Option<String>) -> bool {
    a.as_deref().unwrap_or_default() == b.as_deref().unwrap_or_default()
}

fn same_list(a: &Option<Vec<String>>, b: &Option<Vec<String>>) -> bool {
    a.as_deref().unwrap_or_default() == b.as_deref().unwrap_or_default()
}

fn into_create_config(c: ContainerConfig) -> Config<String> {
    Config {
        hostname: c.hostname,
        domainname: c.domainname,
        user: c.user,
        attach_stdin: c.attach_stdin,
        attach_stdout: c.attach_stdout,
        attach_stderr: c.attach_stderr,
        exposed_ports: c.exposed_ports,
        tty: c.tty,
        open_stdin: c.open_stdin,
        stdin_once: c.stdin_once,
        env: c.env,
        cmd: c.cmd,
        healthcheck: c.healthcheck,
        args_escaped: c.args_escaped,
        image: c.image,
        volumes: c.volumes,
        working_dir: c.working_dir,
        entrypoint: c.entrypoint,
        network_disabled: c.network_disabled,
        mac_address: c.mac_address,
        on_build: c.on_build,
        labels: c.labels,
        stop_signal: c.stop_signal,
        stop_timeout: c.stop_timeout,
        shell: c.shell,
        ..Default::default()
    }
}

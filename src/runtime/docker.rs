use super::network::{plan_networks, ApiVersion};
use super::variant::{apply_host_config_policy, RuntimeKind};
use super::{
    ClientOptions, ContainerRuntime, ExecRequest, ExecStatus, NewContainer, RuntimeDetails,
    POLL_INTERVAL,
};
use crate::container::Container;
use crate::error::{Error, Result};
use crate::filters::Filter;
use crate::registry::{ImageReference, RegistryCredentials};
use async_trait::async_trait;
use bollard::container::{
    CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    ListContainersOptions, NetworkingConfig, RemoveContainerOptions, RenameContainerOptions,
    StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions};
use bollard::image::{CreateImageOptions, RemoveImageOptions};
use bollard::models::EndpointSettings;
use bollard::network::ConnectNetworkOptions;
use bollard::{ClientVersion, Docker};
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::env;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

const DEFAULT_SOCKET: &str = "/var/run/docker.sock";
const REQUEST_TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
    options: ClientOptions,
    kind: RuntimeKind,
    api: ApiVersion,
}

impl DockerRuntime {
    /// Connects using `DOCKER_HOST` and negotiates the API version.
    ///
    /// A `DOCKER_API_VERSION` pin is honoured unless the daemon answers the
    /// ping with 404, in which case negotiation takes over.
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        let pinned = env::var("DOCKER_API_VERSION")
            .ok()
            .and_then(|v| ApiVersion::parse(&v));

        let docker = match pinned {
            Some(version) if !tls_requested() => {
                let docker = Self::connect_with_version(&ClientVersion {
                    major_version: version.major,
                    minor_version: version.minor,
                })?;
                match docker.ping().await.map_err(Error::from) {
                    Ok(_) => docker,
                    Err(e) if e.is_not_found() => {
                        warn!(
                            "Daemon rejected pinned API version {}.{}, negotiating instead",
                            version.major, version.minor
                        );
                        Self::connect_default()?.negotiate_version().await?
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => Self::connect_default()?.negotiate_version().await?,
        };

        let version = docker.client_version();
        let api = ApiVersion {
            major: version.major_version,
            minor: version.minor_version,
        };
        info!("Connected to container runtime, API {}.{}", api.major, api.minor);
        Ok(Self::with_client(docker, options, api))
    }

    pub fn with_client(docker: Docker, options: ClientOptions, api: ApiVersion) -> Self {
        Self {
            docker,
            options,
            kind: RuntimeKind::Docker,
            api,
        }
    }

    /// Sets the detected runtime variant used for host-config mutations.
    pub fn set_kind(&mut self, kind: RuntimeKind) {
        self.kind = kind;
    }

    fn connect_default() -> Result<Docker> {
        let host = env::var("DOCKER_HOST").ok();
        let docker = match host.as_deref() {
            Some(h) if h.starts_with("tcp://") || h.starts_with("https://") => {
                if tls_requested() {
                    Docker::connect_with_ssl_defaults()?
                } else {
                    Docker::connect_with_http_defaults()?
                }
            }
            Some(h) if h.starts_with("http://") => Docker::connect_with_http_defaults()?,
            Some(h) => Docker::connect_with_unix(
                h.trim_start_matches("unix://"),
                REQUEST_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            )?,
            None => Docker::connect_with_socket_defaults()?,
        };
        Ok(docker)
    }

    fn connect_with_version(version: &ClientVersion) -> Result<Docker> {
        let host = env::var("DOCKER_HOST").unwrap_or_else(|_| DEFAULT_SOCKET.to_string());
        let docker = if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(&host, REQUEST_TIMEOUT_SECS, version)?
        } else {
            Docker::connect_with_unix(
                host.trim_start_matches("unix://"),
                REQUEST_TIMEOUT_SECS,
                version,
            )?
        };
        Ok(docker)
    }

    /// Container inspect plus image inspect; a missing image is not an error.
    async fn inspect(&self, id: &str) -> Result<Container> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let image_info = match info.image.as_deref().filter(|i| !i.is_empty()) {
            Some(image_id) => match self.docker.inspect_image(image_id).await.map_err(Error::from) {
                Ok(image) => Some(image),
                Err(e) if e.is_not_found() => {
                    debug!("Image {} of container {} is gone", image_id, id);
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };
        Container::new(info, image_info)
    }

    async fn kill(&self, id: &str, signal: &str) -> Result<()> {
        match self
            .docker
            .kill_container(id, Some(KillContainerOptions { signal }))
            .await
            .map_err(Error::from)
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() || e.is_conflict() => {
                debug!("Container {} already stopped: {}", id, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Polls until the container is no longer running; `false` on timeout.
    async fn wait_for_stop(
        &self,
        id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .docker
                .inspect_container(id, None::<InspectContainerOptions>)
                .await
                .map_err(Error::from)
            {
                Ok(info) => {
                    let running = info.state.and_then(|s| s.running).unwrap_or(false);
                    if !running {
                        return Ok(true);
                    }
                }
                Err(e) if e.is_not_found() => return Ok(true),
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(POLL_INTERVAL) => {}
            }
        }
    }

    async fn wait_for_removal(
        &self,
        id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .docker
                .inspect_container(id, None::<InspectContainerOptions>)
                .await
                .map_err(Error::from)
            {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
                Ok(_) if Instant::now() >= deadline => {
                    warn!("Container {} still present after {:?}", id, timeout);
                    return Ok(());
                }
                Ok(_) => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(POLL_INTERVAL) => {}
            }
        }
    }

    async fn remove(&self, id: &str, remove_volumes: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: remove_volumes,
            ..Default::default()
        };
        match self
            .docker
            .remove_container(id, Some(options))
            .await
            .map_err(Error::from)
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Container {} already removed", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn tls_requested() -> bool {
    env::var("DOCKER_TLS_VERIFY")
        .map(|v| !v.is_empty() && v != "0")
        .unwrap_or(false)
}

/// Some engines answer a list with 404 when there is nothing to list.
fn listed_or_empty<T>(listed: Result<Vec<T>>) -> Result<Vec<T>> {
    match listed {
        Err(e) if e.is_not_found() => {
            warn!("Container list returned 404, treating as empty");
            Ok(Vec::new())
        }
        other => other,
    }
}

/// Connects a freshly created container to its extra networks in order.
/// On the first failure the container is removed again and the error
/// returned.
pub(crate) async fn connect_networks<C, CFut, R, RFut>(
    name: &str,
    networks: Vec<(String, EndpointSettings)>,
    connect: C,
    remove: R,
) -> Result<()>
where
    C: Fn(String, EndpointSettings) -> CFut,
    CFut: Future<Output = Result<()>>,
    R: Fn() -> RFut,
    RFut: Future<Output = Result<()>>,
{
    for (network, endpoint) in networks {
        debug!("Connecting {} to {}", name, network);
        if let Err(e) = connect(network.clone(), endpoint).await {
            error!("Failed to connect {} to {}: {}", name, network, e);
            if let Err(cleanup) = remove().await {
                warn!("Could not remove half-created {}: {}", name, cleanup);
            }
            return Err(e);
        }
    }
    Ok(())
}

/// Inspects every id, skipping containers removed since they were listed.
pub(crate) async fn inspect_all<F, Fut>(ids: Vec<String>, inspect: F) -> Result<Vec<Container>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Container>>,
{
    let mut containers = Vec::with_capacity(ids.len());
    for id in ids {
        match inspect(id.clone()).await {
            Ok(container) => containers.push(container),
            Err(e) if e.is_not_found() => {
                debug!("Container {} disappeared before it could be inspected", id);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(containers)
}

fn pull_error(image_name: &str, e: bollard::errors::Error) -> Error {
    let text = e.to_string().to_ascii_lowercase();
    if text.contains("unauthorized") || text.contains("denied") {
        Error::Unauthorized(image_name.to_string())
    } else {
        Error::from(e)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self, filter: &Filter) -> Result<Vec<Container>> {
        let mut statuses = vec!["running".to_string()];
        if self.options.include_stopped {
            statuses.push("created".to_string());
            statuses.push("exited".to_string());
        }
        if self.options.include_restarting {
            statuses.push("restarting".to_string());
        }
        let opts = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([("status".to_string(), statuses)]),
            ..Default::default()
        };

        let summaries =
            listed_or_empty(self.docker.list_containers(Some(opts)).await.map_err(Error::from))?;

        let ids = summaries.into_iter().filter_map(|s| s.id).collect();
        let containers = inspect_all(ids, |id| async move { self.inspect(&id).await }).await?;
        Ok(containers
            .into_iter()
            .filter(|c| filter.matches(c))
            .collect())
    }

    async fn get_container(&self, id: &str) -> Result<Container> {
        self.inspect(id).await
    }

    async fn stop_container(
        &self,
        container: &Container,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let id = container.id();
        if container.is_running() {
            let signal = container.stop_signal();
            info!(
                "Stopping {} ({}) with {}",
                container.name(),
                container.short_id(),
                signal
            );
            self.kill(id, &signal).await?;
            if !self.wait_for_stop(id, timeout, cancel).await? {
                warn!(
                    "{} did not stop within {:?}, sending SIGKILL",
                    container.name(),
                    timeout
                );
                self.kill(id, "SIGKILL").await?;
            }
        } else {
            debug!("{} is not running, skipping stop", container.name());
        }

        if container.auto_remove() {
            debug!(
                "{} has AutoRemove set, waiting for the runtime to remove it",
                container.name()
            );
            return self.wait_for_removal(id, timeout, cancel).await;
        }

        debug!("Removing {}", container.name());
        self.remove(id, self.options.remove_volumes).await
    }

    async fn start_container(&self, source: &Container) -> Result<NewContainer> {
        let mut config = source.build_create_config();
        let mut host_config = source.build_create_host_config();
        apply_host_config_policy(
            &mut host_config,
            self.kind,
            self.options.disable_memory_swappiness,
            self.options.cpu_copy_mode,
        );

        let plan = plan_networks(source, self.api);
        if self.api >= ApiVersion::MULTI_NETWORK_CREATE {
            config.mac_address = None;
        } else if plan.mac_address.is_some() {
            config.mac_address = plan.mac_address.clone();
        }
        config.host_config = Some(host_config);
        if !plan.create.is_empty() {
            config.networking_config = Some(NetworkingConfig {
                endpoints_config: plan.create,
            });
        }

        let name = source.name().to_string();
        info!("Creating {}", name);
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;
        for warning in &created.warnings {
            warn!("Runtime warning creating {}: {}", name, warning);
        }

        let docker = &self.docker;
        let new_id = created.id.as_str();
        connect_networks(
            &name,
            plan.connect,
            |network, endpoint| async move {
                let options = ConnectNetworkOptions {
                    container: new_id.to_string(),
                    endpoint_config: endpoint,
                };
                docker
                    .connect_network(&network, options)
                    .await
                    .map_err(Error::from)
            },
            || self.remove(new_id, false),
        )
        .await?;

        if !source.is_running() && !self.options.revive_stopped {
            debug!("{} was not running, leaving the new container stopped", name);
            return Ok(NewContainer {
                id: created.id,
                started: false,
            });
        }

        debug!("Starting {} ({})", name, &created.id[..created.id.len().min(12)]);
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(NewContainer {
            id: created.id,
            started: true,
        })
    }

    async fn rename_container(&self, container: &Container, new_name: &str) -> Result<()> {
        debug!("Renaming {} to {}", container.name(), new_name);
        self.docker
            .rename_container(
                container.id(),
                RenameContainerOptions {
                    name: new_name.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn start_exec(&self, container_id: &str, request: &ExecRequest) -> Result<String> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(request.cmd.clone()),
                    env: Some(request.env.clone()),
                    user: request.user.clone(),
                    tty: Some(request.tty),
                    attach_stdout: Some(false),
                    attach_stderr: Some(false),
                    ..Default::default()
                },
            )
            .await?;
        self.docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: true,
                    tty: request.tty,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(exec.id)
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus> {
        let details = self.docker.inspect_exec(exec_id).await?;
        Ok(ExecStatus {
            running: details.running.unwrap_or(false),
            exit_code: details.exit_code,
        })
    }

    async fn pull_image(
        &self,
        image_name: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<()> {
        let reference = ImageReference::parse(image_name);
        let options = CreateImageOptions {
            from_image: image_name.to_string(),
            ..Default::default()
        };
        let credentials = credentials.map(|c| c.to_docker_credentials(&reference.host));
        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("{}: {}", image_name, status);
                    }
                }
                Err(e) => return Err(pull_error(image_name, e)),
            }
        }
        Ok(())
    }

    async fn image_id(&self, image_name: &str) -> Result<String> {
        self.docker
            .inspect_image(image_name)
            .await?
            .id
            .ok_or_else(|| Error::NotFound(image_name.to_string()))
    }

    async fn remove_image_by_id(&self, image_id: &str, image_name: &str) -> Result<()> {
        info!("Removing image {} ({})", image_name, image_id);
        self.docker
            .remove_image(
                image_id,
                Some(RemoveImageOptions {
                    force: true,
                    noprune: false,
                }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn details(&self) -> Result<RuntimeDetails> {
        let version = self.docker.version().await?;
        let info = self.docker.info().await?;
        Ok(RuntimeDetails {
            name: info.name,
            server_version: info.server_version,
            api_version: version.api_version,
            registry_mirrors: info
                .registry_config
                .and_then(|r| r.mirrors)
                .unwrap_or_default(),
        })
    }
}

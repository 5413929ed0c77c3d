use std::time::Duration;

use async_trait::async_trait;
use bollard::models::HealthStatusEnum;
use log::debug;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::container::Container;
use crate::error::{Error, Result};
use crate::filters::Filter;
use crate::registry::RegistryCredentials;
use crate::types::CpuCopyMode;

pub mod docker;
pub mod network;
pub mod variant;

pub use docker::DockerRuntime;
pub use variant::RuntimeKind;

/// Tick for every poll loop against the runtime.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Options the gateway applies to every recreate and stop.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub remove_volumes: bool,
    pub include_stopped: bool,
    pub include_restarting: bool,
    pub revive_stopped: bool,
    pub disable_memory_swappiness: bool,
    pub cpu_copy_mode: CpuCopyMode,
}

/// Version and info fields consumed by runtime-variant detection.
#[derive(Debug, Clone, Default)]
pub struct RuntimeDetails {
    pub name: Option<String>,
    pub server_version: Option<String>,
    pub api_version: Option<String>,
    pub registry_mirrors: Vec<String>,
}

/// The container [`ContainerRuntime::start_container`] created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContainer {
    pub id: String,
    /// False when the source was stopped and stays stopped.
    pub started: bool,
}

/// An exec session to open inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecRequest {
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub user: Option<String>,
    pub tty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecStatus {
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// Everything the orchestrator needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Inspects every listed container passing `filter`; ghosts are skipped.
    async fn list_containers(&self, filter: &Filter) -> Result<Vec<Container>>;

    async fn get_container(&self, id: &str) -> Result<Container>;

    /// Stops the container with its stop signal, then removes it.
    async fn stop_container(
        &self,
        container: &Container,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Recreates `source` from its preserved config. The new container is
    /// only started when the source was running or revival is enabled.
    async fn start_container(&self, source: &Container) -> Result<NewContainer>;

    async fn rename_container(&self, container: &Container, new_name: &str) -> Result<()>;

    /// Opens and starts an exec session, returning its id.
    async fn start_exec(&self, container_id: &str, request: &ExecRequest) -> Result<String>;

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus>;

    async fn pull_image(
        &self,
        image_name: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<()>;

    /// Local image id for a reference.
    async fn image_id(&self, image_name: &str) -> Result<String>;

    async fn remove_image_by_id(&self, image_id: &str, image_name: &str) -> Result<()>;

    async fn details(&self) -> Result<RuntimeDetails>;

    /// Polls until the container reports healthy.
    ///
    /// Containers without a healthcheck count as healthy immediately.
    async fn wait_for_container_healthy(
        &self,
        id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let container = self.get_container(id).await?;
            if !container.has_healthcheck() {
                debug!("{} has no healthcheck, not waiting", container.name());
                return Ok(());
            }
            match container.health_status() {
                Some(HealthStatusEnum::HEALTHY) => return Ok(()),
                Some(HealthStatusEnum::UNHEALTHY) => {
                    return Err(Error::Unhealthy(container.name().to_string()))
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(Error::HealthTimeout(container.name().to_string(), timeout));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(POLL_INTERVAL) => {}
            }
        }
    }
}

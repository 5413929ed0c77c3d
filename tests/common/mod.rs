//! In-memory runtime and registry that record every call made against them.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bollard::models::{
    ContainerConfig, ContainerInspectResponse, ContainerState, ContainerStateStatusEnum, Health,
    HealthConfig, HealthStatusEnum, HostConfig, ImageInspect,
};
use tokio_util::sync::CancellationToken;

use watchtower::container::Container;
use watchtower::error::{Error, Result};
use watchtower::filters::Filter;
use watchtower::labels;
use watchtower::registry::{ImageReference, ManifestDigest, RegistryCredentials};
use watchtower::runtime::{ContainerRuntime, ExecRequest, ExecStatus, NewContainer, RuntimeDetails};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Stop(String),
    Start(String),
    Rename(String, String),
    Exec(String, String),
    Pull(String),
    RemoveImage(String),
}

#[derive(Default)]
struct State {
    containers: Vec<ContainerInspectResponse>,
    /// image reference -> local image id
    tags: HashMap<String, String>,
    images: HashMap<String, ImageInspect>,
    /// image reference -> (image id, digest) a pull makes local
    pulls: HashMap<String, (String, String)>,
    hook_exits: HashMap<String, i64>,
    hanging_hooks: HashSet<String>,
    execs: HashMap<String, (String, String)>,
    failing_starts: HashSet<String>,
    revive_stopped: bool,
    new_health: Option<HealthStatusEnum>,
    next_id: u64,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

pub fn image_id(n: u8) -> String {
    format!("sha256:{}", format!("{:x}", n % 16).repeat(64))
}

pub fn container_id(name: &str) -> String {
    let hex: String = name
        .bytes()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();
    format!("{:0<64}", hex)[..64].to_string()
}

fn labels_map(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
    if pairs.is_empty() {
        return None;
    }
    Some(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a local image under `reference` with the given repo digest.
    pub fn add_image(&self, reference: &str, id: &str, digest: &str) {
        let mut state = self.state.lock().unwrap();
        state.tags.insert(reference.to_string(), id.to_string());
        state.images.insert(id.to_string(), image_inspect(reference, id, digest));
    }

    /// Makes the next pull of `reference` produce image `id`.
    pub fn publish(&self, reference: &str, id: &str, digest: &str) {
        self.state
            .lock()
            .unwrap()
            .pulls
            .insert(reference.to_string(), (id.to_string(), digest.to_string()));
    }

    pub fn add_container(&self, name: &str, image: &str, labels: &[(&str, &str)]) -> String {
        let mut state = self.state.lock().unwrap();
        let id = container_id(name);
        let image_id = state.tags.get(image).cloned().unwrap_or_default();
        state.containers.push(ContainerInspectResponse {
            id: Some(id.clone()),
            name: Some(format!("/{}", name)),
            image: Some(image_id),
            config: Some(ContainerConfig {
                image: Some(image.to_string()),
                hostname: Some(id[..12].to_string()),
                labels: labels_map(labels),
                ..Default::default()
            }),
            host_config: Some(HostConfig::default()),
            state: Some(ContainerState {
                status: Some(ContainerStateStatusEnum::RUNNING),
                running: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        });
        id
    }

    pub fn set_healthcheck(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(info) = state.containers.iter_mut().find(|c| name_of(c) == name) {
            if let Some(config) = info.config.as_mut() {
                config.healthcheck = Some(HealthConfig {
                    test: Some(vec!["CMD".to_string(), "true".to_string()]),
                    ..Default::default()
                });
            }
        }
    }

    pub fn set_hook_exit(&self, name: &str, code: i64) {
        self.state
            .lock()
            .unwrap()
            .hook_exits
            .insert(name.to_string(), code);
    }

    pub fn set_hook_hangs(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .hanging_hooks
            .insert(name.to_string());
    }

    pub fn set_stopped(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(info) = state.containers.iter_mut().find(|c| name_of(c) == name) {
            info.state = Some(ContainerState {
                status: Some(ContainerStateStatusEnum::EXITED),
                running: Some(false),
                ..Default::default()
            });
        }
    }

    pub fn set_revive_stopped(&self, revive: bool) {
        self.state.lock().unwrap().revive_stopped = revive;
    }

    pub fn fail_start(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_starts
            .insert(name.to_string());
    }

    /// Health status reported by containers created from now on.
    pub fn set_new_health(&self, status: HealthStatusEnum) {
        self.state.lock().unwrap().new_health = Some(status);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Stop, start and rename calls only.
    pub fn replacements(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Stop(_) | Call::Start(_) | Call::Rename(..)))
            .collect()
    }

    pub fn image_of(&self, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .iter()
            .find(|c| name_of(c) == name)
            .and_then(|c| c.image.clone())
    }

    pub fn container_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.containers.iter().map(|c| name_of(c).to_string()).collect()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn build(&self, info: &ContainerInspectResponse) -> Result<Container> {
        let state = self.state.lock().unwrap();
        let image_info = info
            .image
            .as_ref()
            .and_then(|id| state.images.get(id))
            .cloned();
        Container::new(info.clone(), image_info)
    }
}

fn name_of(info: &ContainerInspectResponse) -> &str {
    info.name
        .as_deref()
        .unwrap_or_default()
        .trim_start_matches('/')
}

fn image_inspect(reference: &str, id: &str, digest: &str) -> ImageInspect {
    let repo = reference.rsplit_once(':').map_or(reference, |(r, _)| r);
    ImageInspect {
        id: Some(id.to_string()),
        repo_digests: Some(vec![format!("{}@{}", repo, digest)]),
        config: Some(ContainerConfig::default()),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self, filter: &Filter) -> Result<Vec<Container>> {
        let infos = self.state.lock().unwrap().containers.clone();
        let mut containers = Vec::new();
        for info in &infos {
            let container = self.build(info)?;
            if filter.matches(&container) {
                containers.push(container);
            }
        }
        Ok(containers)
    }

    async fn get_container(&self, id: &str) -> Result<Container> {
        let info = self
            .state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.id.as_deref() == Some(id))
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        self.build(&info)
    }

    async fn stop_container(
        &self,
        container: &Container,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.record(Call::Stop(container.name().to_string()));
        let mut state = self.state.lock().unwrap();
        state
            .containers
            .retain(|c| c.id.as_deref() != Some(container.id()));
        Ok(())
    }

    async fn start_container(&self, source: &Container) -> Result<NewContainer> {
        self.record(Call::Start(source.name().to_string()));
        let mut state = self.state.lock().unwrap();
        if state.failing_starts.contains(source.name()) {
            return Err(Error::Api {
                status: 500,
                message: "create failed".to_string(),
            });
        }
        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        let started = source.is_running() || state.revive_stopped;
        let mut info = source.inspect().clone();
        info.id = Some(id.clone());
        info.image = state.tags.get(&source.image_name()).cloned();
        info.name = Some(format!("/{}", source.name()));
        info.state = Some(ContainerState {
            status: Some(if started {
                ContainerStateStatusEnum::RUNNING
            } else {
                ContainerStateStatusEnum::CREATED
            }),
            running: Some(started),
            health: state.new_health.filter(|_| started).map(|status| Health {
                status: Some(status),
                ..Default::default()
            }),
            ..Default::default()
        });
        state.containers.push(info);
        Ok(NewContainer { id, started })
    }

    async fn rename_container(&self, container: &Container, new_name: &str) -> Result<()> {
        self.record(Call::Rename(
            container.name().to_string(),
            new_name.to_string(),
        ));
        let mut state = self.state.lock().unwrap();
        if let Some(info) = state
            .containers
            .iter_mut()
            .find(|c| c.id.as_deref() == Some(container.id()))
        {
            info.name = Some(format!("/{}", new_name));
        }
        Ok(())
    }

    async fn start_exec(&self, container_id: &str, request: &ExecRequest) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let name = state
            .containers
            .iter()
            .find(|c| c.id.as_deref() == Some(container_id))
            .map(|c| name_of(c).to_string())
            .ok_or_else(|| Error::NotFound(container_id.to_string()))?;
        let command = request.cmd.last().cloned().unwrap_or_default();
        state.calls.push(Call::Exec(name.clone(), command.clone()));
        let exec_id = format!("exec-{}", state.execs.len());
        state.execs.insert(exec_id.clone(), (name, command));
        Ok(exec_id)
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus> {
        let state = self.state.lock().unwrap();
        let (name, _) = state
            .execs
            .get(exec_id)
            .ok_or_else(|| Error::NotFound(exec_id.to_string()))?;
        if state.hanging_hooks.contains(name) {
            return Ok(ExecStatus {
                running: true,
                exit_code: None,
            });
        }
        Ok(ExecStatus {
            running: false,
            exit_code: Some(state.hook_exits.get(name).copied().unwrap_or(0)),
        })
    }

    async fn pull_image(
        &self,
        image_name: &str,
        _credentials: Option<&RegistryCredentials>,
    ) -> Result<()> {
        self.record(Call::Pull(image_name.to_string()));
        let mut state = self.state.lock().unwrap();
        if let Some((id, digest)) = state.pulls.remove(image_name) {
            state.tags.insert(image_name.to_string(), id.clone());
            let inspect = image_inspect(image_name, &id, &digest);
            state.images.insert(id, inspect);
        }
        Ok(())
    }

    async fn image_id(&self, image_name: &str) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .tags
            .get(image_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(image_name.to_string()))
    }

    async fn remove_image_by_id(&self, image_id: &str, _image_name: &str) -> Result<()> {
        self.record(Call::RemoveImage(image_id.to_string()));
        let mut state = self.state.lock().unwrap();
        match state.images.remove(image_id) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(image_id.to_string())),
        }
    }

    async fn details(&self) -> Result<RuntimeDetails> {
        Ok(RuntimeDetails::default())
    }
}

/// Registry serving fixed digests per image reference.
#[derive(Default)]
pub struct FakeRegistry {
    digests: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, image: &str, digest: &str) {
        self.digests
            .lock()
            .unwrap()
            .insert(ImageReference::parse(image).to_string(), digest.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManifestDigest for FakeRegistry {
    async fn remote_digest(
        &self,
        image: &ImageReference,
        _credentials: Option<&RegistryCredentials>,
    ) -> Result<String> {
        let key = image.to_string();
        self.requests.lock().unwrap().push(key.clone());
        self.digests
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::Registry(format!("no manifest for {}", key)))
    }
}

pub const WATCHTOWER_LABEL: (&str, &str) = (labels::WATCHTOWER, "true");

//! One sweep of the agent: classify every candidate, close the restart set
//! over the dependency graph, replace containers in dependency order and
//! garbage-collect the images they left behind.

use std::collections::{HashMap, HashSet};

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::container::Container;
use crate::dependency::{mark_linked_to_restarting, DependencyGraph};
use crate::error::{Error, Result};
use crate::filters::Filter;
use crate::lifecycle::LifecycleRunner;
use crate::registry::{CredentialSource, ManifestDigest};
use crate::runtime::ContainerRuntime;
use crate::staleness::StalenessOracle;
use crate::types::{ContainerReport, Outcome, SweepReport, UpdateParams};

pub struct Updater<'a> {
    runtime: &'a dyn ContainerRuntime,
    oracle: StalenessOracle<'a>,
}

impl<'a> Updater<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        registry: &'a dyn ManifestDigest,
        credentials: &'a dyn CredentialSource,
    ) -> Self {
        Self {
            runtime,
            oracle: StalenessOracle::new(runtime, registry, credentials),
        }
    }

    /// Runs one sweep over the containers matching `filter`.
    ///
    /// Per-container failures are recorded in the report and never stop the
    /// sweep. Only listing failures and cancellation return an error;
    /// replacements already committed stay in place.
    pub async fn update(
        &self,
        params: &UpdateParams,
        filter: &Filter,
        self_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SweepReport> {
        let mut sweep = Sweep {
            runtime: self.runtime,
            hooks: LifecycleRunner::new(self.runtime, params.lifecycle_hooks),
            params,
            self_id,
            cancel,
            report: SweepReport::default(),
            latest: HashMap::new(),
            old_images: Vec::new(),
            replaced: HashSet::new(),
            new_containers: Vec::new(),
        };

        let mut containers = self.runtime.list_containers(filter).await?;
        if let Some(own) = self_id.filter(|_| !params.self_update) {
            containers.retain(|c| c.id() != own);
        }
        debug!("Checking {} containers for updates", containers.len());

        for container in containers.iter_mut() {
            sweep.check_cancelled()?;
            sweep.classify(&self.oracle, container).await;
        }

        let graph = DependencyGraph::build(&containers);
        mark_linked_to_restarting(&mut containers, &graph);

        let order: Vec<usize> = graph
            .sorted(&containers)
            .into_iter()
            .filter(|&i| containers[i].to_restart())
            .collect();

        for &index in &order {
            let container = &containers[index];
            if !sweep.is_self(container) {
                sweep.hooks.pre_check(container, cancel).await;
            }
        }

        if params.rolling_restart {
            for &index in &order {
                sweep.check_cancelled()?;
                let container = &mut containers[index];
                if sweep.prepare(container).await? && sweep.stop(container).await? {
                    sweep.recreate(container).await?;
                }
            }
        } else {
            let mut stopped = Vec::new();
            for &index in order.iter().rev() {
                sweep.check_cancelled()?;
                let container = &mut containers[index];
                if sweep.prepare(container).await? && sweep.stop(container).await? {
                    stopped.push(index);
                }
            }
            for &index in stopped.iter().rev() {
                sweep.check_cancelled()?;
                sweep.recreate(&containers[index]).await?;
            }
        }

        for container in &sweep.new_containers {
            sweep.hooks.post_check(container, cancel).await;
        }

        if params.cleanup {
            let mut in_use: HashSet<String> = containers
                .iter()
                .filter(|c| !sweep.replaced.contains(c.id()))
                .map(|c| c.image_id().to_string())
                .collect();
            in_use.extend(sweep.new_containers.iter().map(|c| c.image_id().to_string()));
            sweep.cleanup_images(&in_use).await;
        }

        Ok(sweep.report)
    }
}

/// State owned by one sweep.
struct Sweep<'s> {
    runtime: &'s dyn ContainerRuntime,
    hooks: LifecycleRunner<'s>,
    params: &'s UpdateParams,
    self_id: Option<&'s str>,
    cancel: &'s CancellationToken,
    report: SweepReport,
    /// Newest image id per stale container id.
    latest: HashMap<String, String>,
    /// `(image id, image name)` of replaced containers, first occurrence only.
    old_images: Vec<(String, String)>,
    /// Ids of containers that were stopped and recreated.
    replaced: HashSet<String>,
    /// Fresh inspections of successfully recreated containers, own one excluded.
    new_containers: Vec<Container>,
}

impl Sweep<'_> {
    fn is_self(&self, container: &Container) -> bool {
        self.self_id == Some(container.id())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn record(
        &mut self,
        container: &Container,
        outcome: Outcome,
        new_image_id: Option<String>,
        error: Option<String>,
    ) {
        self.report.set(ContainerReport {
            id: container.id().to_string(),
            name: container.name().to_string(),
            image_name: container.image_name(),
            old_image_id: container.image_id().to_string(),
            new_image_id,
            outcome,
            error,
        });
    }

    async fn classify(&mut self, oracle: &StalenessOracle<'_>, container: &mut Container) {
        match oracle.check(container, self.params).await {
            Ok(staleness) if staleness.stale => {
                if let Err(e) = container.verify_configuration() {
                    warn!(
                        "Unable to update {}: {}. Proceeding to next.",
                        container.name(),
                        e
                    );
                    self.record(
                        container,
                        Outcome::Failed,
                        Some(staleness.latest_image_id),
                        Some(e.to_string()),
                    );
                    return;
                }
                container.mark_stale();
                self.latest
                    .insert(container.id().to_string(), staleness.latest_image_id);
                self.record(container, Outcome::Fresh, None, None);
            }
            Ok(_) => self.record(container, Outcome::Fresh, None, None),
            Err(e @ Error::PinnedImage(_)) => {
                debug!("Not checking {}: {}", container.name(), e);
                self.record(container, Outcome::Skipped, None, Some(e.to_string()));
            }
            Err(e) => {
                warn!("Unable to check {} for updates: {}", container.name(), e);
                self.record(container, Outcome::Failed, None, Some(e.to_string()));
            }
        }
    }

    /// Monitor-only check, pre-update hook and config verification.
    /// `Ok(false)` leaves the container untouched this sweep.
    async fn prepare(&mut self, container: &mut Container) -> Result<bool> {
        if container.is_monitor_only(self.params) {
            info!("{} is monitor-only, not updating", container.name());
            let latest = self.latest.get(container.id()).cloned();
            self.record(container, Outcome::Skipped, latest, None);
            return Ok(false);
        }

        if !self.is_self(container) {
            match self.hooks.pre_update(container, self.cancel).await {
                Ok(false) => {}
                Ok(true) => {
                    info!(
                        "Pre-update command of {} asked to skip this update",
                        container.name()
                    );
                    self.record(container, Outcome::Skipped, None, None);
                    return Ok(false);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    error!(
                        "Pre-update command of {} failed, not updating: {}",
                        container.name(),
                        e
                    );
                    self.record(container, Outcome::Failed, None, Some(e.to_string()));
                    return Ok(false);
                }
            }
        }

        if let Err(e) = container.verify_configuration() {
            warn!("Unable to update {}: {}", container.name(), e);
            self.record(container, Outcome::Failed, None, Some(e.to_string()));
            return Ok(false);
        }

        if !self.is_self(container)
            && !self
                .old_images
                .iter()
                .any(|(id, _)| id == container.image_id())
        {
            self.old_images
                .push((container.image_id().to_string(), container.image_name()));
        }
        Ok(true)
    }

    /// Stops and removes the container. The agent's own container is left
    /// running and renamed in [`Sweep::recreate`] instead.
    async fn stop(&mut self, container: &Container) -> Result<bool> {
        if self.is_self(container) {
            return Ok(true);
        }
        match self
            .runtime
            .stop_container(container, self.params.stop_timeout, self.cancel)
            .await
        {
            Ok(()) => Ok(true),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                error!("Unable to stop {}: {}", container.name(), e);
                self.record(container, Outcome::Failed, None, Some(e.to_string()));
                Ok(false)
            }
        }
    }

    async fn recreate(&mut self, container: &Container) -> Result<()> {
        let is_self = self.is_self(container);
        if is_self {
            let old_name = format!("{}-old-{}", container.name(), container.short_id());
            info!(
                "Renaming own container {} to {} before replacing it",
                container.name(),
                old_name
            );
            if let Err(e) = self.runtime.rename_container(container, &old_name).await {
                error!("Unable to rename {}: {}", container.name(), e);
                self.record(container, Outcome::Failed, None, Some(e.to_string()));
                return Ok(());
            }
        }

        self.replaced.insert(container.id().to_string());
        let created = match self.runtime.start_container(container).await {
            Ok(created) => created,
            Err(e) => {
                error!(
                    "Unable to start a replacement for {}, it stays removed: {}",
                    container.name(),
                    e
                );
                self.record(container, Outcome::Failed, None, Some(e.to_string()));
                return Ok(());
            }
        };
        let new_id = created.id;
        info!(
            "Replaced {} ({} -> {})",
            container.name(),
            container.short_id(),
            &new_id[..new_id.len().min(12)]
        );

        if let Some(timeout) = self.params.health_check_timeout.filter(|_| created.started) {
            match self
                .runtime
                .wait_for_container_healthy(&new_id, timeout, self.cancel)
                .await
            {
                Ok(()) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => warn!("{}", e),
            }
        }

        match self.runtime.get_container(&new_id).await {
            Ok(fresh) => {
                if !is_self && created.started {
                    self.hooks.post_update(&fresh, self.cancel).await;
                }
                self.record(
                    container,
                    Outcome::Updated,
                    Some(fresh.image_id().to_string()),
                    None,
                );
                if !is_self {
                    self.new_containers.push(fresh);
                }
            }
            Err(e) => {
                warn!("Could not inspect the new {}: {}", container.name(), e);
                let latest = self.latest.get(container.id()).cloned();
                self.record(container, Outcome::Updated, latest, None);
            }
        }
        Ok(())
    }

    async fn cleanup_images(&self, in_use: &HashSet<String>) {
        for (image_id, image_name) in &self.old_images {
            if in_use.contains(image_id) {
                debug!("Keeping {}, still in use", image_name);
                continue;
            }
            match self.runtime.remove_image_by_id(image_id, image_name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() || e.has_dependent_children() => {
                    debug!("Did not remove image {}: {}", image_name, e);
                }
                Err(e) => error!("Unable to remove image {}: {}", image_name, e),
            }
        }
    }
}

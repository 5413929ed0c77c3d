//! Watchtower agent entry point.

use env_logger::Env;
use log::{error, info, warn};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use watchtower::config::Config;
use watchtower::instances::cleanup_excess_instances;
use watchtower::registry::{RegistryClient, StaticCredentials};
use watchtower::runtime::variant::{detect_runtime, VariantProbe};
use watchtower::runtime::{ContainerRuntime, DockerRuntime};
use watchtower::self_id::{current_container_id, SelfIdSources};
use watchtower::update::Updater;
use watchtower::Error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let cfg = Config::load()?;

    // Initialize logging
    env_logger::Builder::from_env(Env::default().default_filter_or(cfg.log_level.as_str()))
        .init();
    info!(
        "Starting watchtower, checking every {}s{}",
        cfg.interval_secs,
        if cfg.run_once { " (once)" } else { "" }
    );

    // Container runtime
    let mut runtime = DockerRuntime::connect(cfg.client_options())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to container runtime: {}", e))?;
    let details = runtime.details().await?;
    let kind = detect_runtime(&VariantProbe::from_host(), &details);
    runtime.set_kind(kind);
    info!(
        "Runtime is {:?} {} (API {})",
        kind,
        details.server_version.as_deref().unwrap_or("(unknown version)"),
        details.api_version.as_deref().unwrap_or("unknown")
    );

    let registry = RegistryClient::new(cfg.http_timeout(), details.registry_mirrors.clone())?;
    let credentials = StaticCredentials(cfg.credentials());

    // Graceful Shutdown
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down...");
                shutdown.cancel();
            }
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
            }
        }
    });

    let self_id = match current_container_id(&runtime, &SelfIdSources::from_host()).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("{}, running without self-identification", e);
            None
        }
    };
    if let Some(id) = self_id.as_deref() {
        if let Err(e) = cleanup_excess_instances(
            &runtime,
            id,
            cfg.scope.as_deref(),
            cfg.cleanup,
            cfg.stop_timeout(),
            &cancel,
        )
        .await
        {
            error!("Unable to clean up excess instances: {}", e);
        }
    }

    let params = cfg.update_params();
    let filter = cfg.filter(self_id.as_deref());
    let updater = Updater::new(&runtime, &registry, &credentials);
    loop {
        match updater
            .update(&params, &filter, self_id.as_deref(), &cancel)
            .await
        {
            Ok(report) => info!("Sweep finished: {}", report),
            Err(Error::Cancelled) => break,
            Err(e) => error!("Sweep failed: {}", e),
        }
        if cfg.run_once {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(cfg.interval()) => {}
        }
    }

    info!("Shutdown complete.");
    Ok(())
}

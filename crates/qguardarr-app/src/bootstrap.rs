//! Service wiring and the binary's boot sequence.
//!
//! Assembles the qBittorrent client, the rollback journal and dry-run
//! store, the cycle orchestrator, the webhook ingress worker, and the
//! control-plane API, then runs them until the process is terminated.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use qguardarr_api::{ApiServer, ApiState, OrchestratorHandle, WebhookSink};
use qguardarr_client::ReqwestQbittorrentClient;
use qguardarr_config::{ConfigLoader, QguardarrConfig};
use qguardarr_data::{DryRunStore, RollbackJournal};
use qguardarr_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics};
use tracing::{info, warn};

use crate::cross_seed::CrossSeedForwarder;
use crate::error::{AppError, AppResult};
use crate::orchestrator::CycleOrchestrator;
use crate::webhook::WebhookHooks;

const CONFIG_WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// How long a restored rollback entry is kept before the maintenance task
/// purges it, mirroring the original implementation's 30-day retention.
const ROLLBACK_RETENTION_SECONDS: f64 = 30.0 * 24.0 * 60.0 * 60.0;

/// Interval between rollback-journal maintenance passes (export, cleanup,
/// vacuum).
const ROLLBACK_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default configuration file path when `QGUARDARR_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "./qguardarr.toml";

/// Dependencies required to bootstrap the qguardarr application.
pub(crate) struct BootstrapDependencies {
    config_path: PathBuf,
    config: QguardarrConfig,
    metrics: Arc<Metrics>,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the binary entrypoint.
    pub(crate) async fn from_env() -> AppResult<Self> {
        let config_path =
            PathBuf::from(std::env::var("QGUARDARR_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()));

        let mut loader = ConfigLoader::new(&config_path);
        let config = loader.load().map_err(|err| AppError::config("config_loader.load", err))?;

        let metrics = Arc::new(Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?);

        Ok(Self { config_path, config, metrics })
    }
}

/// Entry point for the qguardarr application boot sequence.
///
/// # Errors
///
/// Returns an error if dependency construction or application startup fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env().await?;
    Box::pin(run_app_with(dependencies)).await
}

/// Boot sequence that relies entirely on injected dependencies to simplify testing.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    let BootstrapDependencies { config_path, config, metrics } = dependencies;

    let logging = logging_config(&config);
    let _log_guard =
        qguardarr_telemetry::init_logging(&logging).map_err(|err| AppError::data("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("bootstrap");

    info!("qguardarr application bootstrap starting");

    let client = Arc::new(
        ReqwestQbittorrentClient::new(config.qbittorrent.clone())
            .map_err(|err| AppError::client("qbittorrent_client.new", err))?,
    );

    let journal = Arc::new(
        RollbackJournal::open(Path::new(&config.rollback.database_path))
            .await
            .map_err(|err| AppError::data("rollback_journal.open", err))?,
    );
    let dry_run_store = Arc::new(
        DryRunStore::load(Path::new(&config.global.dry_run_store_path))
            .await
            .map_err(|err| AppError::data("dry_run_store.load", err))?,
    );

    let cross_seed = Arc::new(
        CrossSeedForwarder::new(config.cross_seed.clone(), Arc::clone(&metrics))
            .map_err(|err| AppError::data("cross_seed_forwarder.new", anyhow::Error::new(err)))?,
    );
    let (webhook_ingress, webhook_receiver) = crate::webhook::channel(Arc::clone(&metrics));
    let webhook_counters = webhook_ingress.counters_handle();

    let orchestrator = Arc::new(CycleOrchestrator::new(
        &config,
        Arc::clone(&client),
        Arc::clone(&journal),
        dry_run_store,
        Arc::clone(&metrics),
        Arc::clone(&cross_seed),
        webhook_ingress.clone(),
    )?);

    let webhook_worker = tokio::spawn(crate::webhook::run_worker(
        webhook_receiver,
        Arc::clone(&orchestrator) as Arc<dyn WebhookHooks>,
        cross_seed,
        Arc::clone(&metrics),
        webhook_counters,
    ));

    let cycle_task = spawn_cycle_task(Arc::clone(&orchestrator));
    let config_task = spawn_config_watch_task(ConfigLoader::new(&config_path), Arc::clone(&orchestrator));
    let rollback_maintenance_task =
        spawn_rollback_maintenance_task(Arc::clone(&journal), Arc::clone(&metrics), config.rollback.database_path.clone());

    let api_config_loader = ConfigLoader::new(&config_path);
    let state = ApiState::new(
        Some(Arc::clone(&orchestrator) as Arc<dyn OrchestratorHandle>),
        Arc::new(webhook_ingress) as Arc<dyn WebhookSink>,
        Arc::clone(&metrics),
        api_config_loader,
    );

    let addr = SocketAddr::new(
        config.global.host.parse().map_err(|_| AppError::InvalidConfig {
            field: "global.host",
            reason: "not_an_ip_address",
            value: Some(config.global.host.clone()),
        })?,
        config.global.port,
    );

    let api = ApiServer::new(state);
    info!(%addr, "launching api listener");
    let serve_result = api.serve(addr).await;

    cycle_task.abort();
    config_task.abort();
    webhook_worker.abort();
    rollback_maintenance_task.abort();

    serve_result.map_err(|err| AppError::api_server("api_server.serve", err))?;
    info!("api server shutdown complete");
    Ok(())
}

fn logging_config(config: &QguardarrConfig) -> LoggingConfig<'_> {
    LoggingConfig {
        level: &config.logging.level,
        format: LogFormat::infer(),
        build_sha: qguardarr_telemetry::build_sha(),
        file: Some(config.logging.file.as_str()).filter(|path| !path.is_empty()).map(Path::new),
    }
}

fn spawn_cycle_task<C: qguardarr_client::QbittorrentClient + 'static>(
    orchestrator: Arc<CycleOrchestrator<C>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(orchestrator.update_interval().max(1)));
        ticker.tick().await; // first tick fires immediately; skip it so startup has a moment to settle
        loop {
            ticker.tick().await;
            orchestrator.run_cycle_tick().await;
        }
    })
}

/// Periodically export unrestored rollback entries to a JSON file alongside
/// the journal, purge restored entries older than the retention window, and
/// vacuum the database to reclaim the space.
fn spawn_rollback_maintenance_task(
    journal: Arc<RollbackJournal>,
    metrics: Arc<Metrics>,
    database_path: String,
) -> tokio::task::JoinHandle<()> {
    let export_path = format!("{database_path}.export.json");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ROLLBACK_MAINTENANCE_INTERVAL);
        ticker.tick().await; // first tick fires immediately; skip it, there's nothing to clean up yet
        loop {
            ticker.tick().await;
            run_rollback_maintenance(&journal, &metrics, &export_path).await;
        }
    })
}

async fn run_rollback_maintenance(journal: &RollbackJournal, metrics: &Metrics, export_path: &str) {
    match journal.export_unrestored().await {
        Ok(entries) => match serde_json::to_vec_pretty(&entries) {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(export_path, bytes).await {
                    warn!(%err, export_path, "failed to write rollback export file");
                }
            }
            Err(err) => warn!(%err, "failed to serialize unrestored rollback entries"),
        },
        Err(err) => warn!(%err, "failed to export unrestored rollback entries"),
    }

    let cutoff = now_epoch_f64() - ROLLBACK_RETENTION_SECONDS;
    match journal.cleanup_older_than(cutoff).await {
        Ok(removed) if removed > 0 => {
            info!(removed, "purged old restored rollback entries");
            if let Err(err) = journal.vacuum().await {
                warn!(%err, "failed to vacuum rollback database after cleanup");
            }
        }
        Ok(_) => {}
        Err(err) => warn!(%err, "failed to clean up old rollback entries"),
    }

    match journal.stats().await {
        Ok(stats) => metrics.set_rollback_entries_pending(stats.unrestored_entries),
        Err(err) => warn!(%err, "failed to read rollback journal stats"),
    }
}

fn now_epoch_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn spawn_config_watch_task<C: qguardarr_client::QbittorrentClient + 'static>(
    loader: ConfigLoader,
    orchestrator: Arc<CycleOrchestrator<C>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        qguardarr_config::watch(loader, CONFIG_WATCH_INTERVAL, move |new_config| {
            if let Err(err) = orchestrator.apply_config(&new_config) {
                warn!(%err, "failed to apply reloaded configuration, keeping previous tracker matcher");
            } else {
                info!("applied reloaded configuration");
            }
        })
        .await;
    })
}

#[cfg(test)]
mod tests {
    use qguardarr_config::{
        AllocationStrategy, CrossSeedSettings, GlobalSettings, LoggingSettings, QbittorrentSettings,
        RollbackSettings, TrackerConfig,
    };

    use super::*;

    fn config() -> QguardarrConfig {
        QguardarrConfig {
            global: GlobalSettings {
                update_interval: 300,
                active_torrent_threshold_kb: 10,
                max_api_calls_per_cycle: 500,
                differential_threshold: 0.2,
                rollout_percentage: 100,
                cache_ttl_seconds: 1_800,
                max_managed_torrents: 1_000,
                allocation_strategy: AllocationStrategy::Equal,
                borrow_threshold_ratio: 0.8,
                max_borrow_fraction: 0.5,
                smoothing_alpha: 0.3,
                min_effective_delta: 0.05,
                dry_run: true,
                dry_run_store_path: String::new(),
                auto_unlimit_on_inactive: false,
                host: "127.0.0.1".to_string(),
                port: 8089,
            },
            qbittorrent: QbittorrentSettings {
                host: "localhost".to_string(),
                port: 8080,
                username: "admin".to_string(),
                password: "admin".to_string(),
                timeout_secs: 30,
            },
            cross_seed: CrossSeedSettings::default(),
            trackers: vec![TrackerConfig {
                id: "catch-all".to_string(),
                name: "Catch All".to_string(),
                pattern: ".*".to_string(),
                max_upload_speed: -1,
                priority: 1,
            }],
            rollback: RollbackSettings::default(),
            logging: LoggingSettings::default(),
        }
    }

    #[test]
    fn logging_config_disables_file_when_path_is_empty() {
        let mut sample = config();
        sample.logging.file = String::new();
        assert!(logging_config(&sample).file.is_none());

        sample.logging.file = "/tmp/qguardarr.log".to_string();
        assert_eq!(logging_config(&sample).file, Some(Path::new("/tmp/qguardarr.log")));
    }
}

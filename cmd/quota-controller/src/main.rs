mod seed;

use clap::Parser;
use pkg_constants::controller::{
    DEFAULT_WORKERS, NAMESPACE_RESYNC_SECS, PROFILE_RESYNC_SECS, REQUEUE_DELAY_SECS,
};
use pkg_constants::paths::{DEFAULT_CONFIG, DEFAULT_DATA_DIR};
use pkg_controllers::{ControllerSettings, NamespaceController, QuotaProfileController};
use pkg_state::Registry;
use pkg_state::client::StateStore;
use pkg_types::config::{ControllerConfigFile, LogFormat, load_config_file};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "quota-controller", about = "Quota profile controller")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Maximum concurrent passes per controller
    #[arg(long)]
    workers: Option<usize>,

    /// Seconds between full namespace resyncs
    #[arg(long)]
    namespace_resync_secs: Option<u64>,

    /// Seconds between full quota profile resyncs
    #[arg(long)]
    profile_resync_secs: Option<u64>,

    /// Seconds before a failed pass is retried
    #[arg(long)]
    requeue_delay_secs: Option<u64>,

    /// Log output format (text or json)
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    /// Multi-document YAML of namespaces and quota profiles to load on start-up
    #[arg(long)]
    seed: Option<String>,
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    match value {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format '{other}' (expected text or json)")),
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: ControllerConfigFile = load_config_file(&cli.config)?;

    // Merge: CLI args > config file > defaults
    let log_format = cli.log_format.or(file_cfg.log_format).unwrap_or_default();
    init_tracing(log_format);
    info!("Config file: {}", cli.config);

    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    let workers = cli.workers.or(file_cfg.workers).unwrap_or(DEFAULT_WORKERS);
    let requeue_delay = Duration::from_secs(
        cli.requeue_delay_secs
            .or(file_cfg.requeue_delay_secs)
            .unwrap_or(REQUEUE_DELAY_SECS),
    );
    let namespace_settings = ControllerSettings {
        resync: Duration::from_secs(
            cli.namespace_resync_secs
                .or(file_cfg.namespace_resync_secs)
                .unwrap_or(NAMESPACE_RESYNC_SECS),
        ),
        requeue_delay,
        workers,
    };
    let profile_settings = ControllerSettings {
        resync: Duration::from_secs(
            cli.profile_resync_secs
                .or(file_cfg.profile_resync_secs)
                .unwrap_or(PROFILE_RESYNC_SECS),
        ),
        requeue_delay,
        workers,
    };
    let seed_manifest = cli.seed.or(file_cfg.seed_manifest);

    info!("Starting quota-controller");
    info!("  Data dir:  {}", data_dir);
    info!("  Workers:   {}", workers);
    info!(
        "  Resync:    namespaces {}s, profiles {}s",
        namespace_settings.resync.as_secs(),
        profile_settings.resync.as_secs()
    );

    let store = StateStore::new(&data_dir).await?;
    let registry = Registry::new(store.clone());

    seed::seed_namespaces(&registry).await?;
    if let Some(path) = seed_manifest {
        let loaded = seed::load_manifest(&registry, &path).await?;
        info!("Seeded {} objects from {}", loaded, path);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = vec![
        NamespaceController::new(registry.clone(), namespace_settings).start(shutdown_rx.clone()),
        QuotaProfileController::new(registry, profile_settings).start(shutdown_rx),
    ];

    info!("Controller is running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down quota-controller");

    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Controller task ended abnormally: {}", e);
        }
    }
    store.close().await?;

    Ok(())
}

//! flipperd: the Flipper daemon.
//!
//! Assembles the rollout engine and the scheduler over one of two backends:
//! - a Kubernetes cluster (`RollingUpdate` resources, `apps/v1` Deployments)
//! - a local redb store seeded from a TOML manifest
//!
//! # Usage
//!
//! ```text
//! flipperd run --namespace default
//! flipperd standalone --data-dir /var/lib/flipper --manifest flipper-manifest.toml
//! flipperd crd | kubectl apply -f -
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flipper_core::{ControllerConfig, RecordStore, Shutdown, SystemClock, WorkloadStore};
use flipper_kube::{KubeStore, RollingUpdate, watch_records};
use flipper_rollout::{EngineConfig, RolloutEngine};
use flipper_scheduler::Scheduler;
use flipper_state::{Manifest, StateStore};

const DEFAULT_FILTER: &str = "info,flipperd=debug,flipper=debug";

#[derive(Parser)]
#[command(name = "flipperd", about = "Flipper restart controller")]
struct Cli {
    /// Controller configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Override `controller.identity`.
    #[arg(long, global = true)]
    identity: Option<String>,

    /// Override `scheduler.max_concurrent`.
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile RollingUpdate resources in the current cluster.
    Run {
        /// Only manage records in this namespace.
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Reconcile records held in a local store.
    Standalone {
        /// Data directory for the store.
        #[arg(long, default_value = "/var/lib/flipper")]
        data_dir: PathBuf,

        /// Records and workloads to load before starting.
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Print the RollingUpdate CustomResourceDefinition as JSON.
    Crd,

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli)?;

    match cli.command {
        Command::Run { namespace } => run_cluster(config, namespace).await,
        Command::Standalone { data_dir, manifest } => {
            run_standalone(config, &data_dir, manifest.as_deref()).await
        }
        Command::Crd => {
            println!("{}", serde_json::to_string_pretty(&RollingUpdate::crd())?);
            Ok(())
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(cli: &Cli) -> anyhow::Result<ControllerConfig> {
    let mut config = match &cli.config {
        Some(path) => ControllerConfig::from_file(path)?,
        None => ControllerConfig::default(),
    };
    if let Some(identity) = &cli.identity {
        config.controller.identity = identity.clone();
    }
    if let Some(max) = cli.max_concurrent {
        config.scheduler.max_concurrent = max;
    }
    config.validate()?;
    Ok(config)
}

fn build_scheduler(
    workloads: Arc<dyn WorkloadStore>,
    records: Arc<dyn RecordStore>,
    config: &ControllerConfig,
) -> anyhow::Result<Scheduler> {
    let engine = RolloutEngine::new(
        workloads,
        records.clone(),
        Arc::new(SystemClock),
        EngineConfig::from(config),
    );
    info!(
        identity = %config.controller.identity,
        retry_attempts = config.retry.attempts,
        "rollout engine initialized"
    );
    Ok(Scheduler::new(
        Arc::new(engine),
        records,
        config.scheduler.clone(),
    )?)
}

async fn run_cluster(config: ControllerConfig, namespace: Option<String>) -> anyhow::Result<()> {
    info!(namespace = namespace.as_deref().unwrap_or("*"), "flipperd starting against cluster");

    let store = Arc::new(KubeStore::try_default(namespace).await?);
    let scheduler = build_scheduler(store.clone(), store.clone(), &config)?;
    let handle = scheduler.handle();

    let (shutdown_tx, shutdown) = Shutdown::channel();

    let watch_handle = tokio::spawn(watch_records(
        store.records(),
        move |reference| {
            // Fails only once the scheduler has stopped.
            let _ = handle.enqueue(reference);
        },
        shutdown.clone(),
    ));
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = watch_handle.await;
    let _ = scheduler_handle.await;

    info!("flipperd stopped");
    Ok(())
}

/// Open the on-disk store under `data_dir` and load `manifest` into it.
fn open_standalone(data_dir: &Path, manifest: Option<&Path>) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("flipper.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    if let Some(path) = manifest {
        Manifest::from_file(path)?.apply(&store)?;
        info!(path = ?path, "manifest loaded");
    }
    Ok(store)
}

async fn run_standalone(
    config: ControllerConfig,
    data_dir: &Path,
    manifest: Option<&Path>,
) -> anyhow::Result<()> {
    info!("flipperd starting in standalone mode");

    let store = Arc::new(open_standalone(data_dir, manifest)?);
    let scheduler = build_scheduler(store.clone(), store, &config)?;

    let (shutdown_tx, shutdown) = Shutdown::channel();
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;

    info!("flipperd stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_overrides_win_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[controller]\nidentity = \"from-file\"\n[scheduler]\nmax_concurrent = 2").unwrap();

        let path = file.path().to_str().unwrap();
        let cli = Cli::parse_from([
            "flipperd",
            "--config",
            path,
            "--max-concurrent",
            "8",
            "crd",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.controller.identity, "from-file");
        assert_eq!(config.scheduler.max_concurrent, 8);

        let cli = Cli::parse_from(["flipperd", "--config", path, "--identity", "cli", "crd"]);
        assert_eq!(load_config(&cli).unwrap().controller.identity, "cli");
    }

    #[test]
    fn invalid_override_is_rejected() {
        let cli = Cli::parse_from(["flipperd", "--max-concurrent", "0", "config"]);
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn standalone_subcommand_parses() {
        let cli = Cli::parse_from([
            "flipperd",
            "standalone",
            "--data-dir",
            "/tmp/flipper",
            "--manifest",
            "m.toml",
            "--log-json",
        ]);
        assert!(cli.log_json);
        match cli.command {
            Command::Standalone { data_dir, manifest } => {
                assert_eq!(data_dir, PathBuf::from("/tmp/flipper"));
                assert_eq!(manifest, Some(PathBuf::from("m.toml")));
            }
            _ => panic!("expected standalone"),
        }
    }

    #[test]
    fn standalone_store_loads_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.toml");
        std::fs::write(
            &manifest,
            r#"
[[records]]
namespace = "default"
name = "nightly"
spec = { matchLabels = { app = "web" }, interval = "12h" }

[[workloads]]
namespace = "default"
name = "web"
labels = { app = "web" }
"#,
        )
        .unwrap();

        let data = dir.path().join("data");
        let store = open_standalone(&data, Some(&manifest)).unwrap();
        assert!(data.join("flipper.redb").exists());
        assert_eq!(store.list_records().unwrap().len(), 1);
        assert!(store.get_workload("default/web").unwrap().is_some());
    }
}

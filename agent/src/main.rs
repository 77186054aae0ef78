mod cli;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use peanut::api::{self, ApiState};
use peanut::config::{load_config, AgentConfig, FALLBACK_NAMESPACE};
use peanut::gitops::sync_scheduler::{self, SyncScheduler};
use peanut::gitops::{KubeClient, KubectlEngine, ReconciliationLoop, RepositoryTracker};
use peanut::history::SyncHistoryRing;
use peanut::metrics::PrometheusMetrics;
use prometheus::Registry;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

use cli::{Cli, LogFormat};

fn init_logging(format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => {
            tracing::subscriber::set_global_default(registry.with(tracing_subscriber::fmt::layer()))?
        }
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().json()),
        )?,
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<AgentConfig, peanut::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AgentConfig::default(),
    };
    cli.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}

/// Working copy location; a temp dir is kept alive by the returned guard.
fn work_dir(config: &AgentConfig) -> std::io::Result<(PathBuf, Option<TempDir>)> {
    match &config.work_dir {
        Some(dir) => Ok((dir.clone(), None)),
        None => {
            let temp = tempfile::Builder::new().prefix("peanut-").tempdir()?;
            Ok((temp.path().join("repo"), Some(temp)))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Starting peanut-engine v{}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AgentConfig) -> peanut::Result<()> {
    let client = KubeClient::new(config.kubectl.clone())
        .with_kubeconfig(config.kubeconfig.clone())
        .with_context(config.context.clone());

    let namespace = if config.namespace.is_empty() {
        match client.current_namespace().await {
            Some(ns) => ns,
            None => {
                info!("No namespace configured, using '{}'", FALLBACK_NAMESPACE);
                FALLBACK_NAMESPACE.to_string()
            }
        }
    } else {
        config.namespace.clone()
    };
    info!(
        "Tracking {} ({}) path '{}' into namespace '{}' (namespaced: {}, prune: {})",
        config.repository.url,
        config.repository.branch,
        config.repository.path,
        namespace,
        config.namespaced,
        config.prune
    );

    let registry = Registry::new();
    let metrics = Arc::new(PrometheusMetrics::new("peanut", &registry)?);
    let history = Arc::new(SyncHistoryRing::new(config.history_size));
    let (trigger, shutdown, receiver) = sync_scheduler::channel();

    let (path, temp_dir) = work_dir(&config)?;
    let parser = config.parser.build(&config.kustomize, config.git_timeout());
    let mut tracker = RepositoryTracker::new(config.repository.clone(), parser)
        .with_git_timeout(config.git_timeout());
    if path.join(".git").exists() {
        tracker.open(&path).await?;
        info!("Opened existing working copy at {}", path.display());
    } else {
        let head = tracker.clone(&path).await?;
        info!("Cloned {} at {}", config.repository.url, head.short());
    }

    let engine = Arc::new(KubectlEngine::new(client));
    let reconciler = ReconciliationLoop::new(
        tracker,
        engine,
        Arc::clone(&history),
        metrics,
        config.reconciler_config(namespace),
    );

    let handler_shutdown = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutdown requested");
        handler_shutdown.trigger();
    }) {
        warn!("Failed to install signal handler: {}", e);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            shutdown.trigger();
            return Err(e.into());
        }
    };

    let loop_task = tokio::spawn(reconciler.run(receiver));
    let timer = SyncScheduler::new(trigger.clone(), config.resync_interval(), shutdown.subscribe())
        .spawn();
    let router = api::router(ApiState {
        history,
        trigger,
        registry,
    });
    let server = tokio::spawn(api::serve(listener, router, shutdown.subscribe()));

    if let Err(e) = loop_task.await {
        error!("Reconciliation loop panicked: {}", e);
    }
    // A loop that stopped on its own still has to take the server down
    shutdown.trigger();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("HTTP server failed: {}", e),
        Err(e) => error!("HTTP server task panicked: {}", e),
    }
    if let Err(e) = timer.await {
        warn!("Resync timer task failed: {}", e);
    }

    if let Some(temp) = temp_dir {
        if let Err(e) = temp.close() {
            warn!("Failed to remove temporary working copy: {}", e);
        }
    }

    info!("peanut-engine stopped");
    Ok(())
}

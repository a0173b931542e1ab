//! relayer-fleet - supervisor for a fleet of IBC relayer instances
//!
//! Every chain pair with an open channel gets its own workspace under the
//! home folder, its own REST/telemetry port pair and its own detached relayer
//! process tracked by a PID file. Daemon mode repeats fleet maintenance tasks
//! on a schedule.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

mod api;
mod cli;
mod config;
mod daemon;
mod error;
mod fleet;
mod metrics;
mod ports;
mod proxy;
mod registry;
mod supervisor;
mod workspace;

use cli::{Cli, Command, DaemonKind};
use config::Settings;
use daemon::{
    ChannelsTask, CommandTask, Daemon, DaemonStatus, DaemonTask, DaemonTimings, FleetRestartTask,
    ProxyTask,
};
use error::FleetError;
use fleet::{Fleet, InitOptions, Selector};
use metrics::MetricsServer;
use proxy::ProxyUpdater;
use supervisor::{StartOutcome, StopOutcome};
use workspace::{ScriptGenerator, WorkspaceManager};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // FleetError messages already carry their cause
            match e.downcast_ref::<FleetError>() {
                Some(fleet_error) => {
                    eprintln!("ERROR: {}", fleet_error);
                    ExitCode::from(fleet_error.exit_code())
                }
                None => {
                    eprintln!("ERROR: {:#}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let home = cli.home()?;

    let daemon_log = match &cli.command {
        Command::Daemon { kind } => Some((home.join("logs"), kind.as_str())),
        _ => None,
    };
    let _log_guard = init_logging(daemon_log)?;

    let settings = Settings::load(&home)?;
    info!("Using home folder: {:?}", home);

    match cli.command {
        Command::Init { force } => {
            let fleet = Fleet::from_settings(&home, &settings);
            let manager = script_manager(&home, &settings)?;
            fleet
                .init(
                    &manager,
                    InitOptions {
                        force,
                        only_missing: false,
                    },
                )
                .await?;
        }

        Command::InitOne { chain, force } => {
            let fleet = Fleet::from_settings(&home, &settings);
            let manager = script_manager(&home, &settings)?;
            let workspace = fleet.init_one(&manager, &chain, force).await?;
            info!("Workspace ready at {:?}", workspace.root());
        }

        Command::Start { all, proxy, pair } => {
            let selector = match pair.start_selector(all) {
                Some(selector) => selector,
                None => {
                    warn!("Nothing selected, pass --all or --src and --dst");
                    return Ok(());
                }
            };

            let fleet = Fleet::from_settings(&home, &settings);
            fleet.start(&selector, proxy).await?;
        }

        Command::StartOne { chain, proxy } => {
            let fleet = Fleet::from_settings(&home, &settings);
            match fleet.start_one(&chain, proxy).await? {
                StartOutcome::Started { pid } => info!("Started {} with PID {}", chain, pid),
                StartOutcome::AlreadyRunning { pid } => {
                    info!("{} already running with PID {}", chain, pid)
                }
            }
        }

        Command::Stop { pair } => {
            let selector = pair.selector().unwrap_or(Selector::All);
            let fleet = Fleet::from_settings(&home, &settings);
            let report = fleet.stop(&selector).await?;
            for (id, pid) in &report.changed {
                println!("PID: {} ({})", pid, id);
            }
        }

        Command::StopOne { chain } => {
            let fleet = Fleet::from_settings(&home, &settings);
            match fleet.stop_one(&chain).await? {
                StopOutcome::Stopped { pid } => info!("Stopped {} (PID {})", chain, pid),
                StopOutcome::NotRunning => info!("{} is not running", chain),
            }
        }

        Command::Show => {
            let fleet = Fleet::from_settings(&home, &settings);
            let running = fleet.show()?;
            for instance in &running {
                println!("PID: {} ({})", instance.pid, instance.id);
            }
            println!("{}", "-".repeat(40));
            info!("Total {} running instances", running.len());
        }

        Command::Channels { chain } => {
            let fleet = Fleet::from_settings(&home, &settings);
            let record = fleet.channels(&chain)?;
            println!("Source chain: {}", record.source_chain_id);
            for target in record.sorted_target_ids() {
                println!("  {}", target);
            }
        }

        Command::Config { chain } => {
            let fleet = Fleet::from_settings(&home, &settings);
            let summary = fleet.describe_chain(&chain)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to render chain")?
            );
        }

        Command::ProxyUpdate => {
            ProxyUpdater::from_settings(&settings, &home)?.update()?;
        }

        Command::Daemon { kind } => run_daemon(kind, &home, &settings).await?,
    }

    Ok(())
}

fn script_manager(home: &Path, settings: &Settings) -> Result<WorkspaceManager<ScriptGenerator>> {
    let generator = ScriptGenerator::locate(&settings.generator_path(home))?;
    Ok(WorkspaceManager::new(generator))
}

async fn run_daemon(kind: DaemonKind, home: &Path, settings: &Settings) -> Result<()> {
    let fleet = Arc::new(Fleet::from_settings(home, settings));
    let config = &settings.daemon;

    let task: Arc<dyn DaemonTask> = match kind {
        DaemonKind::Fleet => Arc::new(FleetRestartTask::new(
            fleet.clone(),
            Duration::from_secs(config.fleet_restart_pause_secs),
        )),
        DaemonKind::Registry => Arc::new(CommandTask::new(
            kind.as_str(),
            &config.registry_refresh_command,
            home,
        )?),
        DaemonKind::Channels => {
            let discovery = if config.channel_discovery_command.is_empty() {
                warn!("daemon.channel_discovery_command is not set, only creating missing workspaces");
                None
            } else {
                Some(CommandTask::new(
                    kind.as_str(),
                    &config.channel_discovery_command,
                    home,
                )?)
            };
            Arc::new(ChannelsTask::new(
                discovery,
                fleet.clone(),
                script_manager(home, settings)?,
            ))
        }
        DaemonKind::Proxy => Arc::new(ProxyTask::new(ProxyUpdater::from_settings(settings, home)?)),
    };

    let interval_secs = match kind {
        DaemonKind::Fleet => config.fleet_interval_secs,
        DaemonKind::Registry => config.registry_interval_secs,
        DaemonKind::Channels => config.channels_interval_secs,
        DaemonKind::Proxy => config.proxy_interval_secs,
    };

    let status = DaemonStatus::new();

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start API server
    let api_handle = if settings.api.enabled {
        let state = api::AppState {
            daemon: kind.as_str().to_string(),
            instances: fleet.clone(),
            status: status.clone(),
            started_at: Utc::now(),
        };
        let api_config = settings.api.clone();
        info!("API server: http://{}:{}", api_config.host, api_config.port);
        Some(tokio::spawn(async move {
            if let Err(e) = api::run_server(api_config, state).await {
                error!("API server error: {}", e);
            }
        }))
    } else {
        None
    };

    Daemon::new(
        task,
        DaemonTimings::from_config(config, interval_secs),
        status,
    )
    .run(shutdown_signal())
    .await;

    if let Some(h) = api_handle {
        h.abort();
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Daemon {} exited", kind.as_str());
    Ok(())
}

/// Console logging, plus a daily rolling file when running as a daemon
fn init_logging(daemon_log: Option<(PathBuf, &str)>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,relayer_fleet=debug,hyper=warn"));

    let (file_layer, guard) = match daemon_log {
        Some((dir, name)) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log folder {:?}", dir))?;
            let appender = tracing_appender::rolling::daily(&dir, format!("{}.log", name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping...");
}

//! node_pulse - Blockchain Node Health Probe
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌────────────┐   ┌──────────────┐
//! │ Directory │──▶│ Dispatcher │──▶│ RPC node   │   │ probe_records│
//! │ (planets) │   │ (per min)  │   │ (submit)   │   │ (dashboard)  │
//! └───────────┘   └─────┬──────┘   └────────────┘   └──────▲───────┘
//!                       │ TEMP -> PENDING                   │
//!                       ▼                                   │
//!                 ┌────────────┐   ┌────────────┐           │
//!                 │ Reconciler │──▶│ checking   │───────────┘
//!                 │ (per 30s)  │   │ node       │ COMPLETED / DELAYED / FAILED
//!                 └────────────┘   └────────────┘
//! ```
//!
//! Usage: `node_pulse [--env dev] [--once] [--memory-store]`

use anyhow::Context;
use node_pulse::config::AppConfig;
use node_pulse::{ProbeApp, scheduler};
use tokio::sync::watch;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn use_once_mode() -> bool {
    std::env::args().any(|a| a == "--once")
}

fn use_memory_store() -> bool {
    std::env::args().any(|a| a == "--memory-store")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config =
        AppConfig::load(&env).with_context(|| format!("loading configuration for env {env}"))?;
    let _log_guard = node_pulse::logging::init_logging(&app_config);

    tracing::info!(
        git = env!("GIT_HASH"),
        env = %env,
        "Starting node_pulse"
    );

    let app = ProbeApp::from_config(&app_config, use_memory_store())
        .await
        .context("building probe engine")?;

    if use_once_mode() {
        let report = scheduler::run_once(&app).await.context("single probe run")?;
        tracing::info!(
            submitted = report.sweep.submitted,
            send_failed = report.sweep.send_failed,
            completed = report.reconcile.completed,
            delayed = report.reconcile.delayed,
            failed = report.reconcile.failed,
            still_pending = report.reconcile.still_pending,
            "Single run complete"
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        let _ = shutdown_tx.send(true);
    });

    scheduler::run(&app, shutdown_rx).await;
    tracing::info!("node_pulse stopped");
    Ok(())
}

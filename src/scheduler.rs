//! Scheduler: the dispatch and reconciliation loops.
//!
//! Both loops tick independently. A cycle that overruns its period delays
//! the next tick instead of bursting to catch up. Engine errors are logged
//! and the loop keeps going; only the shutdown signal stops it.

use crate::account::RefreshReport;
use crate::app::ProbeApp;
use crate::error::EngineError;
use crate::probe::ReconcileReport;
use crate::sweep::{SweepContext, SweepReport};
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

/// Reports of a single `--once` run
#[derive(Debug, Clone)]
pub struct OnceReport {
    pub refresh: RefreshReport,
    pub sweep: SweepReport,
    pub reconcile: ReconcileReport,
}

/// Seed the pool with fresh balances before the first sweep
async fn initial_refresh(app: &ProbeApp) -> Result<RefreshReport, EngineError> {
    let report = app.refresher.refresh_all().await?;
    info!(
        refreshed = report.refreshed,
        failed = report.failed,
        seeded = report.seeded,
        "Initial balance refresh complete"
    );
    Ok(report)
}

/// One refresh, one sweep and one reconciliation pass
pub async fn run_once(app: &ProbeApp) -> Result<OnceReport, EngineError> {
    let refresh = initial_refresh(app).await?;
    let sweep = app.sweeper.run(&SweepContext::first(Utc::now())).await?;
    let reconcile = app.reconciler.reconcile().await?;
    Ok(OnceReport {
        refresh,
        sweep,
        reconcile,
    })
}

async fn dispatch_loop(app: &ProbeApp, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval(app.schedule.dispatch_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ctx: Option<SweepContext> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                let next = match ctx {
                    Some(prev) => prev.next(now),
                    None => SweepContext::first(now),
                };
                ctx = Some(next);
                if let Err(e) = app.sweeper.run(&next).await {
                    error!(cycle = next.cycle, code = e.code(), error = %e, "Sweep aborted");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Dispatch loop stopped");
}

async fn reconcile_loop(app: &ProbeApp, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval(app.schedule.reconcile_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = app.reconciler.reconcile().await {
                    error!(code = e.code(), error = %e, "Reconciliation aborted");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Reconcile loop stopped");
}

/// Run both loops until `shutdown` flips to true or its sender is dropped.
pub async fn run(app: &ProbeApp, shutdown: watch::Receiver<bool>) {
    if let Err(e) = initial_refresh(app).await {
        error!(code = e.code(), error = %e, "Initial balance refresh aborted");
    }

    info!(
        dispatch_every = ?app.schedule.dispatch_every,
        reconcile_every = ?app.schedule.reconcile_every,
        "Scheduler started"
    );
    tokio::join!(
        dispatch_loop(app, shutdown.clone()),
        reconcile_loop(app, shutdown)
    );
}

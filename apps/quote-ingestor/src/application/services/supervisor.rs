//! Process Supervisor
//!
//! Outer loop of the service. While the market gate is open it runs one
//! cycle after another inside a failure boundary: errors and panics are
//! logged and the loop carries on. While the gate is closed it sleeps and
//! re-checks. Independently, once uptime passes the configured budget the
//! process is restarted as a safety net against slow leaks, cutting short
//! any cycle still running; per-cycle session teardown remains the primary
//! resource bound.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{CycleObserver, IngestionCycle, Restarter};
use crate::application::services::cycle::CycleError;
use crate::domain::schedule::MarketHours;
use crate::infrastructure::metrics;

/// Supervisor timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Sleep between gate checks while closed, and after a failed cycle.
    pub recheck_interval: Duration,
    /// Uptime after which the process restarts; `None` disables restarts.
    ///
    /// A cycle still running when the budget runs out is abandoned.
    pub restart_after: Option<Duration>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            recheck_interval: Duration::from_secs(60),
            restart_after: Some(Duration::from_secs(3600)),
        }
    }
}

/// Totals for one supervisor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    /// Cycles that completed.
    pub cycles_completed: u64,
    /// Cycles that failed or panicked.
    pub cycles_failed: u64,
    /// Gate checks that found the market closed.
    pub closed_checks: u64,
    /// Restarts requested.
    pub restarts: u64,
}

struct NoopObserver;

impl CycleObserver for NoopObserver {}

/// Drives cycles under the market gate.
pub struct Supervisor {
    gate: MarketHours,
    settings: SupervisorSettings,
    restarter: Arc<dyn Restarter>,
    observer: Arc<dyn CycleObserver>,
}

impl Supervisor {
    /// Create a supervisor.
    #[must_use]
    pub fn new(gate: MarketHours, settings: SupervisorSettings, restarter: Arc<dyn Restarter>) -> Self {
        Self {
            gate,
            settings,
            restarter,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Attach a progress observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn CycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run until `shutdown` is cancelled. A running cycle is allowed to finish.
    pub async fn run(&self, cycle: &dyn IngestionCycle, shutdown: CancellationToken) -> SupervisorStats {
        let mut stats = SupervisorStats::default();
        let mut started = Instant::now();

        tracing::info!(
            timezone = %self.gate.timezone(),
            open_hour = self.gate.open_hour(),
            close_hour = self.gate.close_hour(),
            restart_after_secs = self.settings.restart_after.map(|d| d.as_secs()),
            "Supervisor started"
        );

        while !shutdown.is_cancelled() {
            if let Some(budget) = self.settings.restart_after
                && started.elapsed() >= budget
            {
                stats.restarts += 1;
                metrics::record_restart();
                tracing::warn!(
                    uptime_secs = started.elapsed().as_secs(),
                    "Uptime budget reached, restarting process"
                );
                if let Err(e) = self.restarter.restart() {
                    tracing::error!(error = %e, "Restart failed, continuing in place");
                }
                started = Instant::now();
            }

            let open = self.gate.is_open(Utc::now());
            metrics::set_market_open(open);
            self.observer.gate_checked(open);

            if !open {
                stats.closed_checks += 1;
                tracing::debug!("Market closed, waiting");
                if self.pause(&shutdown).await {
                    break;
                }
                continue;
            }

            let clock = Instant::now();
            let guarded = AssertUnwindSafe(cycle.run_cycle()).catch_unwind();
            let finished = match self.settings.restart_after {
                Some(budget) => tokio::select! {
                    biased;
                    finished = guarded => Some(finished),
                    () = tokio::time::sleep_until(started + budget) => None,
                },
                None => Some(guarded.await),
            };
            let Some(finished) = finished else {
                tracing::warn!("Uptime budget reached mid-cycle, abandoning cycle");
                continue;
            };
            let outcome = finished
                .unwrap_or_else(|panic| Err(CycleError::Panicked(panic_message(panic.as_ref()))));

            match outcome {
                Ok(report) => {
                    stats.cycles_completed += 1;
                    metrics::record_cycle_success(clock.elapsed());
                    self.observer.cycle_completed(&report);
                }
                Err(e) => {
                    stats.cycles_failed += 1;
                    metrics::record_cycle_failure();
                    tracing::error!(error = %e, "Cycle failed, will retry on next pass");
                    self.observer.cycle_failed(&e);
                    if self.pause(&shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            cycles_completed = stats.cycles_completed,
            cycles_failed = stats.cycles_failed,
            "Supervisor stopped"
        );
        stats
    }

    /// Sleep one recheck interval. Returns `true` if shutdown was requested.
    async fn pause(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            () = shutdown.cancelled() => true,
            () = tokio::time::sleep(self.settings.recheck_interval) => false,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

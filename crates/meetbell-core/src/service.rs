//! Long-running reminder service.
//!
//! Start-up restores state in this order: disabled sources, transient health
//! reset, cached events, persisted alerts, missed-alert recovery. Then each
//! round syncs the due sources, reconciles alerts against the combined
//! eligible events and sleeps until the next poll.
//!
//! The sleep between rounds runs on the monotonic clock. When the wall clock
//! moved noticeably further than that sleep, the machine was suspended and
//! missed alerts are recovered before the next round.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alert::{
    AlertEngine, AlertOffsets, CalendarContextProvider, MissedAlert, ReconcileOutcome,
};
use crate::clock::{Clock, SystemClock};
use crate::sync::{SyncCoordinator, SyncRound};

/// Extra wall-clock time tolerated before a sleep counts as a wake gap.
pub const DEFAULT_WAKE_TOLERANCE: Duration = Duration::from_secs(60);

/// True when `elapsed` wall-clock time exceeds `expected + tolerance`.
pub fn is_wake_gap(elapsed: chrono::Duration, expected: Duration, tolerance: Duration) -> bool {
    match chrono::Duration::from_std(expected + tolerance) {
        Ok(limit) => elapsed > limit,
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StartupReport {
    pub disabled_sources: usize,
    pub cached_events: usize,
    pub restored_alerts: usize,
    pub missed_alerts: usize,
}

pub struct ReminderService {
    coordinator: Arc<SyncCoordinator>,
    alerts: AlertEngine,
    context: Option<Arc<CalendarContextProvider>>,
    offsets: AlertOffsets,
    wake_tolerance: Duration,
    clock: Arc<dyn Clock>,
}

impl ReminderService {
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        alerts: AlertEngine,
        offsets: AlertOffsets,
    ) -> Self {
        Self {
            coordinator,
            alerts,
            context: None,
            offsets,
            wake_tolerance: DEFAULT_WAKE_TOLERANCE,
            clock: Arc::new(SystemClock),
        }
    }

    /// Keep `context` fed with the events of every round.
    pub fn with_context(mut self, context: Arc<CalendarContextProvider>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_wake_tolerance(mut self, tolerance: Duration) -> Self {
        self.wake_tolerance = tolerance;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub async fn start(&self) -> StartupReport {
        let health = self.coordinator.health();
        let disabled_sources = match health.load_persisted().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load disabled sources");
                0
            }
        };
        health.reset_transient_states();

        let cached_events = self.coordinator.prime_from_cache().await;
        if let Some(context) = &self.context {
            context.update(self.coordinator.combined_events());
        }

        let relaunch = self.alerts.reconcile_on_relaunch().await;
        let missed = self.alerts.check_for_missed_alerts().await;

        let report = StartupReport {
            disabled_sources,
            cached_events,
            restored_alerts: relaunch.restored,
            missed_alerts: missed.len(),
        };
        tracing::info!(?report, "reminder service started");
        report
    }

    /// One sync round followed by alert reconciliation.
    pub async fn run_round(&self) -> (SyncRound, ReconcileOutcome) {
        let round = self.coordinator.sync_due().await;
        let outcome = self.apply_round(&round).await;
        (round, outcome)
    }

    /// Like [`run_round`](Self::run_round) but syncs every enabled source
    /// regardless of its poll schedule.
    pub async fn sync_now(&self) -> (SyncRound, ReconcileOutcome) {
        let round = self.coordinator.sync_all().await;
        let outcome = self.apply_round(&round).await;
        (round, outcome)
    }

    async fn apply_round(&self, round: &SyncRound) -> ReconcileOutcome {
        if let Some(context) = &self.context {
            context.update(round.events.clone());
        }
        self.alerts.reconcile(&round.events, self.offsets).await
    }

    /// Recover missed alerts if the wall clock ran ahead of a sleep.
    pub async fn after_sleep(
        &self,
        slept_from: DateTime<Utc>,
        expected: Duration,
    ) -> Option<Vec<MissedAlert>> {
        let elapsed = self.clock.now() - slept_from;
        if !is_wake_gap(elapsed, expected, self.wake_tolerance) {
            return None;
        }
        tracing::info!(
            elapsed_secs = elapsed.num_seconds(),
            expected_secs = expected.as_secs(),
            "wake from sleep detected"
        );
        Some(self.alerts.check_for_missed_alerts().await)
    }

    /// Run until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.start().await;
        tokio::pin!(shutdown);

        loop {
            let (round, _) = self.run_round().await;
            let delay = round.next_poll;
            let slept_from = self.clock.now();

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => break,
            }
            self.after_sleep(slept_from, delay).await;
        }

        self.alerts.shutdown().await;
        tracing::info!("reminder service stopped");
    }
}

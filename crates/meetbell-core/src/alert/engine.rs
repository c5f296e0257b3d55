//! Alert engine.
//!
//! Turns eligible events into persisted, timer-backed, two-stage reminders
//! and keeps them correct across reschedules, snoozes, restarts and sleep.
//!
//! ## Lifecycle
//!
//! ```text
//! scheduled -> (snoozed -> rescheduled)* -> fired -> removed
//! scheduled -> cancelled | acknowledged -> removed
//! ```
//!
//! ## Serialization
//!
//! All state lives behind one async mutex. Timer callbacks re-enter
//! through [`AlertEngine::fire_alert`] and take the same lock, so fire,
//! snooze and cancel for one alert are totally ordered: whichever reaches
//! the lock first wins and the other sees the result. A timer armed for a
//! fire time the alert no longer has (it was snoozed in between) is stale
//! and ignored.
//!
//! Persistence failures are logged and swallowed; the in-memory schedule
//! stays authoritative until the next successful save. A fired alert is
//! removed and persisted *before* it is delivered, so a crash can drop a
//! reminder but never repeat one.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::context::MeetingContextProvider;
use super::delivery::{AlertDelivery, NoopDelivery};
use super::missed::{classify_missed, MissedAlert};
use super::scheduler::{AlertScheduler, FireCallback};
use super::types::{
    AlertFraming, AlertOffsets, AlertSnapshot, AlertStage, DowngradeReason, MissedAlertResult,
    ScheduledAlert,
};
use crate::calendar::Event;
use crate::clock::{Clock, SystemClock};
use crate::error::AlertError;
use crate::storage::AlertStore;

/// Counts from one scheduling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOutcome {
    /// Alerts created or moved (timer armed).
    pub armed: usize,
    /// Alerts already correct.
    pub unchanged: usize,
    /// Stale alerts removed.
    pub cancelled: usize,
}

impl ScheduleOutcome {
    fn changed(&self) -> bool {
        self.armed > 0 || self.cancelled > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Event keys whose alerts were dropped because the event disappeared.
    pub dropped_events: Vec<String>,
    pub schedule: ScheduleOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaunchOutcome {
    /// Set when relaunch reconciliation already ran in this process.
    pub already_done: bool,
    pub restored: usize,
    pub rearmed: usize,
    /// Left for [`AlertEngine::check_for_missed_alerts`].
    pub past_due: usize,
}

/// What happened when an alert fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "path")]
pub enum FireOutcome {
    Delivered { framing: AlertFraming },
    Downgraded { reason: DowngradeReason },
}

#[derive(Debug, Default)]
struct AlertState {
    alerts: HashMap<String, ScheduledAlert>,
    acknowledged: HashSet<String>,
    relaunch_reconciled: bool,
}

struct EngineInner {
    state: Mutex<AlertState>,
    scheduler: Arc<dyn AlertScheduler>,
    store: Arc<dyn AlertStore>,
    delivery: Arc<dyn AlertDelivery>,
    context: Option<Arc<dyn MeetingContextProvider>>,
    downgrade_back_to_back: bool,
    clock: Arc<dyn Clock>,
}

/// Builder for [`AlertEngine`].
pub struct AlertEngineBuilder {
    scheduler: Arc<dyn AlertScheduler>,
    store: Arc<dyn AlertStore>,
    delivery: Arc<dyn AlertDelivery>,
    context: Option<Arc<dyn MeetingContextProvider>>,
    downgrade_back_to_back: bool,
    clock: Arc<dyn Clock>,
}

impl AlertEngineBuilder {
    pub fn with_delivery(mut self, delivery: Arc<dyn AlertDelivery>) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_context_provider(mut self, context: Arc<dyn MeetingContextProvider>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_back_to_back_downgrade(mut self, enabled: bool) -> Self {
        self.downgrade_back_to_back = enabled;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> AlertEngine {
        AlertEngine {
            inner: Arc::new(EngineInner {
                state: Mutex::new(AlertState::default()),
                scheduler: self.scheduler,
                store: self.store,
                delivery: self.delivery,
                context: self.context,
                downgrade_back_to_back: self.downgrade_back_to_back,
                clock: self.clock,
            }),
        }
    }
}

/// Cheap-to-clone handle to the alert engine.
#[derive(Clone)]
pub struct AlertEngine {
    inner: Arc<EngineInner>,
}

impl AlertEngine {
    pub fn builder(
        scheduler: Arc<dyn AlertScheduler>,
        store: Arc<dyn AlertStore>,
    ) -> AlertEngineBuilder {
        AlertEngineBuilder {
            scheduler,
            store,
            delivery: Arc::new(NoopDelivery),
            context: None,
            downgrade_back_to_back: true,
            clock: Arc::new(SystemClock),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Active alerts ordered by fire time.
    pub async fn active_alerts(&self) -> Vec<ScheduledAlert> {
        let state = self.inner.state.lock().await;
        let mut alerts: Vec<ScheduledAlert> = state.alerts.values().cloned().collect();
        alerts.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));
        alerts
    }

    pub async fn next_alert(&self) -> Option<ScheduledAlert> {
        self.active_alerts().await.into_iter().next()
    }

    pub async fn alert(&self, alert_id: &str) -> Option<ScheduledAlert> {
        self.inner.state.lock().await.alerts.get(alert_id).cloned()
    }

    pub async fn is_acknowledged(&self, event_key: &str) -> bool {
        self.inner.state.lock().await.acknowledged.contains(event_key)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Create or refresh alerts for `events`. Already-correct alerts are
    /// left alone, so calling this repeatedly with the same input is a
    /// no-op.
    pub async fn schedule_alerts(
        &self,
        events: &[Event],
        offsets: AlertOffsets,
    ) -> ScheduleOutcome {
        let mut state = self.inner.state.lock().await;
        let (outcome, dirty) = self.schedule_locked(&mut state, events, offsets).await;
        if dirty {
            self.persist(&state).await;
        }
        tracing::debug!(?outcome, "scheduled alerts");
        outcome
    }

    /// Cancel every alert for one event. Returns how many were removed.
    pub async fn cancel_alerts(&self, event_key: &str) -> usize {
        let mut state = self.inner.state.lock().await;
        let removed = self.remove_event_alerts(&mut state, event_key).await;
        if removed > 0 {
            self.persist(&state).await;
        }
        removed
    }

    /// Stop alerting for an event for the rest of the session.
    pub async fn acknowledge_alert(&self, event_key: &str) {
        let mut state = self.inner.state.lock().await;
        state.acknowledged.insert(event_key.to_string());
        let removed = self.remove_event_alerts(&mut state, event_key).await;
        tracing::info!(event_key, removed, "alert acknowledged");
        self.persist(&state).await;
    }

    /// Push an alert's fire time to `now + duration`.
    ///
    /// # Errors
    /// - [`AlertError::AlertNotFound`] if the alert is not active
    /// - [`AlertError::MeetingAlreadyStarted`] if the meeting has begun
    /// - [`AlertError::SnoozePastMeetingStart`] if the snooze would end at
    ///   or after the start
    pub async fn snooze(
        &self,
        alert_id: &str,
        duration: Duration,
    ) -> Result<ScheduledAlert, AlertError> {
        let mut state = self.inner.state.lock().await;
        let now = self.now();
        let alert = state
            .alerts
            .get(alert_id)
            .cloned()
            .ok_or_else(|| AlertError::AlertNotFound(alert_id.to_string()))?;

        if now >= alert.event_start {
            return Err(AlertError::MeetingAlreadyStarted);
        }
        if now + duration >= alert.event_start {
            return Err(AlertError::SnoozePastMeetingStart);
        }

        self.inner.scheduler.cancel(alert_id).await;
        let snoozed = alert.snoozed_until(now + duration);
        self.arm(&snoozed).await;
        state.alerts.insert(snoozed.id.clone(), snoozed.clone());
        tracing::info!(
            alert_id,
            fire_at = %snoozed.fire_at,
            snooze_count = snoozed.snooze_count,
            "alert snoozed"
        );
        self.persist(&state).await;
        Ok(snoozed)
    }

    /// Bring alerts in line with a fresh event set: drop alerts (and
    /// acknowledgments) of events that vanished, then schedule the rest.
    pub async fn reconcile(&self, events: &[Event], offsets: AlertOffsets) -> ReconcileOutcome {
        let mut state = self.inner.state.lock().await;
        let present: HashSet<String> = events.iter().map(Event::key).collect();

        let mut dropped: Vec<String> = state
            .alerts
            .values()
            .map(|a| a.event_key.clone())
            .filter(|key| !present.contains(key))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        dropped.sort();

        for key in &dropped {
            self.remove_event_alerts(&mut state, key).await;
        }

        let acknowledged_before = state.acknowledged.len();
        state.acknowledged.retain(|key| present.contains(key));
        let acknowledged_changed = state.acknowledged.len() != acknowledged_before;

        let (schedule, dirty) = self.schedule_locked(&mut state, events, offsets).await;
        if dirty || acknowledged_changed || !dropped.is_empty() {
            self.persist(&state).await;
        }

        if !dropped.is_empty() {
            tracing::info!(dropped = dropped.len(), "dropped alerts for removed events");
        }
        ReconcileOutcome {
            dropped_events: dropped,
            schedule,
        }
    }

    /// Restore persisted alerts after a restart. Runs once per process;
    /// later calls return `already_done`.
    pub async fn reconcile_on_relaunch(&self) -> RelaunchOutcome {
        let mut state = self.inner.state.lock().await;
        if state.relaunch_reconciled {
            return RelaunchOutcome {
                already_done: true,
                ..Default::default()
            };
        }
        state.relaunch_reconciled = true;

        let snapshot = match self.inner.store.load_alerts().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return RelaunchOutcome::default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load persisted alerts");
                return RelaunchOutcome::default();
            }
        };

        let now = self.now();
        let mut outcome = RelaunchOutcome::default();
        for alert in snapshot.alerts {
            // Anything scheduled since start-up is newer than the snapshot.
            if state.alerts.contains_key(&alert.id) {
                continue;
            }
            outcome.restored += 1;
            if alert.fire_at > now {
                self.arm(&alert).await;
                outcome.rearmed += 1;
            } else {
                outcome.past_due += 1;
            }
            state.alerts.insert(alert.id.clone(), alert);
        }
        state.acknowledged.extend(snapshot.acknowledged);

        tracing::info!(
            restored = outcome.restored,
            rearmed = outcome.rearmed,
            past_due = outcome.past_due,
            "relaunch reconciliation complete"
        );
        outcome
    }

    /// Deliver or discard every alert whose fire time has passed.
    pub async fn check_for_missed_alerts(&self) -> Vec<MissedAlert> {
        let missed = {
            let mut state = self.inner.state.lock().await;
            let now = self.now();
            let mut due: Vec<ScheduledAlert> = state
                .alerts
                .values()
                .filter(|a| a.fire_at <= now)
                .cloned()
                .collect();
            if due.is_empty() {
                return Vec::new();
            }
            due.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));

            let mut missed = Vec::with_capacity(due.len());
            for alert in due {
                state.alerts.remove(&alert.id);
                self.inner.scheduler.cancel(&alert.id).await;
                let result = classify_missed(&alert, now);
                missed.push(MissedAlert { alert, result });
            }
            self.persist(&state).await;
            missed
        };

        for entry in &missed {
            match entry.result {
                MissedAlertResult::FireNow => {
                    self.dispatch(&entry.alert, AlertFraming::Normal).await;
                }
                MissedAlertResult::MeetingJustStarted { .. } => {
                    self.dispatch(&entry.alert, AlertFraming::JustStarted).await;
                }
                MissedAlertResult::TooOld => {
                    tracing::debug!(alert_id = %entry.alert.id, "discarding stale alert");
                }
            }
        }
        tracing::info!(count = missed.len(), "recovered missed alerts");
        missed
    }

    /// Fire an alert now. Returns `None` if it is no longer active (already
    /// fired, cancelled or acknowledged).
    pub async fn fire_alert(&self, alert_id: &str) -> Option<FireOutcome> {
        self.fire_if(alert_id, None).await
    }

    /// Timer entry point: only fires if the alert still has the fire time
    /// the timer was armed for.
    pub(super) async fn fire_scheduled(
        &self,
        alert_id: &str,
        armed_for: DateTime<Utc>,
    ) -> Option<FireOutcome> {
        self.fire_if(alert_id, Some(armed_for)).await
    }

    async fn fire_if(
        &self,
        alert_id: &str,
        armed_for: Option<DateTime<Utc>>,
    ) -> Option<FireOutcome> {
        let alert = {
            let mut state = self.inner.state.lock().await;
            match state.alerts.get(alert_id) {
                None => {
                    tracing::debug!(alert_id, "fire for inactive alert ignored");
                    return None;
                }
                Some(alert) if armed_for.is_some_and(|t| t != alert.fire_at) => {
                    tracing::debug!(alert_id, "stale timer ignored");
                    return None;
                }
                Some(_) => {}
            }
            let alert = state.alerts.remove(alert_id)?;
            self.inner.scheduler.cancel(alert_id).await;
            self.persist(&state).await;
            alert
        };
        Some(self.dispatch(&alert, AlertFraming::Normal).await)
    }

    /// Disarm every timer. Persisted alerts are kept for the next launch.
    pub async fn shutdown(&self) {
        let _state = self.inner.state.lock().await;
        self.inner.scheduler.cancel_all().await;
        tracing::info!("alert timers disarmed");
    }

    // ── Internal ─────────────────────────────────────────────────────

    async fn dispatch(&self, alert: &ScheduledAlert, framing: AlertFraming) -> FireOutcome {
        if alert.stage == AlertStage::Stage1 && self.inner.downgrade_back_to_back {
            if let Some(provider) = &self.inner.context {
                let ctx = provider.context_for(alert).await;
                if ctx.is_in_meeting && ctx.is_back_to_back_situation {
                    let reason = DowngradeReason::BackToBack;
                    tracing::info!(alert_id = %alert.id, ?reason, "delivering downgraded alert");
                    self.inner.delivery.deliver_downgraded(alert, reason).await;
                    return FireOutcome::Downgraded { reason };
                }
            }
        }
        tracing::info!(alert_id = %alert.id, ?framing, "delivering alert");
        self.inner.delivery.deliver(alert, framing).await;
        FireOutcome::Delivered { framing }
    }

    /// Returns the outcome and whether anything (including a snapshot
    /// title) changed.
    async fn schedule_locked(
        &self,
        state: &mut AlertState,
        events: &[Event],
        offsets: AlertOffsets,
    ) -> (ScheduleOutcome, bool) {
        let now = self.now();
        let mut outcome = ScheduleOutcome::default();
        let mut retitled = false;

        for event in events {
            let key = event.key();
            if state.acknowledged.contains(&key) {
                continue;
            }
            for stage in AlertStage::ALL {
                let id = ScheduledAlert::alert_id(&key, stage);
                let existing = state
                    .alerts
                    .get(&id)
                    .map(|a| (a.base_fire_at(), a.event_start));

                let Some(offset) = offsets.offset(stage) else {
                    if existing.is_some() {
                        self.remove_alert(state, &id).await;
                        outcome.cancelled += 1;
                    }
                    continue;
                };
                let fire_at = event.start - offset;

                match existing {
                    Some((base, start)) if base == fire_at && start == event.start => {
                        if let Some(alert) = state.alerts.get_mut(&id) {
                            if alert.event_title != event.title {
                                alert.event_title = event.title.clone();
                                retitled = true;
                            }
                        }
                        outcome.unchanged += 1;
                        continue;
                    }
                    Some(_) if fire_at <= now => {
                        self.remove_alert(state, &id).await;
                        outcome.cancelled += 1;
                        continue;
                    }
                    None if fire_at <= now => continue,
                    _ => {}
                }

                let alert = ScheduledAlert::for_event(event, stage, fire_at);
                self.arm(&alert).await;
                state.alerts.insert(id, alert);
                outcome.armed += 1;
            }
        }

        let dirty = outcome.changed() || retitled;
        (outcome, dirty)
    }

    async fn remove_alert(&self, state: &mut AlertState, alert_id: &str) {
        state.alerts.remove(alert_id);
        self.inner.scheduler.cancel(alert_id).await;
    }

    async fn remove_event_alerts(&self, state: &mut AlertState, event_key: &str) -> usize {
        let ids: Vec<String> = state
            .alerts
            .values()
            .filter(|a| a.event_key == event_key)
            .map(|a| a.id.clone())
            .collect();
        for id in &ids {
            self.remove_alert(state, id).await;
        }
        ids.len()
    }

    async fn arm(&self, alert: &ScheduledAlert) {
        let callback = fire_callback(Arc::downgrade(&self.inner), alert.id.clone(), alert.fire_at);
        if let Err(e) = self
            .inner
            .scheduler
            .schedule(&alert.id, alert.fire_at, callback)
            .await
        {
            tracing::warn!(alert_id = %alert.id, error = %e, "failed to arm alert timer");
        }
    }

    async fn persist(&self, state: &AlertState) {
        let snapshot = AlertSnapshot::new(
            state.alerts.values().cloned().collect(),
            state.acknowledged.iter().cloned(),
        );
        if let Err(e) = self.inner.store.save_alerts(&snapshot).await {
            tracing::warn!(error = %e, "failed to persist alerts; keeping in-memory schedule");
        }
    }
}

fn fire_callback(
    engine: Weak<EngineInner>,
    alert_id: String,
    armed_for: DateTime<Utc>,
) -> FireCallback {
    let runtime = tokio::runtime::Handle::try_current().ok();
    Box::new(move || {
        let Some(runtime) = runtime else {
            tracing::warn!(alert_id = %alert_id, "timer fired outside a runtime");
            return;
        };
        runtime.spawn(async move {
            if let Some(inner) = engine.upgrade() {
                AlertEngine { inner }
                    .fire_scheduled(&alert_id, armed_for)
                    .await;
            }
        });
    })
}

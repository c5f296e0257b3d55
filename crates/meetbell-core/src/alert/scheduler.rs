//! Timer backends for scheduled alerts.
//!
//! The alert engine arms one timer per alert through [`AlertScheduler`].
//! [`TokioScheduler`] is the in-process implementation: it never trusts a
//! single long sleep, because a suspended machine or an adjusted clock
//! would let the monotonic timer drift away from wall-clock time. Instead
//! each timer sleeps in bounded slices and re-reads the wall clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::error::SchedulerError;

/// Invoked once when a timer fires.
pub type FireCallback = Box<dyn FnOnce() + Send + 'static>;

/// Longest single sleep before the wall clock is checked again.
pub const DEFAULT_MAX_SLICE: Duration = Duration::from_secs(30);

#[async_trait]
pub trait AlertScheduler: Send + Sync {
    /// Arm a timer. Scheduling an id that is already armed replaces it.
    async fn schedule(
        &self,
        alert_id: &str,
        fire_at: DateTime<Utc>,
        callback: FireCallback,
    ) -> Result<(), SchedulerError>;

    async fn cancel(&self, alert_id: &str);

    async fn cancel_all(&self);
}

struct TimerHandle {
    generation: u64,
    task: JoinHandle<()>,
}

type TimerMap = Arc<Mutex<HashMap<String, TimerHandle>>>;

/// One tokio task per armed alert.
pub struct TokioScheduler {
    timers: TimerMap,
    generation: AtomicU64,
    max_slice: Duration,
    clock: Arc<dyn Clock>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), DEFAULT_MAX_SLICE)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, max_slice: Duration) -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            max_slice,
            clock,
        }
    }

    /// Number of timers that have not fired or been cancelled.
    pub fn pending(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_armed(&self, alert_id: &str) -> bool {
        self.timers
            .lock()
            .map(|t| t.contains_key(alert_id))
            .unwrap_or(false)
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        if let Ok(mut timers) = self.timers.lock() {
            for (_, timer) in timers.drain() {
                timer.task.abort();
            }
        }
    }
}

async fn sleep_until_wall_clock(clock: &dyn Clock, fire_at: DateTime<Utc>, max_slice: Duration) {
    loop {
        let now = clock.now();
        if now >= fire_at {
            return;
        }
        let remaining = (fire_at - now).to_std().unwrap_or_default();
        tokio::time::sleep(remaining.min(max_slice)).await;
    }
}

#[async_trait]
impl AlertScheduler for TokioScheduler {
    async fn schedule(
        &self,
        alert_id: &str,
        fire_at: DateTime<Utc>,
        callback: FireCallback,
    ) -> Result<(), SchedulerError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::RuntimeUnavailable)?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let clock = Arc::clone(&self.clock);
        let max_slice = self.max_slice;
        let id = alert_id.to_string();

        // The map stays locked until the handle is stored, so a timer that
        // fires immediately cannot race its own registration.
        let mut map = self
            .timers
            .lock()
            .map_err(|_| SchedulerError::Registration("timer map poisoned".into()))?;

        let task = runtime.spawn(async move {
            sleep_until_wall_clock(clock.as_ref(), fire_at, max_slice).await;
            let still_current = match timers.lock() {
                Ok(mut map) => {
                    let current = map.get(&id).map(|t| t.generation) == Some(generation);
                    if current {
                        map.remove(&id);
                    }
                    current
                }
                Err(_) => false,
            };
            if still_current {
                tracing::debug!(alert_id = %id, "timer fired");
                callback();
            }
        });

        if let Some(previous) = map.insert(alert_id.to_string(), TimerHandle { generation, task }) {
            previous.task.abort();
        }
        Ok(())
    }

    async fn cancel(&self, alert_id: &str) {
        if let Ok(mut timers) = self.timers.lock() {
            if let Some(timer) = timers.remove(alert_id) {
                timer.task.abort();
            }
        }
    }

    async fn cancel_all(&self) {
        if let Ok(mut timers) = self.timers.lock() {
            for (_, timer) in timers.drain() {
                timer.task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn fires_past_due_timer_immediately() {
        let scheduler = TokioScheduler::new();
        let (tx, rx) = oneshot::channel();
        scheduler
            .schedule(
                "a-stage1",
                Utc::now() - ChronoDuration::seconds(1),
                Box::new(move || {
                    let _ = tx.send(());
                }),
            )
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("timer should fire")
            .unwrap();
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn fires_after_short_delay() {
        let scheduler =
            TokioScheduler::with_clock(Arc::new(SystemClock), Duration::from_millis(20));
        let (tx, rx) = oneshot::channel();
        scheduler
            .schedule(
                "a-stage2",
                Utc::now() + ChronoDuration::milliseconds(80),
                Box::new(move || {
                    let _ = tx.send(Utc::now());
                }),
            )
            .await
            .unwrap();
        assert!(scheduler.is_armed("a-stage2"));
        let fired_at = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("timer should fire")
            .unwrap();
        assert!(fired_at <= Utc::now());
    }

    #[tokio::test]
    async fn cancel_prevents_fire() {
        let scheduler = TokioScheduler::new();
        let (tx, rx) = oneshot::channel::<()>();
        scheduler
            .schedule(
                "b-stage1",
                Utc::now() + ChronoDuration::milliseconds(100),
                Box::new(move || {
                    let _ = tx.send(());
                }),
            )
            .await
            .unwrap();
        scheduler.cancel("b-stage1").await;
        assert_eq!(scheduler.pending(), 0);
        // Sender dropped with the aborted task.
        let result = tokio::time::timeout(Duration::from_millis(300), rx).await;
        assert!(matches!(result, Ok(Err(_))));
    }

    #[tokio::test]
    async fn rescheduling_replaces_previous_timer() {
        let scheduler = TokioScheduler::new();
        let (old_tx, old_rx) = oneshot::channel::<()>();
        let (new_tx, new_rx) = oneshot::channel::<()>();
        scheduler
            .schedule(
                "c-stage1",
                Utc::now() + ChronoDuration::seconds(60),
                Box::new(move || {
                    let _ = old_tx.send(());
                }),
            )
            .await
            .unwrap();
        scheduler
            .schedule(
                "c-stage1",
                Utc::now(),
                Box::new(move || {
                    let _ = new_tx.send(());
                }),
            )
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), new_rx)
            .await
            .expect("replacement should fire")
            .unwrap();
        assert!(old_rx.await.is_err());
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn cancel_all_clears_every_timer() {
        let scheduler = TokioScheduler::new();
        for id in ["x-stage1", "y-stage1", "z-stage2"] {
            scheduler
                .schedule(id, Utc::now() + ChronoDuration::hours(1), Box::new(|| {}))
                .await
                .unwrap();
        }
        assert_eq!(scheduler.pending(), 3);
        scheduler.cancel_all().await;
        assert_eq!(scheduler.pending(), 0);
    }
}

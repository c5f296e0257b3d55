//! Per-source health.
//!
//! ```text
//! healthy --3 consecutive failures--> failing
//! healthy|failing --success--> healthy
//! any --disable--> disabled (persisted)
//! disabled --enable--> healthy
//! ```
//!
//! Outcomes reported for a disabled source are ignored. Only the disabled
//! set survives a restart. Toggles are persisted one at a time, and a toggle
//! whose save fails is rolled back in memory.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::storage::DisabledSourceStore;

/// Consecutive failures before a source is marked failing.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Poll multiplier applied to failing sources.
pub const FAILING_POLL_MULTIPLIER: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Failing,
    Disabled,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Failing => "failing",
            HealthState::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl Default for SourceHealth {
    fn default() -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Notified after every state transition.
pub trait HealthDelegate: Send + Sync {
    fn health_changed(&self, source_id: &str, old: HealthState, new: HealthState);
}

type Transition = (String, HealthState, HealthState);

pub struct HealthTracker {
    sources: Mutex<HashMap<String, SourceHealth>>,
    store: Arc<dyn DisabledSourceStore>,
    delegate: Mutex<Option<Weak<dyn HealthDelegate>>>,
    /// Held from snapshot to save so the last write carries every toggle.
    persist: tokio::sync::Mutex<()>,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn DisabledSourceStore>) -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
            store,
            delegate: Mutex::new(None),
            persist: tokio::sync::Mutex::new(()),
        }
    }

    pub fn set_delegate(&self, delegate: &Arc<dyn HealthDelegate>) {
        let mut slot = self.delegate.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::downgrade(delegate));
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SourceHealth>> {
        self.sources.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, transition: Option<Transition>) {
        let Some((source_id, old, new)) = transition else {
            return;
        };
        tracing::info!(source_id = %source_id, %old, %new, "source health changed");
        let delegate = self
            .delegate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(delegate) = delegate {
            delegate.health_changed(&source_id, old, new);
        }
    }

    /// Restore the persisted disabled set.
    pub async fn load_persisted(&self) -> Result<usize, StoreError> {
        let disabled = self.store.load_disabled().await?;
        let count = disabled.len();
        let mut sources = self.lock();
        for source_id in disabled {
            sources.entry(source_id).or_default().state = HealthState::Disabled;
        }
        Ok(count)
    }

    /// Return failing sources to healthy. Run once at process start.
    pub fn reset_transient_states(&self) {
        for health in self.lock().values_mut() {
            if health.state != HealthState::Disabled {
                *health = SourceHealth::default();
            }
        }
    }

    pub fn mark_success(&self, source_id: &str) {
        let transition = {
            let mut sources = self.lock();
            let health = sources.entry(source_id.to_string()).or_default();
            if health.state == HealthState::Disabled {
                return;
            }
            let old = health.state;
            health.state = HealthState::Healthy;
            health.consecutive_failures = 0;
            health.last_error = None;
            (old != HealthState::Healthy)
                .then(|| (source_id.to_string(), old, HealthState::Healthy))
        };
        self.notify(transition);
    }

    pub fn mark_failure(&self, source_id: &str, error: &str) {
        let transition = {
            let mut sources = self.lock();
            let health = sources.entry(source_id.to_string()).or_default();
            if health.state == HealthState::Disabled {
                return;
            }
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            health.last_error = Some(error.to_string());
            let old = health.state;
            if old == HealthState::Healthy && health.consecutive_failures >= FAILURE_THRESHOLD {
                health.state = HealthState::Failing;
                Some((source_id.to_string(), old, HealthState::Failing))
            } else {
                None
            }
        };
        self.notify(transition);
    }

    /// Disable a source and persist the disabled set.
    pub async fn disable(&self, source_id: &str) -> Result<(), StoreError> {
        self.toggle(source_id, |health| {
            let old = health.state;
            *health = SourceHealth {
                state: HealthState::Disabled,
                ..SourceHealth::default()
            };
            (old != HealthState::Disabled).then_some((old, HealthState::Disabled))
        })
        .await
    }

    /// Re-enable a disabled source as healthy and persist.
    pub async fn enable(&self, source_id: &str) -> Result<(), StoreError> {
        self.toggle(source_id, |health| {
            if health.state != HealthState::Disabled {
                return None;
            }
            *health = SourceHealth::default();
            Some((HealthState::Disabled, HealthState::Healthy))
        })
        .await
    }

    async fn toggle<F>(&self, source_id: &str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut SourceHealth) -> Option<(HealthState, HealthState)>,
    {
        let _persist = self.persist.lock().await;
        let (previous, change, disabled) = {
            let mut sources = self.lock();
            let previous = sources.get(source_id).cloned();
            let change = apply(sources.entry(source_id.to_string()).or_default());
            (previous, change, disabled_set(&sources))
        };

        if let Err(e) = self.store.save_disabled(&disabled).await {
            let mut sources = self.lock();
            match previous {
                Some(health) => sources.insert(source_id.to_string(), health),
                None => sources.remove(source_id),
            };
            tracing::warn!(source_id, error = %e, "failed to persist disabled sources");
            return Err(e);
        }
        self.notify(change.map(|(old, new)| (source_id.to_string(), old, new)));
        Ok(())
    }

    pub fn state(&self, source_id: &str) -> HealthState {
        self.lock()
            .get(source_id)
            .map_or(HealthState::Healthy, |h| h.state)
    }

    pub fn is_disabled(&self, source_id: &str) -> bool {
        self.state(source_id) == HealthState::Disabled
    }

    /// Poll multiplier, or `None` when the source must not be polled.
    pub fn polling_multiplier(&self, source_id: &str) -> Option<u32> {
        match self.state(source_id) {
            HealthState::Healthy => Some(1),
            HealthState::Failing => Some(FAILING_POLL_MULTIPLIER),
            HealthState::Disabled => None,
        }
    }

    pub fn health(&self, source_id: &str) -> SourceHealth {
        self.lock().get(source_id).cloned().unwrap_or_default()
    }

    /// Every tracked source, sorted by id.
    pub fn snapshot(&self) -> Vec<(String, SourceHealth)> {
        let mut all: Vec<(String, SourceHealth)> = self
            .lock()
            .iter()
            .map(|(id, h)| (id.clone(), h.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

fn disabled_set(sources: &HashMap<String, SourceHealth>) -> HashSet<String> {
    sources
        .iter()
        .filter(|(_, h)| h.state == HealthState::Disabled)
        .map(|(id, _)| id.clone())
        .collect()
}

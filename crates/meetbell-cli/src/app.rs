//! Wiring shared by the commands that touch the engines.

use std::path::PathBuf;
use std::sync::Arc;

use meetbell_core::alert::{CalendarContextProvider, LogDelivery};
use meetbell_core::storage::data_dir;
use meetbell_core::{
    AlertEngine, Config, FileEventSource, HealthTracker, RateLimitManager, ReminderService,
    SqliteStore, SyncCoordinator, SyncEngine, TokioScheduler,
};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Directory the file source reads `<source>.json` from.
pub fn events_dir(config: &Config) -> CliResult<PathBuf> {
    match &config.sync.events_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(data_dir()?.join("events")),
    }
}

pub fn open_store() -> CliResult<Arc<SqliteStore>> {
    Ok(Arc::new(SqliteStore::open()?))
}

pub struct App {
    pub config: Config,
    pub service: ReminderService,
}

impl App {
    pub fn open() -> CliResult<Self> {
        let config = Config::load()?;
        let store = open_store()?;
        Self::from_config(config, store)
    }

    pub fn from_config(config: Config, store: Arc<SqliteStore>) -> CliResult<Self> {
        let dir = events_dir(&config)?;
        tracing::debug!(
            events_dir = %dir.display(),
            sources = ?config.sync.sources,
            "wiring engines"
        );

        let source = Arc::new(FileEventSource::new(dir));
        let engine = SyncEngine::new(source, store.clone(), store.clone())
            .with_filter(config.filter.clone())
            .with_window(config.fetch_window());
        let coordinator = SyncCoordinator::new(
            Arc::new(engine),
            Arc::new(RateLimitManager::new(config.rate_limit.clone())),
            Arc::new(HealthTracker::new(store.clone())),
            config.sync.sources.clone(),
        )
        .with_polling(config.polling_schedule())
        .with_transient_retry(config.transient_retry_delay());

        let context = Arc::new(CalendarContextProvider::new());
        let alerts = AlertEngine::builder(Arc::new(TokioScheduler::new()), store)
            .with_delivery(Arc::new(LogDelivery))
            .with_context_provider(context.clone())
            .with_back_to_back_downgrade(config.alerts.downgrade_back_to_back)
            .build();

        let service = ReminderService::new(Arc::new(coordinator), alerts, config.offsets())
            .with_context(context);

        Ok(Self { config, service })
    }
}

/// Local wall-clock rendering used in listings.
pub fn local_time(at: chrono::DateTime<chrono::Utc>) -> String {
    at.with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

use clap::Subcommand;
use meetbell_core::storage::EventCache;
use meetbell_core::{Config, HealthTracker};
use serde_json::json;

use crate::app::{events_dir, open_store, CliResult};

#[derive(Subcommand)]
pub enum SourcesAction {
    /// Show configured sources with their cached events and status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stop syncing a source (persists across restarts)
    Disable {
        /// Source id
        source_id: String,
    },
    /// Resume syncing a disabled source
    Enable {
        /// Source id
        source_id: String,
    },
}

pub async fn run(action: SourcesAction) -> CliResult {
    let config = Config::load()?;
    let store = open_store()?;
    let health = HealthTracker::new(store.clone());
    health.load_persisted().await?;

    match action {
        SourcesAction::Status { json } => {
            let dir = events_dir(&config)?;
            let mut rows = Vec::new();
            for source_id in &config.sync.sources {
                let cached = store.load_events(source_id).await?.len();
                let state = if health.is_disabled(source_id) { "disabled" } else { "enabled" };
                let file = dir.join(format!("{source_id}.json"));
                rows.push((source_id.clone(), state, cached, file.exists()));
            }
            // Cache left behind by sources removed from the config.
            for source_id in store.cached_sources()? {
                if config.sync.sources.contains(&source_id) {
                    continue;
                }
                let cached = store.load_events(&source_id).await?.len();
                let file = dir.join(format!("{source_id}.json"));
                rows.push((source_id, "unconfigured", cached, file.exists()));
            }

            if json {
                let out: Vec<_> = rows
                    .iter()
                    .map(|(id, state, cached, present)| {
                        json!({
                            "source_id": id,
                            "state": state,
                            "cached_events": cached,
                            "file_present": present,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&out)?);
                return Ok(());
            }
            if rows.is_empty() {
                println!("no sources configured");
            }
            for (id, state, cached, present) in rows {
                let missing = if present { "" } else { " (no event file)" };
                println!("{id}: {state}, {cached} cached events{missing}");
            }
        }
        SourcesAction::Disable { source_id } => {
            ensure_known(&config, &source_id)?;
            health.disable(&source_id).await?;
            println!("disabled {source_id}");
        }
        SourcesAction::Enable { source_id } => {
            ensure_known(&config, &source_id)?;
            health.enable(&source_id).await?;
            println!("enabled {source_id}");
        }
    }
    Ok(())
}

fn ensure_known(config: &Config, source_id: &str) -> CliResult {
    if config.sync.sources.iter().any(|s| s == source_id) {
        Ok(())
    } else {
        Err(format!("unknown source: {source_id}").into())
    }
}

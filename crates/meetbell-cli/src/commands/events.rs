use clap::Subcommand;
use meetbell_core::calendar::{detect_back_to_back, find_conflicts};
use meetbell_core::storage::EventCache;
use meetbell_core::{Config, Event};

use crate::app::{local_time, open_store, CliResult};

#[derive(Subcommand)]
pub enum EventsAction {
    /// List cached events
    List {
        /// Only events that would get alerts
        #[arg(long)]
        eligible: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show overlapping eligible events
    Conflicts,
    /// Show whether the current meeting runs into the next one
    BackToBack,
}

pub async fn run(action: EventsAction) -> CliResult {
    let config = Config::load()?;
    let store = open_store()?;

    let mut events: Vec<Event> = Vec::new();
    for source_id in &config.sync.sources {
        events.extend(store.load_events(source_id).await?);
    }
    events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.key().cmp(&b.key())));

    match action {
        EventsAction::List { eligible, json } => {
            if eligible {
                events = config.filter.apply(&events);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
                return Ok(());
            }
            if events.is_empty() {
                println!("no cached events");
            }
            for event in &events {
                let when = if event.is_all_day {
                    "all day".to_string()
                } else {
                    local_time(event.start)
                };
                println!("{when:<16}  {}  [{}]", event.title, event.key());
            }
        }
        EventsAction::Conflicts => {
            let eligible = config.filter.apply(&events);
            let conflicts = find_conflicts(&eligible);
            if conflicts.is_empty() {
                println!("no conflicts");
            }
            for c in conflicts {
                println!("{} overlaps {} by {} min", c.first, c.second, c.overlap_minutes);
            }
        }
        EventsAction::BackToBack => {
            let eligible = config.filter.apply(&events);
            let state = detect_back_to_back(&eligible, chrono::Utc::now());
            match (&state.current, &state.next) {
                (Some(current), Some(next)) => println!(
                    "back-to-back: {} ends {}, {} starts {}",
                    current.title,
                    local_time(current.end),
                    next.title,
                    local_time(next.start)
                ),
                (Some(current), None) => println!("in {}, nothing right after", current.title),
                _ => println!("no meeting in progress"),
            }
        }
    }
    Ok(())
}

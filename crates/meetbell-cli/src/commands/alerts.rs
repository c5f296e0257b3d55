use clap::Subcommand;
use meetbell_core::storage::AlertStore;

use crate::app::{local_time, open_store, CliResult};

#[derive(Subcommand)]
pub enum AlertsAction {
    /// List persisted alerts in firing order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the next alert to fire
    Next,
}

pub async fn run(action: AlertsAction) -> CliResult {
    let store = open_store()?;
    let mut alerts = match store.load_alerts().await? {
        Some(snapshot) => snapshot.alerts,
        None => Vec::new(),
    };
    alerts.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));

    match action {
        AlertsAction::List { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&alerts)?);
                return Ok(());
            }
            if alerts.is_empty() {
                println!("no alerts scheduled");
            }
            for alert in &alerts {
                let snoozed = if alert.is_snoozed() {
                    format!(" (snoozed x{})", alert.snooze_count)
                } else {
                    String::new()
                };
                println!(
                    "{}  {:<6}  {}{snoozed}  [{}]",
                    local_time(alert.fire_at),
                    alert.stage,
                    alert.event_title,
                    alert.id
                );
            }
        }
        AlertsAction::Next => match alerts.first() {
            Some(alert) => println!(
                "{} ({}) fires at {}, meeting starts at {}",
                alert.event_title,
                alert.stage,
                local_time(alert.fire_at),
                local_time(alert.event_start)
            ),
            None => println!("no alerts scheduled"),
        },
    }
    Ok(())
}

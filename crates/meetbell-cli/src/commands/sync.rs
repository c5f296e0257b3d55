//! One-shot sync of every enabled source.

use serde_json::json;

use crate::app::{local_time, App, CliResult};

pub async fn run(as_json: bool) -> CliResult {
    let app = App::open()?;
    let startup = app.service.start().await;
    let (round, outcome) = app.service.sync_now().await;

    if as_json {
        let failures: Vec<_> = round
            .failures
            .iter()
            .map(|f| {
                json!({
                    "source_id": f.source_id,
                    "category": format!("{:?}", f.category()),
                    "error": f.error.to_string(),
                    "retried": f.retried,
                })
            })
            .collect();
        let successes: Vec<_> = round
            .successes
            .iter()
            .map(|r| {
                json!({
                    "source_id": r.source_id,
                    "full_sync": r.was_full_sync,
                    "events": r.events.len(),
                    "eligible": r.eligible.len(),
                })
            })
            .collect();
        let skipped: Vec<_> = round
            .skipped
            .iter()
            .map(|(id, reason)| json!({ "source_id": id, "skip": reason }))
            .collect();
        let summary = json!({
            "startup": startup,
            "successes": successes,
            "failures": failures,
            "skipped": skipped,
            "events": round.events.len(),
            "next_poll_secs": round.next_poll.as_secs(),
            "alerts": {
                "armed": outcome.schedule.armed,
                "unchanged": outcome.schedule.unchanged,
                "cancelled": outcome.schedule.cancelled,
                "dropped_events": outcome.dropped_events,
            },
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for result in &round.successes {
        let kind = if result.was_full_sync { "full" } else { "incremental" };
        println!(
            "{}: ok ({kind}, {} events, {} eligible)",
            result.source_id,
            result.events.len(),
            result.eligible.len()
        );
    }
    for failure in &round.failures {
        println!("{}: failed ({:?}): {}", failure.source_id, failure.category(), failure.error);
    }
    for (source_id, reason) in &round.skipped {
        println!("{source_id}: skipped ({})", serde_json::to_string(reason)?);
    }
    println!(
        "alerts: {} armed, {} unchanged, {} cancelled",
        outcome.schedule.armed, outcome.schedule.unchanged, outcome.schedule.cancelled
    );
    if let Some(next) = app.service.alerts().next_alert().await {
        println!("next: {} ({}) at {}", next.event_title, next.stage, local_time(next.fire_at));
    }
    Ok(())
}

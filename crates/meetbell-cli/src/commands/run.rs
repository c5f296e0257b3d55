use crate::app::{App, CliResult};

/// Run the service loop until Ctrl-C.
pub async fn run() -> CliResult {
    let app = App::open()?;
    if app.config.sync.sources.is_empty() {
        return Err("no sources configured (meetbell config set sync.sources '[\"work\"]')".into());
    }

    tracing::info!(sources = ?app.config.sync.sources, "starting meetbell");
    app.service
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}

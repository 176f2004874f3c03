use classification_sync::{
    app_state::AppState,
    config::AppConfig,
    services::job_runner::{run_next_job, JobRun},
};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    tracing::info!("Starting classification sync worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let state = AppState::connect(&config, 5)
        .await
        .expect("Failed to initialize worker state");

    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let resync_interval = config.resync_interval_secs.map(Duration::from_secs);
    let mut last_resync = Instant::now();

    tracing::info!(
        poll_interval_ms = config.poll_interval_ms,
        resync_interval_secs = ?config.resync_interval_secs,
        "Worker ready, starting job processing loop"
    );

    loop {
        match process_next_job(&state).await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("No due jobs, sleeping");
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job, will retry");
                sleep(poll_interval).await;
            }
        }

        if let Some(interval) = resync_interval {
            if last_resync.elapsed() >= interval {
                last_resync = Instant::now();
                if let Err(e) = state.sync.resync_products_with_errors().await {
                    tracing::error!(error = %e, "Periodic resync failed");
                }
            }
        }
    }
}

/// Claim and run the next due job.
/// Returns Ok(true) if a job was processed, Ok(false) if none was due.
async fn process_next_job(state: &AppState) -> Result<bool, Box<dyn std::error::Error>> {
    let now = chrono::Utc::now().timestamp();
    if run_next_job(&*state.queue, &state.sync, now).await? == JobRun::Idle {
        return Ok(false);
    }

    match state.queue.queue_depth().await {
        Ok(depth) => metrics::gauge!("classification_queue_pending").set(depth as f64),
        Err(e) => tracing::warn!(error = %e, "Failed to read queue depth"),
    }

    Ok(true)
}

use std::time::Duration;

use uuid::Uuid;

use crate::services::queue::JobQueue;
use crate::services::sync_handler::{JobOutcome, SyncError, SyncHandler};

/// What one pass of the worker loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRun {
    /// Nothing was due.
    Idle,
    Completed(JobOutcome),
    /// The job hit a transient error and was rescheduled under this new id.
    Retried(Uuid),
    /// The job can never succeed and was moved to `failed`.
    Failed,
}

/// Claim the next job due at `now`, run it and settle it in the queue.
///
/// A job failing on storage, catalog or queue errors is scheduled again after
/// the configured retry delay, so a full-sync batch is never lost to a
/// transient outage. Its replacement is pending before the original is
/// removed, which keeps the full sync from finishing in between. If the
/// reschedule itself fails the job stays claimed and comes back once its
/// processing lease runs out.
pub async fn run_next_job(queue: &dyn JobQueue, sync: &SyncHandler, now: i64) -> Result<JobRun, SyncError> {
    let Some(job) = queue.claim_due(now).await? else {
        queue.reclaim_stale(now).await?;
        return Ok(JobRun::Idle);
    };

    tracing::debug!(job_id = %job.id, hook = %job.hook, "Processing job");

    let run = match sync.run_job(&job).await {
        Ok(outcome) => {
            queue.complete(&job).await?;
            if let JobOutcome::Enqueued(count) = outcome {
                tracing::info!(job_id = %job.id, hook = %job.hook, enqueued = count, "Job completed");
            } else {
                tracing::debug!(job_id = %job.id, outcome = outcome.label(), "Job completed");
            }
            metrics::counter!("classification_jobs_total", "result" => "completed").increment(1);
            JobRun::Completed(outcome)
        }
        Err(e) if e.is_retryable() => {
            let run_at = now.saturating_add(retry_delay_secs(sync.config().retry_delay));
            let retry_id = queue
                .schedule_single(run_at, &job.hook, job.args.clone(), &job.group)
                .await?;
            queue.complete(&job).await?;
            tracing::warn!(
                job_id = %job.id,
                retry_id = %retry_id,
                hook = %job.hook,
                run_at,
                error = %e,
                "Job failed, rescheduled"
            );
            metrics::counter!("classification_jobs_total", "result" => "retried").increment(1);
            JobRun::Retried(retry_id)
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, hook = %job.hook, error = %e, "Job failed permanently");
            queue.fail(&job).await?;
            metrics::counter!("classification_jobs_total", "result" => "failed").increment(1);
            JobRun::Failed
        }
    };

    sync.maybe_finish_full_sync().await?;
    Ok(run)
}

fn retry_delay_secs(delay: Duration) -> i64 {
    i64::try_from(delay.as_secs()).unwrap_or(i64::MAX)
}

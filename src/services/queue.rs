use async_trait::async_trait;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::models::job::{JobFilter, JobStatus, ScheduledJob};

const KEY_PREFIX: &str = "classification_sync";
const SCHEDULED_KEY: &str = "classification_sync:scheduled";
const PROCESSING_KEY: &str = "classification_sync:processing";
const ALL_JOBS_KEY: &str = "classification_sync:jobs";

/// Failed job records are kept this long for inspection.
const FAILED_JOB_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// A claimed job not completed or failed within this window goes back to the schedule.
const PROCESSING_LEASE_SECS: i64 = 15 * 60;

/// Records that turn out missing or undecodable are skipped up to this many times per claim.
const CLAIM_ATTEMPTS: usize = 5;

/// Takes the earliest due id off the schedule and moves its index entries to
/// `processing` in one step. Returns `{id, record}`, with an empty record when
/// the job record no longer exists, or nil when nothing is due.
///
/// KEYS: scheduled zset, processing zset, all-jobs set.
/// ARGV: now, key prefix, lease deadline.
const CLAIM_SCRIPT: &str = r#"
local id = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)[1]
if not id then
  return false
end
redis.call('ZREM', KEYS[1], id)

local job_key = ARGV[2] .. ':job:' .. id
local meta_key = job_key .. ':meta'
local group = redis.call('HGET', meta_key, 'group')
local signature = redis.call('HGET', meta_key, 'signature')
if signature then
  redis.call('SREM', signature, id)
end

local payload = redis.call('GET', job_key)
if not payload then
  if group then
    redis.call('SREM', ARGV[2] .. ':group:' .. group .. ':pending', id)
  end
  redis.call('SREM', KEYS[3], id)
  redis.call('DEL', meta_key)
  return {id, ''}
end

payload = string.gsub(payload, '"status":"pending"}$', '"status":"processing"}')
redis.call('SET', job_key, payload)
if group then
  redis.call('SMOVE', ARGV[2] .. ':group:' .. group .. ':pending', ARGV[2] .. ':group:' .. group .. ':processing', id)
end
redis.call('ZADD', KEYS[2], ARGV[3], id)
return {id, payload}
"#;

/// Puts every job whose processing lease ran out back on the schedule as
/// pending, due at `now`. Returns how many leases were released.
///
/// KEYS: processing zset, scheduled zset, all-jobs set.
/// ARGV: now, key prefix.
const RECLAIM_SCRIPT: &str = r#"
local stale = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(stale) do
  redis.call('ZREM', KEYS[1], id)

  local job_key = ARGV[2] .. ':job:' .. id
  local meta_key = job_key .. ':meta'
  local group = redis.call('HGET', meta_key, 'group')
  local payload = redis.call('GET', job_key)

  if payload then
    local signature = redis.call('HGET', meta_key, 'signature')
    redis.call('SET', job_key, (string.gsub(payload, '"status":"processing"}$', '"status":"pending"}')))
    if group then
      redis.call('SMOVE', ARGV[2] .. ':group:' .. group .. ':processing', ARGV[2] .. ':group:' .. group .. ':pending', id)
    end
    if signature then
      redis.call('SADD', signature, id)
    end
    redis.call('ZADD', KEYS[2], ARGV[1], id)
  else
    if group then
      redis.call('SREM', ARGV[2] .. ':group:' .. group .. ':processing', id)
    end
    redis.call('SREM', KEYS[3], id)
    redis.call('DEL', meta_key)
  end
end
return #stale
"#;

/// Durable at-least-once job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Schedule one job to run at `run_at` (epoch seconds).
    async fn schedule_single(
        &self,
        run_at: i64,
        hook: &str,
        args: serde_json::Value,
        group: &str,
    ) -> Result<Uuid, QueueError>;

    /// Ids of the jobs matching `filter`.
    async fn search(&self, filter: &JobFilter) -> Result<Vec<Uuid>, QueueError>;

    /// Claim the next job due at `now`, moving it to `processing`.
    async fn claim_due(&self, now: i64) -> Result<Option<ScheduledJob>, QueueError>;

    /// Remove a finished job.
    async fn complete(&self, job: &ScheduledJob) -> Result<(), QueueError>;

    /// Take a job out of the schedule for good, keeping it visible as `failed`.
    async fn fail(&self, job: &ScheduledJob) -> Result<(), QueueError>;

    /// Return jobs whose worker never finished them to the schedule.
    async fn reclaim_stale(&self, _now: i64) -> Result<usize, QueueError> {
        Ok(0)
    }
}

/// Redis-backed scheduled job queue.
///
/// Each job is a JSON record under `job:{id}` plus a `job:{id}:meta` hash with
/// its group and signature index key. Due times live in a sorted set,
/// and per-status and per-signature sets serve as search indexes. Claimed jobs
/// hold a lease in the `processing` sorted set until completed or failed.
pub struct RedisJobQueue {
    client: redis::Client,
    claim: redis::Script,
    reclaim: redis::Script,
}

fn job_key(id: &str) -> String {
    format!("{KEY_PREFIX}:job:{id}")
}

fn meta_key(id: &str) -> String {
    format!("{KEY_PREFIX}:job:{id}:meta")
}

fn status_key(group: &str, status: JobStatus) -> String {
    format!("{KEY_PREFIX}:group:{group}:{status}")
}

fn signature_key(group: &str, hook: &str, args: &serde_json::Value) -> String {
    format!("{KEY_PREFIX}:signature:{group}:{hook}:{args}")
}

impl RedisJobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            claim: redis::Script::new(CLAIM_SCRIPT),
            reclaim: redis::Script::new(RECLAIM_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Records for `ids`, plus the ids whose record no longer exists.
    async fn load_jobs(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        ids: &[String],
    ) -> Result<(Vec<ScheduledJob>, Vec<String>), QueueError> {
        if ids.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let keys: Vec<String> = ids.iter().map(|id| job_key(id)).collect();
        let payloads: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(conn)
            .await
            .map_err(QueueError::Redis)?;

        let mut jobs = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for (id, payload) in ids.iter().zip(payloads) {
            match payload {
                Some(payload) => jobs.push(serde_json::from_str(&payload).map_err(QueueError::Serialize)?),
                None => missing.push(id.clone()),
            }
        }
        Ok((jobs, missing))
    }

    /// Drop ids whose record expired or vanished from an index set.
    async fn prune_index(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        index: &str,
        missing: &[String],
    ) -> Result<(), QueueError> {
        if missing.is_empty() {
            return Ok(());
        }
        let _: () = conn.srem(index, missing).await.map_err(QueueError::Redis)?;
        tracing::debug!(index, pruned = missing.len(), "Pruned index entries without a job record");
        Ok(())
    }

    /// Remove every trace of a claimed job whose record cannot be used.
    async fn drop_job(&self, conn: &mut redis::aio::MultiplexedConnection, id: &str) -> Result<(), QueueError> {
        let group: Option<String> = conn.hget(meta_key(id), "group").await.map_err(QueueError::Redis)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(job_key(id))
            .ignore()
            .del(meta_key(id))
            .ignore()
            .zrem(PROCESSING_KEY, id)
            .ignore()
            .srem(ALL_JOBS_KEY, id)
            .ignore();
        if let Some(group) = group {
            pipe.srem(status_key(&group, JobStatus::Processing), id).ignore();
        }
        pipe.query_async::<()>(conn).await.map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Number of jobs waiting in the schedule.
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.zcard(SCHEDULED_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn schedule_single(
        &self,
        run_at: i64,
        hook: &str,
        args: serde_json::Value,
        group: &str,
    ) -> Result<Uuid, QueueError> {
        let mut conn = self.connection().await?;
        let job = ScheduledJob::new(run_at, hook, args, group);
        let id = job.id.to_string();
        let payload = serde_json::to_string(&job).map_err(QueueError::Serialize)?;
        let signature = signature_key(group, hook, &job.args);

        redis::pipe()
            .atomic()
            .set(job_key(&id), payload)
            .ignore()
            .hset_multiple(meta_key(&id), &[("group", group), ("signature", signature.as_str())])
            .ignore()
            .zadd(SCHEDULED_KEY, &id, run_at)
            .ignore()
            .sadd(ALL_JOBS_KEY, &id)
            .ignore()
            .sadd(status_key(group, JobStatus::Pending), &id)
            .ignore()
            .sadd(&signature, &id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        tracing::debug!(job_id = %job.id, hook, run_at, "Job scheduled");
        Ok(job.id)
    }

    async fn search(&self, filter: &JobFilter) -> Result<Vec<Uuid>, QueueError> {
        let mut conn = self.connection().await?;

        // Pick the narrowest index the filter allows, then check every record.
        let index = match (&filter.group, &filter.hook, &filter.args, filter.status) {
            (Some(group), Some(hook), Some(args), Some(JobStatus::Pending)) => signature_key(group, hook, args),
            (Some(group), _, _, Some(status)) => status_key(group, status),
            _ => ALL_JOBS_KEY.to_string(),
        };
        let candidates: Vec<String> = conn.smembers(&index).await.map_err(QueueError::Redis)?;

        let (jobs, missing) = self.load_jobs(&mut conn, &candidates).await?;
        self.prune_index(&mut conn, &index, &missing).await?;

        Ok(jobs
            .into_iter()
            .filter(|job| filter.matches(job))
            .map(|job| job.id)
            .collect())
    }

    /// The script runs atomically, so a crash never leaves a claimed id in the
    /// pending or signature indexes, and two workers never claim the same id.
    async fn claim_due(&self, now: i64) -> Result<Option<ScheduledJob>, QueueError> {
        let mut conn = self.connection().await?;

        for _ in 0..CLAIM_ATTEMPTS {
            let claimed: Option<(String, String)> = self
                .claim
                .key(SCHEDULED_KEY)
                .key(PROCESSING_KEY)
                .key(ALL_JOBS_KEY)
                .arg(now)
                .arg(KEY_PREFIX)
                .arg(now.saturating_add(PROCESSING_LEASE_SECS))
                .invoke_async(&mut conn)
                .await
                .map_err(QueueError::Redis)?;

            let Some((id, payload)) = claimed else {
                return Ok(None);
            };

            if payload.is_empty() {
                tracing::warn!(job_id = %id, "Scheduled job has no record, dropped");
                continue;
            }

            match serde_json::from_str::<ScheduledJob>(&payload) {
                Ok(job) => return Ok(Some(job)),
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "Undecodable job record, dropped");
                    self.drop_job(&mut conn, &id).await?;
                }
            }
        }

        Ok(None)
    }

    async fn complete(&self, job: &ScheduledJob) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let id = job.id.to_string();
        redis::pipe()
            .atomic()
            .del(job_key(&id))
            .ignore()
            .del(meta_key(&id))
            .ignore()
            .zrem(PROCESSING_KEY, &id)
            .ignore()
            .srem(status_key(&job.group, JobStatus::Processing), &id)
            .ignore()
            .srem(ALL_JOBS_KEY, &id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// The record expires after a week; the `failed` index is pruned of
    /// expired ids on every failure.
    async fn fail(&self, job: &ScheduledJob) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let id = job.id.to_string();
        let mut failed = job.clone();
        failed.status = JobStatus::Failed;
        let payload = serde_json::to_string(&failed).map_err(QueueError::Serialize)?;
        let failed_key = status_key(&job.group, JobStatus::Failed);

        redis::pipe()
            .atomic()
            .set(job_key(&id), payload)
            .ignore()
            .expire(job_key(&id), FAILED_JOB_TTL_SECS)
            .ignore()
            .del(meta_key(&id))
            .ignore()
            .zrem(PROCESSING_KEY, &id)
            .ignore()
            .srem(ALL_JOBS_KEY, &id)
            .ignore()
            .smove(status_key(&job.group, JobStatus::Processing), &failed_key, &id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        let ids: Vec<String> = conn.smembers(&failed_key).await.map_err(QueueError::Redis)?;
        let (_, expired) = self.load_jobs(&mut conn, &ids).await?;
        self.prune_index(&mut conn, &failed_key, &expired).await
    }

    async fn reclaim_stale(&self, now: i64) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let reclaimed: usize = self
            .reclaim
            .key(PROCESSING_KEY)
            .key(SCHEDULED_KEY)
            .key(ALL_JOBS_KEY)
            .arg(now)
            .arg(KEY_PREFIX)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        if reclaimed > 0 {
            tracing::warn!(reclaimed, "Released expired processing leases");
        }
        Ok(reclaimed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_index_keys() {
        assert_eq!(
            status_key("classification_sync", JobStatus::Pending),
            "classification_sync:group:classification_sync:pending"
        );
        assert_eq!(
            signature_key("g", "process_full_sync", &json!({ "batch": 2 })),
            "classification_sync:signature:g:process_full_sync:{\"batch\":2}"
        );
        assert_eq!(meta_key("42"), "classification_sync:job:42:meta");
    }

    #[test]
    fn test_record_ends_with_status_rewritten_by_scripts() {
        let job = ScheduledJob::new(0, "process_enqueued_product", json!({ "product": { "status": "pending" } }), "g");
        let payload = serde_json::to_string(&job).unwrap();
        assert!(payload.ends_with(r#""status":"pending"}"#));

        let claimed = format!("{}\"status\":\"processing\"}}", &payload[..payload.len() - r#""status":"pending"}"#.len()]);
        let decoded: ScheduledJob = serde_json::from_str(&claimed).unwrap();
        assert_eq!(decoded.status, JobStatus::Processing);
        assert_eq!(decoded.args, job.args);
    }
}

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Hook name of the job that processes a single classification unit.
pub const PRODUCT_SYNC_HOOK: &str = "process_enqueued_product";

/// Hook name of the job that walks one batch of the catalog.
pub const FULL_SYNC_HOOK: &str = "process_full_sync";

/// Group shared by every classification sync job.
pub const SYNC_GROUP: &str = "classification_sync";

/// Status of a job in the durable queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A job persisted in the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub hook: String,
    pub args: serde_json::Value,
    pub group: String,
    /// Epoch seconds at which the job becomes due.
    pub run_at: i64,
    pub status: JobStatus,
}

impl ScheduledJob {
    pub fn new(run_at: i64, hook: &str, args: serde_json::Value, group: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            hook: hook.to_string(),
            args,
            group: group.to_string(),
            run_at,
            status: JobStatus::Pending,
        }
    }
}

/// Search criteria for [`crate::services::queue::JobQueue::search`]. Absent fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub hook: Option<String>,
    pub args: Option<serde_json::Value>,
    pub group: Option<String>,
    pub status: Option<JobStatus>,
}

impl JobFilter {
    pub fn matches(&self, job: &ScheduledJob) -> bool {
        self.hook.as_deref().map_or(true, |hook| hook == job.hook)
            && self.args.as_ref().map_or(true, |args| *args == job.args)
            && self.group.as_deref().map_or(true, |group| group == job.group)
            && self.status.map_or(true, |status| status == job.status)
    }
}

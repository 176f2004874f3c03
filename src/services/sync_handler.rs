//! Classification synchronization engine.
//!
//! Decides which catalog items need (re)classification, schedules that work on
//! the durable job queue, walks the whole catalog in batches, and keeps the
//! on/off state, the pending bucket and the error/resolution buckets in the
//! state store.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use garde::Validate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::{ApiEnvironment, FixedWaitTime, SyncConfig, WaitTimeStrategy};
use crate::models::classification::{
    ClassificationItem, ClassificationParameter, ClassificationRequest, ClassificationResponse, ClassificationStatus,
};
use crate::models::job::{JobFilter, JobStatus, ScheduledJob, FULL_SYNC_HOOK, PRODUCT_SYNC_HOOK, SYNC_GROUP};
use crate::models::product::{CatalogItem, ItemKind, ItemSnapshot, ProductChanges};
use crate::models::unit::{EnqueuedClassificationUnit, SyncAction};
use crate::services::catalog::{Catalog, CatalogError};
use crate::services::change_tracker::ChangeTracker;
use crate::services::classifier::{ClassificationClient, ClassifierError};
use crate::services::queue::{JobQueue, QueueError};
use crate::services::state_store::{StateStore, StateStoreError};

pub const SYNCING_ENABLED_KEY: &str = "syncing_enabled";
pub const FULL_SYNC_ACTIVE_KEY: &str = "full_sync_active";
pub const FULL_SYNC_BATCH_KEY: &str = "full_sync_batch";
pub const PENDING_BUCKET_KEY: &str = "products_pending_sync";
pub const ERROR_BUCKET_KEY: &str = "products_with_sync_errors";
pub const RESOLUTION_BUCKET_KEY: &str = "products_with_sync_resolutions";
pub const NOTICES_KEY: &str = "notices";

pub const FULL_SYNC_FINISHED_NOTICE: &str = "Your catalog is synced! Cross-border calculations can now take place at \
     checkout. Catalog updates will be synced as you add, update, or delete products.";

/// Units keyed by product id; the latest write for a product wins.
type Bucket = BTreeMap<i64, serde_json::Value>;

/// What a job invocation ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Nothing to do: item gone, unsupported country, invalid data or unknown status.
    Skipped,
    /// Syncing is off; the unit went to the pending bucket.
    Deferred,
    /// A sync unit or a catalog batch scheduled this many units.
    Enqueued(usize),
    /// The service accepted the request; the classification id was stored.
    Pending,
    /// The HS code was stored.
    Classified,
    /// The service cannot classify the item; stored in the resolution bucket.
    Unclassifiable,
    /// Request failed; stored in the error bucket.
    Failed,
    /// Authorization failure; syncing stopped and the unit stored in the error bucket.
    CircuitBroken,
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Skipped => "skipped",
            JobOutcome::Deferred => "deferred",
            JobOutcome::Enqueued(_) => "enqueued",
            JobOutcome::Pending => "pending",
            JobOutcome::Classified => "classified",
            JobOutcome::Unclassifiable => "cannot_be_classified",
            JobOutcome::Failed => "error",
            JobOutcome::CircuitBroken => "circuit_broken",
        }
    }
}

/// Operator view of the sync state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SyncStatus {
    pub syncing_enabled: bool,
    pub full_sync_active: bool,
    pub full_sync_batch: Option<u32>,
    pub pending_jobs: usize,
    pub products_pending_sync: usize,
    pub products_with_errors: usize,
    pub products_with_resolutions: usize,
    pub notices: Vec<String>,
}

/// Whether a catalog page of `len` items may be followed by another one.
pub fn has_more_pages(len: usize, limit: u32) -> bool {
    len as u64 >= u64::from(limit)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn product_args(unit: &EnqueuedClassificationUnit) -> serde_json::Value {
    json!({ "product": unit.to_payload() })
}

fn decode_units(payloads: impl IntoIterator<Item = serde_json::Value>, source: &str) -> Vec<EnqueuedClassificationUnit> {
    payloads
        .into_iter()
        .filter_map(|payload| match EnqueuedClassificationUnit::from_payload(&payload) {
            Ok(unit) => Some(unit),
            Err(e) => {
                tracing::warn!(source, error = %e, payload = %payload, "Dropping undecodable unit");
                None
            }
        })
        .collect()
}

/// The sync orchestrator. Collaborators are injected; it holds no global state.
pub struct SyncHandler {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn StateStore>,
    catalog: Arc<dyn Catalog>,
    classifier: Arc<dyn ClassificationClient>,
    config: SyncConfig,
    wait_time: Box<dyn WaitTimeStrategy>,
    changes: ChangeTracker,
}

impl SyncHandler {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn StateStore>,
        catalog: Arc<dyn Catalog>,
        classifier: Arc<dyn ClassificationClient>,
        config: SyncConfig,
    ) -> Self {
        let wait_time = Box::new(FixedWaitTime(config.wait_time));
        Self {
            queue,
            store,
            catalog,
            classifier,
            config,
            wait_time,
            changes: ChangeTracker::new(),
        }
    }

    /// Replace the per-unit resync delay.
    pub fn with_wait_time_strategy(mut self, strategy: impl WaitTimeStrategy + 'static) -> Self {
        self.wait_time = Box::new(strategy);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn change_tracker(&self) -> &ChangeTracker {
        &self.changes
    }

    async fn read_json<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, SyncError> {
        let Some(value) = self.store.get(key).await? else {
            return Ok(T::default());
        };
        Ok(serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "Ignoring malformed sync state value");
            T::default()
        }))
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SyncError> {
        self.store.set(key, serde_json::to_value(value)?).await?;
        Ok(())
    }

    // ---- lifecycle ----

    pub async fn is_syncing_active(&self) -> Result<bool, SyncError> {
        self.read_json(SYNCING_ENABLED_KEY).await
    }

    pub async fn is_full_syncing_active(&self) -> Result<bool, SyncError> {
        self.read_json(FULL_SYNC_ACTIVE_KEY).await
    }

    /// Flip syncing on or off. Turning it on starts a full sync and drains the
    /// pending bucket. Returns the new state.
    pub async fn toggle_syncing(&self) -> Result<bool, SyncError> {
        let enabled = !self.is_syncing_active().await?;
        self.write_json(SYNCING_ENABLED_KEY, &enabled).await?;

        if enabled {
            self.enqueue_full_sync(1).await;
            self.maybe_start_full_sync().await?;
            let drained = self.maybe_enqueue_pending_products().await?;
            tracing::info!(pending_enqueued = drained.len(), "Classification syncing turned on");
        } else {
            tracing::info!("Classification syncing turned off");
        }

        Ok(enabled)
    }

    /// Hard off, used as the circuit breaker. Never schedules anything.
    pub async fn stop_syncing(&self) -> Result<(), SyncError> {
        if self.is_syncing_active().await? {
            self.write_json(SYNCING_ENABLED_KEY, &false).await?;
            tracing::warn!("Classification syncing stopped");
        }
        Ok(())
    }

    async fn maybe_start_full_sync(&self) -> Result<(), SyncError> {
        if !self.is_full_syncing_active().await? {
            self.write_json(FULL_SYNC_ACTIVE_KEY, &true).await?;
        }
        Ok(())
    }

    /// Re-enqueue everything received while syncing was off, then clear the bucket.
    async fn maybe_enqueue_pending_products(&self) -> Result<Vec<EnqueuedClassificationUnit>, SyncError> {
        let pending: Vec<serde_json::Value> = self.read_json(PENDING_BUCKET_KEY).await?;
        let units = decode_units(pending, PENDING_BUCKET_KEY);
        let enqueued = self.enqueue_products(units).await;
        self.write_json(PENDING_BUCKET_KEY, &Vec::<serde_json::Value>::new()).await?;
        Ok(enqueued)
    }

    /// Notify the operator once no sync job is pending anymore. Returns whether
    /// the full sync was finished by this call.
    pub async fn maybe_finish_full_sync(&self) -> Result<bool, SyncError> {
        if !self.is_full_syncing_active().await? {
            return Ok(false);
        }

        let outstanding = self.count_outstanding_sync_jobs().await?;
        if outstanding > 0 {
            tracing::debug!(outstanding, "Full sync still has outstanding jobs");
            return Ok(false);
        }

        self.add_notice(FULL_SYNC_FINISHED_NOTICE).await?;
        self.write_json(FULL_SYNC_ACTIVE_KEY, &false).await?;
        self.store.delete(FULL_SYNC_BATCH_KEY).await?;
        tracing::info!("Full catalog sync finished");
        Ok(true)
    }

    pub async fn count_pending_sync_jobs(&self) -> Result<usize, SyncError> {
        self.count_sync_jobs(JobStatus::Pending).await
    }

    /// Pending jobs plus the ones a worker holds but has not finished. A claimed
    /// job left behind by a crashed worker counts until its lease is reclaimed.
    async fn count_outstanding_sync_jobs(&self) -> Result<usize, SyncError> {
        Ok(self.count_sync_jobs(JobStatus::Pending).await? + self.count_sync_jobs(JobStatus::Processing).await?)
    }

    async fn count_sync_jobs(&self, status: JobStatus) -> Result<usize, SyncError> {
        let filter = JobFilter {
            group: Some(SYNC_GROUP.to_string()),
            status: Some(status),
            ..Default::default()
        };
        Ok(self.queue.search(&filter).await?.len())
    }

    async fn add_notice(&self, notice: &str) -> Result<(), SyncError> {
        let mut notices: Vec<String> = self.read_json(NOTICES_KEY).await?;
        if !notices.iter().any(|n| n == notice) {
            notices.push(notice.to_string());
            self.write_json(NOTICES_KEY, &notices).await?;
        }
        Ok(())
    }

    pub async fn dismiss_notices(&self) -> Result<(), SyncError> {
        self.store.delete(NOTICES_KEY).await?;
        Ok(())
    }

    pub async fn sync_status(&self) -> Result<SyncStatus, SyncError> {
        let pending: Vec<serde_json::Value> = self.read_json(PENDING_BUCKET_KEY).await?;
        let errors: Bucket = self.read_json(ERROR_BUCKET_KEY).await?;
        let resolutions: Bucket = self.read_json(RESOLUTION_BUCKET_KEY).await?;

        Ok(SyncStatus {
            syncing_enabled: self.is_syncing_active().await?,
            full_sync_active: self.is_full_syncing_active().await?,
            full_sync_batch: self.read_json(FULL_SYNC_BATCH_KEY).await?,
            pending_jobs: self.count_pending_sync_jobs().await?,
            products_pending_sync: pending.len(),
            products_with_errors: errors.len(),
            products_with_resolutions: resolutions.len(),
            notices: self.read_json(NOTICES_KEY).await?,
        })
    }

    // ---- enqueue & dedup ----

    /// Best-effort check for an identical pending job. Racy across workers.
    pub async fn is_product_scheduled(&self, unit: &EnqueuedClassificationUnit) -> Result<bool, QueueError> {
        let filter = JobFilter {
            hook: Some(PRODUCT_SYNC_HOOK.to_string()),
            args: Some(product_args(unit)),
            group: Some(SYNC_GROUP.to_string()),
            status: Some(JobStatus::Pending),
        };
        Ok(!self.queue.search(&filter).await?.is_empty())
    }

    /// Schedule every unit not already pending. Returns the units actually scheduled;
    /// queue failures are logged and leave the unit out.
    pub async fn enqueue_products(&self, units: Vec<EnqueuedClassificationUnit>) -> Vec<EnqueuedClassificationUnit> {
        let mut enqueued = Vec::with_capacity(units.len());

        for unit in units {
            match self.is_product_scheduled(&unit).await {
                Ok(true) => {
                    tracing::debug!(
                        product_id = unit.product_id,
                        country = %unit.country_of_destination,
                        action = %unit.action,
                        "Unit already scheduled"
                    );
                    metrics::counter!("classification_units_skipped_total").increment(1);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(product_id = unit.product_id, error = %e, "Failed to look up scheduled jobs");
                    continue;
                }
            }

            let run_at = unit.timestamp.unwrap_or_else(now);
            match self
                .queue
                .schedule_single(run_at, PRODUCT_SYNC_HOOK, product_args(&unit), SYNC_GROUP)
                .await
            {
                Ok(job_id) => {
                    tracing::debug!(
                        job_id = %job_id,
                        product_id = unit.product_id,
                        country = %unit.country_of_destination,
                        action = %unit.action,
                        run_at,
                        "Unit enqueued"
                    );
                    metrics::counter!("classification_units_enqueued_total").increment(1);
                    enqueued.push(unit);
                }
                Err(e) => {
                    tracing::error!(product_id = unit.product_id, error = %e, "Failed to enqueue unit");
                }
            }
        }

        enqueued
    }

    /// Schedule catalog batch `batch`. No-op without destination countries.
    pub async fn enqueue_full_sync(&self, batch: u32) -> Option<Uuid> {
        if !self.config.has_countries() {
            tracing::debug!("No destination countries configured, full sync not scheduled");
            return None;
        }

        match self
            .queue
            .schedule_single(now(), FULL_SYNC_HOOK, json!({ "batch": batch }), SYNC_GROUP)
            .await
        {
            Ok(job_id) => {
                tracing::info!(batch, job_id = %job_id, "Full sync batch scheduled");
                Some(job_id)
            }
            Err(e) => {
                tracing::error!(batch, error = %e, "Failed to schedule full sync batch");
                None
            }
        }
    }

    // ---- batch walk ----

    /// Process catalog page `batch`: schedule the next page when this one is
    /// full, then enqueue a `sync` unit per item.
    pub async fn handle_full_sync(&self, batch: u32) -> Result<Vec<EnqueuedClassificationUnit>, SyncError> {
        let limit = self.config.batch_size;
        let ids = self.catalog.list_items(&ItemKind::ALL, limit, batch).await?;
        self.write_json(FULL_SYNC_BATCH_KEY, &batch).await?;

        tracing::info!(batch, items = ids.len(), limit, "Processing full sync batch");
        metrics::counter!("classification_sync_batches_total").increment(1);

        if has_more_pages(ids.len(), limit) {
            self.enqueue_full_sync(batch + 1).await;
        }

        let units = ids.into_iter().map(EnqueuedClassificationUnit::sync).collect();
        Ok(self.enqueue_products(units).await)
    }

    /// Job handler for one scheduled unit.
    pub async fn handle_enqueued_product(&self, unit: &EnqueuedClassificationUnit) -> Result<JobOutcome, SyncError> {
        let outcome = if self.is_syncing_active().await? {
            self.process_product(unit).await?
        } else {
            self.defer_product(unit).await?;
            JobOutcome::Deferred
        };

        metrics::counter!("classification_responses_total", "outcome" => outcome.label()).increment(1);

        // throttle requests to the classification service
        if !self.config.pause.is_zero() {
            tokio::time::sleep(self.config.pause).await;
        }

        Ok(outcome)
    }

    /// Dispatch a job claimed from the queue.
    pub async fn run_job(&self, job: &ScheduledJob) -> Result<JobOutcome, SyncError> {
        match job.hook.as_str() {
            FULL_SYNC_HOOK => {
                let batch = job
                    .args
                    .get("batch")
                    .and_then(serde_json::Value::as_u64)
                    .and_then(|b| u32::try_from(b).ok())
                    .filter(|b| *b > 0)
                    .ok_or_else(|| SyncError::InvalidArgs(job.args.to_string()))?;
                let enqueued = self.handle_full_sync(batch).await?;
                Ok(JobOutcome::Enqueued(enqueued.len()))
            }
            PRODUCT_SYNC_HOOK => {
                let payload = job
                    .args
                    .get("product")
                    .ok_or_else(|| SyncError::InvalidArgs(job.args.to_string()))?;
                let unit = EnqueuedClassificationUnit::from_payload(payload)?;
                self.handle_enqueued_product(&unit).await
            }
            other => Err(SyncError::UnknownHook(other.to_string())),
        }
    }

    async fn defer_product(&self, unit: &EnqueuedClassificationUnit) -> Result<(), SyncError> {
        let mut pending: Vec<serde_json::Value> = self.read_json(PENDING_BUCKET_KEY).await?;
        pending.push(unit.to_payload());
        self.write_json(PENDING_BUCKET_KEY, &pending).await?;
        tracing::debug!(product_id = unit.product_id, action = %unit.action, "Syncing off, unit kept as pending");
        Ok(())
    }

    async fn process_product(&self, unit: &EnqueuedClassificationUnit) -> Result<JobOutcome, SyncError> {
        let Some(item) = self.catalog.find_item(unit.product_id).await? else {
            tracing::debug!(product_id = unit.product_id, "Item not found, possibly deleted");
            return Ok(JobOutcome::Skipped);
        };

        match unit.action {
            SyncAction::Sync => self.process_sync_action(&item).await,
            SyncAction::Create | SyncAction::Update | SyncAction::Get => {
                self.process_classification_action(unit, &item).await
            }
        }
    }

    async fn process_sync_action(&self, item: &CatalogItem) -> Result<JobOutcome, SyncError> {
        let countries = self.countries_for_full_sync(item).await?;
        let units = self.classification_units(item, &countries).await?;
        let enqueued = self.enqueue_products(units).await;
        Ok(JobOutcome::Enqueued(enqueued.len()))
    }

    /// `create` units for the item, and its variations, in every country that needs one.
    async fn classification_units(
        &self,
        item: &CatalogItem,
        countries: &[String],
    ) -> Result<Vec<EnqueuedClassificationUnit>, SyncError> {
        let mut units = Vec::new();
        for country in countries {
            let Some(action) = self.product_sync_action(item, country).await? else {
                continue;
            };
            units.push(EnqueuedClassificationUnit::new(item.id, country.clone(), action));

            // variations are reclassified with their parent whether or not they changed
            if item.is_variable() {
                units.extend(
                    item.children
                        .iter()
                        .map(|child| EnqueuedClassificationUnit::new(*child, country.clone(), action)),
                );
            }
        }
        Ok(units)
    }

    /// `create` when the item has no classification for the country or was flagged as changed.
    pub async fn product_sync_action(&self, item: &CatalogItem, country: &str) -> Result<Option<SyncAction>, SyncError> {
        let classification_id = self.catalog.classification_id(item.id, country).await?;
        if classification_id.map_or(true, |id| id.is_empty()) || self.changes.is_flagged(item.id) {
            return Ok(Some(SyncAction::Create));
        }
        Ok(None)
    }

    /// Countries the item still needs classifying for. Existing remote
    /// classifications are recorded locally along the way.
    async fn countries_for_full_sync(&self, item: &CatalogItem) -> Result<Vec<String>, SyncError> {
        let countries = self.config.optimized_countries();

        let remote = match self.classifier.query_item(&item.id.to_string()).await {
            Ok(Some(remote)) => remote,
            Ok(None) => return Ok(countries),
            Err(e) => {
                tracing::warn!(product_id = item.id, error = %e, "Remote item lookup failed");
                return Ok(countries);
            }
        };

        if let Some(tax_code) = remote.tax_code.as_deref().filter(|c| !c.is_empty()) {
            self.catalog.save_tax_code(item.id, tax_code).await?;
        }

        let groups = self.config.countries_by_system();
        if groups.is_empty() {
            return Ok(countries);
        }

        let classified: HashSet<&str> = remote.classifications.iter().map(|c| c.system_code.as_str()).collect();
        let mut missing = Vec::new();
        for (system, members) in &groups {
            if !classified.contains(system.as_str()) {
                missing.extend(members.first().cloned());
                continue;
            }
            for country in members {
                if self.catalog.classification_id(item.id, country).await?.is_none() {
                    let id = self.generate_classification_id(item.id, country);
                    self.catalog.save_classification_id(item.id, country, &id).await?;
                }
            }
        }
        Ok(missing)
    }

    fn generate_classification_id(&self, item_id: i64, country: &str) -> String {
        format!("{}-{}-{}", self.config.company_id, item_id, country)
    }

    // ---- catalog edits ----

    /// Pre-update detector entry point.
    pub fn flag_updated_item(&self, item_id: i64, stored: &ItemSnapshot, incoming: &ItemSnapshot) -> bool {
        self.changes.flag_updated_item(item_id, stored, incoming)
    }

    /// Catalog-edit hook: enqueue the saved item (and its variations) for every
    /// country that needs a new classification.
    pub async fn maybe_enqueue_saved_product(
        &self,
        item_id: i64,
        changes: &ProductChanges,
    ) -> Result<Vec<EnqueuedClassificationUnit>, SyncError> {
        let Some(item) = self.catalog.find_item(item_id).await? else {
            return Ok(Vec::new());
        };

        self.changes.flag_product_changes(item_id, changes);
        let units = self.classification_units(&item, &self.config.optimized_countries()).await;
        self.changes.clear(item_id);

        Ok(self.enqueue_products(units?).await)
    }

    // ---- classification ----

    async fn process_classification_action(
        &self,
        unit: &EnqueuedClassificationUnit,
        item: &CatalogItem,
    ) -> Result<JobOutcome, SyncError> {
        let country = unit.country_of_destination.as_str();
        if !self.config.is_supported_country(country) {
            tracing::warn!(product_id = item.id, country, "Destination country not supported, skipping");
            return Ok(JobOutcome::Skipped);
        }

        if let Err(report) = item.validate() {
            tracing::warn!(product_id = item.id, country, error = %report, "Item data invalid for classification");
            return Ok(JobOutcome::Skipped);
        }

        let request = self.build_request(item, country).await?;
        let result = match unit.action {
            SyncAction::Get => self.classifier.get(&request).await,
            _ => self.classifier.create_or_update(&request).await,
        };

        self.handle_response(unit, item, result).await
    }

    /// Classification request for an item and destination.
    pub async fn build_request(&self, item: &CatalogItem, country: &str) -> Result<ClassificationRequest, SyncError> {
        let classification_id = self.catalog.classification_id(item.id, country).await?;

        let mut parameters = Vec::new();
        // variations inherit their parent's HS code in the sandbox
        if self.config.environment == ApiEnvironment::Development && !item.is_variation() {
            if let Some(code) = self.config.test_hs_code.as_deref() {
                parameters.push(ClassificationParameter {
                    name: "hs_code_test".to_string(),
                    value: code.to_string(),
                });
            }
        }
        if let Some(tax_code) = item
            .tax_code
            .as_deref()
            .filter(|c| !c.is_empty() && !self.config.is_reserved_tax_code(c))
        {
            parameters.push(ClassificationParameter {
                name: "tax_code".to_string(),
                value: tax_code.to_string(),
            });
        }

        let description = if item.description.trim().is_empty() {
            item.short_description.clone()
        } else {
            item.description.clone()
        };

        Ok(ClassificationRequest {
            id: classification_id,
            country_of_destination: country.to_string(),
            item: ClassificationItem {
                company_id: self.config.company_id.clone(),
                item_code: item.id.to_string(),
                summary: item.name.clone(),
                description,
                item_group: item
                    .category_ids
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(">"),
                parent_code: item.parent_id.map(|id| id.to_string()),
                classification_parameters: parameters,
            },
        })
    }

    async fn handle_response(
        &self,
        unit: &EnqueuedClassificationUnit,
        item: &CatalogItem,
        result: Result<ClassificationResponse, ClassifierError>,
    ) -> Result<JobOutcome, SyncError> {
        let response = match result {
            Ok(response) => response,
            Err(ClassifierError::Validation(message)) => {
                tracing::warn!(
                    product_id = item.id,
                    country = %unit.country_of_destination,
                    error = %message,
                    "Classification request rejected, skipping"
                );
                return Ok(JobOutcome::Skipped);
            }
            Err(e) => return self.handle_error(unit, &e.to_string(), e.is_authorization()).await,
        };

        if response.has_errors() {
            return self
                .handle_error(unit, &response.error_summary(), response.has_auth_error())
                .await;
        }

        let country = response
            .country_of_destination
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| unit.country_of_destination.clone());

        match response.status {
            ClassificationStatus::Pending => {
                let classification_id = response
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| self.generate_classification_id(item.id, &country));
                self.catalog
                    .save_classification_id(item.id, &country, &classification_id)
                    .await?;
                tracing::info!(product_id = item.id, country = %country, classification_id = %classification_id, "Classification pending");
                Ok(JobOutcome::Pending)
            }
            ClassificationStatus::CannotBeClassified => {
                let resolution = response.resolution.unwrap_or_default();
                tracing::info!(product_id = item.id, country = %country, resolution = %resolution, "Item cannot be classified");
                let mut unit = unit.clone();
                if !resolution.is_empty() {
                    unit = unit.with_resolution(resolution);
                }
                self.store_product_that_cannot_be_classified(&unit).await?;
                Ok(JobOutcome::Unclassifiable)
            }
            ClassificationStatus::Classified => match response.hs_code.filter(|code| !code.is_empty()) {
                Some(hs_code) => {
                    self.catalog.save_hs_code(item.id, &country, &hs_code).await?;
                    tracing::info!(product_id = item.id, country = %country, hs_code = %hs_code, "Item classified");
                    Ok(JobOutcome::Classified)
                }
                None => {
                    tracing::warn!(product_id = item.id, country = %country, "Classified response without HS code");
                    Ok(JobOutcome::Skipped)
                }
            },
            ClassificationStatus::Error | ClassificationStatus::Unknown => {
                tracing::debug!(product_id = item.id, country = %country, status = ?response.status, "Unhandled classification status");
                Ok(JobOutcome::Skipped)
            }
        }
    }

    async fn handle_error(
        &self,
        unit: &EnqueuedClassificationUnit,
        message: &str,
        authorization: bool,
    ) -> Result<JobOutcome, SyncError> {
        tracing::error!(
            product_id = unit.product_id,
            country = %unit.country_of_destination,
            action = %unit.action,
            error = %message,
            "Classification request failed"
        );

        // retrying with bad credentials only fills the queue with doomed jobs
        if authorization {
            self.stop_syncing().await?;
            tracing::error!(
                "Cross-border product sync stopped. Valid credentials and an active classification subscription are required."
            );
        }

        self.store_error_product(&unit.clone().with_error_message(message)).await?;

        Ok(if authorization {
            JobOutcome::CircuitBroken
        } else {
            JobOutcome::Failed
        })
    }

    // ---- buckets ----

    pub async fn store_error_product(&self, unit: &EnqueuedClassificationUnit) -> Result<(), SyncError> {
        self.store_product_for_later_resync(unit, ERROR_BUCKET_KEY).await
    }

    pub async fn store_product_that_cannot_be_classified(&self, unit: &EnqueuedClassificationUnit) -> Result<(), SyncError> {
        self.store_product_for_later_resync(unit, RESOLUTION_BUCKET_KEY).await
    }

    async fn store_product_for_later_resync(&self, unit: &EnqueuedClassificationUnit, key: &str) -> Result<(), SyncError> {
        let mut bucket: Bucket = self.read_json(key).await?;
        bucket.insert(unit.product_id, unit.to_payload());
        self.write_json(key, &bucket).await
    }

    pub async fn products_with_errors(&self) -> Result<Vec<EnqueuedClassificationUnit>, SyncError> {
        let bucket: Bucket = self.read_json(ERROR_BUCKET_KEY).await?;
        Ok(decode_units(bucket.into_values(), ERROR_BUCKET_KEY))
    }

    pub async fn products_with_resolutions(&self) -> Result<Vec<EnqueuedClassificationUnit>, SyncError> {
        let bucket: Bucket = self.read_json(RESOLUTION_BUCKET_KEY).await?;
        Ok(decode_units(bucket.into_values(), RESOLUTION_BUCKET_KEY))
    }

    /// Re-enqueue both buckets with a delay, then clear them. Entries that fail
    /// to enqueue are dropped too.
    pub async fn resync_products_with_errors(&self) -> Result<Vec<EnqueuedClassificationUnit>, SyncError> {
        let mut units = self.products_with_errors().await?;
        units.extend(self.products_with_resolutions().await?);

        let now = now();
        let units: Vec<EnqueuedClassificationUnit> = units
            .into_iter()
            .map(|unit| {
                let wait = i64::try_from(self.wait_time.wait_time(&unit).as_secs()).unwrap_or(i64::MAX);
                unit.with_timestamp(now.saturating_add(wait))
            })
            .collect();
        let total = units.len();

        let enqueued = self.enqueue_products(units).await;

        self.write_json(ERROR_BUCKET_KEY, &Bucket::new()).await?;
        self.write_json(RESOLUTION_BUCKET_KEY, &Bucket::new()).await?;

        tracing::info!(total, enqueued = enqueued.len(), "Resynced products with errors");
        Ok(enqueued)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("State store error: {0}")]
    State(#[from] StateStoreError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Invalid job arguments: {0}")]
    InvalidArgs(String),

    #[error("Unknown job hook: {0}")]
    UnknownHook(String),
}

impl SyncError {
    /// Storage and queue failures may clear up on a later run; malformed jobs never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::State(_) | SyncError::Catalog(_) | SyncError::Queue(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_more_pages_only_for_full_pages() {
        assert!(has_more_pages(1000, 1000));
        assert!(!has_more_pages(999, 1000));
        assert!(!has_more_pages(0, 1000));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(JobOutcome::Unclassifiable.label(), "cannot_be_classified");
        assert_eq!(JobOutcome::Enqueued(3).label(), "enqueued");
    }
}

//! In-memory collaborators for driving the sync engine without Redis,
//! PostgreSQL or the classification service.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use classification_sync::config::SyncConfig;
use classification_sync::models::classification::{
    ClassificationRequest, ClassificationResponse, ClassificationStatus, RemoteItem,
};
use classification_sync::models::job::{JobFilter, JobStatus, ScheduledJob, PRODUCT_SYNC_HOOK};
use classification_sync::models::product::{CatalogItem, ItemKind};
use classification_sync::models::unit::EnqueuedClassificationUnit;
use classification_sync::services::catalog::{Catalog, CatalogError};
use classification_sync::services::classifier::{ClassificationClient, ClassifierError};
use classification_sync::services::queue::{JobQueue, QueueError};
use classification_sync::services::state_store::{StateStore, StateStoreError};
use classification_sync::services::sync_handler::{JobOutcome, SyncHandler};

pub const COMPANY_ID: &str = "ACME";

/// Job queue kept in a vector, in scheduling order.
#[derive(Default)]
pub struct MemoryQueue {
    jobs: Mutex<Vec<ScheduledJob>>,
}

impl MemoryQueue {
    pub fn jobs(&self) -> Vec<ScheduledJob> {
        self.jobs.lock().clone()
    }

    pub fn pending(&self) -> Vec<ScheduledJob> {
        self.jobs
            .lock()
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .cloned()
            .collect()
    }

    /// Pending units scheduled for the product hook.
    pub fn pending_units(&self) -> Vec<EnqueuedClassificationUnit> {
        self.pending()
            .into_iter()
            .filter(|job| job.hook == PRODUCT_SYNC_HOOK)
            .filter_map(|job| EnqueuedClassificationUnit::from_payload(&job.args["product"]).ok())
            .collect()
    }

    pub fn status(&self, id: Uuid) -> Option<JobStatus> {
        self.jobs.lock().iter().find(|job| job.id == id).map(|job| job.status)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn schedule_single(
        &self,
        run_at: i64,
        hook: &str,
        args: serde_json::Value,
        group: &str,
    ) -> Result<Uuid, QueueError> {
        let job = ScheduledJob::new(run_at, hook, args, group);
        let id = job.id;
        self.jobs.lock().push(job);
        Ok(id)
    }

    async fn search(&self, filter: &JobFilter) -> Result<Vec<Uuid>, QueueError> {
        Ok(self
            .jobs
            .lock()
            .iter()
            .filter(|job| filter.matches(job))
            .map(|job| job.id)
            .collect())
    }

    /// Earliest scheduled pending job due at `now`.
    async fn claim_due(&self, now: i64) -> Result<Option<ScheduledJob>, QueueError> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs
            .iter_mut()
            .find(|job| job.status == JobStatus::Pending && job.run_at <= now)
        else {
            return Ok(None);
        };
        job.status = JobStatus::Processing;
        Ok(Some(job.clone()))
    }

    async fn complete(&self, job: &ScheduledJob) -> Result<(), QueueError> {
        self.jobs.lock().retain(|queued| queued.id != job.id);
        Ok(())
    }

    async fn fail(&self, job: &ScheduledJob) -> Result<(), QueueError> {
        if let Some(queued) = self.jobs.lock().iter_mut().find(|queued| queued.id == job.id) {
            queued.status = JobStatus::Failed;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn value(&self, key: &str) -> Option<serde_json::Value> {
        self.values.lock().get(key).cloned()
    }

    pub fn put(&self, key: &str, value: serde_json::Value) {
        self.values.lock().insert(key.to_string(), value);
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StateStoreError> {
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StateStoreError> {
        self.put(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        self.values.lock().remove(key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    items: Mutex<BTreeMap<i64, CatalogItem>>,
    classification_ids: Mutex<HashMap<(i64, String), String>>,
    hs_codes: Mutex<HashMap<(i64, String), String>>,
}

impl MemoryCatalog {
    pub fn insert(&self, item: CatalogItem) {
        self.items.lock().insert(item.id, item);
    }

    pub fn remove(&self, item_id: i64) {
        self.items.lock().remove(&item_id);
    }

    pub fn set_classification_id(&self, item_id: i64, country: &str, id: &str) {
        self.classification_ids
            .lock()
            .insert((item_id, country.to_string()), id.to_string());
    }

    pub fn stored_classification_id(&self, item_id: i64, country: &str) -> Option<String> {
        self.classification_ids.lock().get(&(item_id, country.to_string())).cloned()
    }

    pub fn stored_hs_code(&self, item_id: i64, country: &str) -> Option<String> {
        self.hs_codes.lock().get(&(item_id, country.to_string())).cloned()
    }

    pub fn stored_tax_code(&self, item_id: i64) -> Option<String> {
        self.items.lock().get(&item_id).and_then(|item| item.tax_code.clone())
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn list_items(&self, kinds: &[ItemKind], limit: u32, page: u32) -> Result<Vec<i64>, CatalogError> {
        let skip = page.saturating_sub(1) as usize * limit as usize;
        Ok(self
            .items
            .lock()
            .values()
            .filter(|item| kinds.contains(&item.kind))
            .map(|item| item.id)
            .skip(skip)
            .take(limit as usize)
            .collect())
    }

    async fn find_item(&self, item_id: i64) -> Result<Option<CatalogItem>, CatalogError> {
        Ok(self.items.lock().get(&item_id).cloned())
    }

    async fn classification_id(&self, item_id: i64, country: &str) -> Result<Option<String>, CatalogError> {
        Ok(self.stored_classification_id(item_id, country))
    }

    async fn save_classification_id(&self, item_id: i64, country: &str, classification_id: &str) -> Result<(), CatalogError> {
        self.set_classification_id(item_id, country, classification_id);
        Ok(())
    }

    async fn save_hs_code(&self, item_id: i64, country: &str, hs_code: &str) -> Result<(), CatalogError> {
        self.hs_codes
            .lock()
            .insert((item_id, country.to_string()), hs_code.to_string());
        Ok(())
    }

    async fn save_tax_code(&self, item_id: i64, tax_code: &str) -> Result<(), CatalogError> {
        if let Some(item) = self.items.lock().get_mut(&item_id) {
            item.tax_code = Some(tax_code.to_string());
        }
        Ok(())
    }
}

/// Catalog whose listing of one page errors a given number of times first.
pub struct FlakyCatalog {
    inner: Arc<MemoryCatalog>,
    page: u32,
    failures: Mutex<usize>,
}

impl FlakyCatalog {
    pub fn new(inner: Arc<MemoryCatalog>, page: u32, failures: usize) -> Self {
        Self {
            inner,
            page,
            failures: Mutex::new(failures),
        }
    }
}

#[async_trait]
impl Catalog for FlakyCatalog {
    async fn list_items(&self, kinds: &[ItemKind], limit: u32, page: u32) -> Result<Vec<i64>, CatalogError> {
        if page == self.page {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(CatalogError::Unavailable("connection reset".to_string()));
            }
        }
        self.inner.list_items(kinds, limit, page).await
    }

    async fn find_item(&self, item_id: i64) -> Result<Option<CatalogItem>, CatalogError> {
        self.inner.find_item(item_id).await
    }

    async fn classification_id(&self, item_id: i64, country: &str) -> Result<Option<String>, CatalogError> {
        self.inner.classification_id(item_id, country).await
    }

    async fn save_classification_id(&self, item_id: i64, country: &str, classification_id: &str) -> Result<(), CatalogError> {
        self.inner.save_classification_id(item_id, country, classification_id).await
    }

    async fn save_hs_code(&self, item_id: i64, country: &str, hs_code: &str) -> Result<(), CatalogError> {
        self.inner.save_hs_code(item_id, country, hs_code).await
    }

    async fn save_tax_code(&self, item_id: i64, tax_code: &str) -> Result<(), CatalogError> {
        self.inner.save_tax_code(item_id, tax_code).await
    }
}

/// Classification service that replays scripted results, then answers `pending`.
#[derive(Default)]
pub struct ScriptedClassifier {
    results: Mutex<VecDeque<Result<ClassificationResponse, ClassifierError>>>,
    requests: Mutex<Vec<ClassificationRequest>>,
    remote_items: Mutex<HashMap<String, RemoteItem>>,
}

impl ScriptedClassifier {
    pub fn respond(&self, result: Result<ClassificationResponse, ClassifierError>) {
        self.results.lock().push_back(result);
    }

    pub fn add_remote_item(&self, item: RemoteItem) {
        self.remote_items.lock().insert(item.item_code.clone(), item);
    }

    pub fn requests(&self) -> Vec<ClassificationRequest> {
        self.requests.lock().clone()
    }

    fn next(&self, request: &ClassificationRequest) -> Result<ClassificationResponse, ClassifierError> {
        self.requests.lock().push(request.clone());
        self.results.lock().pop_front().unwrap_or_else(|| {
            Ok(ClassificationResponse {
                status: ClassificationStatus::Pending,
                country_of_destination: Some(request.country_of_destination.clone()),
                ..Default::default()
            })
        })
    }
}

#[async_trait]
impl ClassificationClient for ScriptedClassifier {
    async fn create_or_update(&self, request: &ClassificationRequest) -> Result<ClassificationResponse, ClassifierError> {
        self.next(request)
    }

    async fn get(&self, request: &ClassificationRequest) -> Result<ClassificationResponse, ClassifierError> {
        self.next(request)
    }

    async fn query_item(&self, item_code: &str) -> Result<Option<RemoteItem>, ClassifierError> {
        Ok(self.remote_items.lock().get(item_code).cloned())
    }
}

/// A sync engine wired to in-memory collaborators.
pub struct TestHarness {
    pub queue: Arc<MemoryQueue>,
    pub store: Arc<MemoryStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub classifier: Arc<ScriptedClassifier>,
    pub sync: SyncHandler,
}

/// Engine config with no throttling pause.
pub fn test_config(countries: &[&str]) -> SyncConfig {
    SyncConfig::new(COMPANY_ID, countries.iter().map(|c| c.to_string()).collect()).with_pause(Duration::ZERO)
}

impl TestHarness {
    pub fn new(config: SyncConfig) -> Self {
        let catalog = Arc::new(MemoryCatalog::default());
        Self::with_catalog(config, catalog.clone(), catalog)
    }

    /// Listing catalog `page` errors `failures` times before it answers.
    pub fn with_flaky_listing(config: SyncConfig, page: u32, failures: usize) -> Self {
        let catalog = Arc::new(MemoryCatalog::default());
        let flaky = Arc::new(FlakyCatalog::new(catalog.clone(), page, failures));
        Self::with_catalog(config, catalog, flaky)
    }

    fn with_catalog(config: SyncConfig, catalog: Arc<MemoryCatalog>, engine_catalog: Arc<dyn Catalog>) -> Self {
        let queue = Arc::new(MemoryQueue::default());
        let store = Arc::new(MemoryStore::default());
        let classifier = Arc::new(ScriptedClassifier::default());
        let sync = SyncHandler::new(
            queue.clone(),
            store.clone(),
            engine_catalog,
            classifier.clone(),
            config,
        );
        Self {
            queue,
            store,
            catalog,
            classifier,
            sync,
        }
    }

    /// Run queued jobs in order, as the worker would, until none is pending
    /// or `max_jobs` have run. Returns every outcome.
    pub async fn drain(&self, max_jobs: usize) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while outcomes.len() < max_jobs {
            let Some(job) = self.queue.claim_due(i64::MAX).await.unwrap() else {
                break;
            };
            let outcome = self.sync.run_job(&job).await.expect("job failed");
            self.queue.complete(&job).await.unwrap();
            outcomes.push(outcome);
        }
        outcomes
    }
}

use std::time::Duration;

use serde::Deserialize;
use strum::{Display, EnumString};

use crate::models::unit::EnqueuedClassificationUnit;

/// Placeholder tax codes that must never be sent as a classification hint.
pub const RESERVED_TAX_CODES: [&str; 2] = ["U0000000", "P0000000"];

/// HS code passed to the sandbox so test classifications come back within minutes.
pub const DEFAULT_TEST_HS_CODE: &str = "6110113000";

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Admin API bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string for the catalog
    pub database_url: String,

    /// Redis connection string for the job queue and sync state
    pub redis_url: String,

    /// Classification service credentials (HTTP basic auth)
    pub classification_api_username: String,
    pub classification_api_password: String,

    /// Company identifier sent with every classification request
    pub company_id: String,

    /// `production` or `development` (sandbox)
    #[serde(default)]
    pub api_environment: ApiEnvironment,

    /// Item master endpoint used to look up existing remote classifications
    #[serde(default)]
    pub item_master_url: Option<String>,

    /// Destination countries to classify for (comma separated ISO codes)
    #[serde(default)]
    pub sync_countries: Vec<String>,

    /// Classification systems as `SYSTEM:CC|CC` groups, comma separated
    #[serde(default)]
    pub classification_systems: Option<String>,

    #[serde(default = "default_batch_size")]
    pub sync_batch_size: u32,

    #[serde(default = "default_wait_time_secs")]
    pub sync_wait_time_secs: u64,

    #[serde(default = "default_pause_ms")]
    pub sync_pause_ms: u64,

    /// Enables the worker's periodic resync of failed units
    #[serde(default)]
    pub resync_interval_secs: Option<u64>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before a job that hit a store or catalog error runs again
    #[serde(default = "default_retry_delay_secs")]
    pub sync_retry_delay_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_batch_size() -> u32 {
    1000
}

fn default_wait_time_secs() -> u64 {
    24 * 60 * 60
}

fn default_pause_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_retry_delay_secs() -> u64 {
    60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Build the engine configuration from the environment values.
    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        let mut config = SyncConfig::new(self.company_id.clone(), self.sync_countries.clone())
            .with_environment(self.api_environment)
            .with_batch_size(self.sync_batch_size)?;

        config.wait_time = Duration::from_secs(self.sync_wait_time_secs);
        config.pause = Duration::from_millis(self.sync_pause_ms);
        config.retry_delay = Duration::from_secs(self.sync_retry_delay_secs);

        if let Some(raw) = self.classification_systems.as_deref() {
            config.classification_systems = parse_classification_systems(raw)?;
        }

        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ApiEnvironment {
    Production,
    #[default]
    Development,
}

/// Settings of the synchronization engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub company_id: String,
    pub environment: ApiEnvironment,
    /// Configured destination countries, in operator order.
    pub countries: Vec<String>,
    /// Classification system code and the countries that use it.
    pub classification_systems: Vec<(String, Vec<String>)>,
    /// Catalog page size for the full sync walk.
    pub batch_size: u32,
    /// Delay before a failed unit is retried by a resync pass.
    pub wait_time: Duration,
    /// Pause after each processed unit.
    pub pause: Duration,
    /// Delay before a job that failed on the store, catalog or queue runs again.
    pub retry_delay: Duration,
    /// Sandbox-only HS code hint; `None` disables it.
    pub test_hs_code: Option<String>,
    pub reserved_tax_codes: Vec<String>,
}

impl SyncConfig {
    pub fn new(company_id: impl Into<String>, countries: Vec<String>) -> Self {
        Self {
            company_id: company_id.into(),
            environment: ApiEnvironment::default(),
            countries: countries
                .into_iter()
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
            classification_systems: Vec::new(),
            batch_size: default_batch_size(),
            wait_time: Duration::from_secs(default_wait_time_secs()),
            pause: Duration::from_millis(default_pause_ms()),
            retry_delay: Duration::from_secs(default_retry_delay_secs()),
            test_hs_code: Some(DEFAULT_TEST_HS_CODE.to_string()),
            reserved_tax_codes: RESERVED_TAX_CODES.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn with_environment(mut self, environment: ApiEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Result<Self, ConfigError> {
        if batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_classification_systems(mut self, systems: Vec<(String, Vec<String>)>) -> Self {
        self.classification_systems = systems;
        self
    }

    pub fn has_countries(&self) -> bool {
        !self.countries.is_empty()
    }

    pub fn is_supported_country(&self, country: &str) -> bool {
        self.countries.iter().any(|c| c == country)
    }

    pub fn system_for_country(&self, country: &str) -> Option<&str> {
        self.classification_systems
            .iter()
            .find(|(_, countries)| countries.iter().any(|c| c == country))
            .map(|(system, _)| system.as_str())
    }

    /// Configured countries grouped by classification system, in configured order.
    /// Countries without a known system are left out.
    pub fn countries_by_system(&self) -> Vec<(String, Vec<String>)> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for country in &self.countries {
            let Some(system) = self.system_for_country(country) else {
                continue;
            };
            match groups.iter_mut().find(|(s, _)| s == system) {
                Some((_, members)) => members.push(country.clone()),
                None => groups.push((system.to_string(), vec![country.clone()])),
            }
        }
        groups
    }

    /// One country per classification system. Without system data every
    /// configured country is classified on its own.
    pub fn optimized_countries(&self) -> Vec<String> {
        if self.classification_systems.is_empty() {
            return self.countries.clone();
        }
        self.countries_by_system()
            .into_iter()
            .filter_map(|(_, countries)| countries.into_iter().next())
            .collect()
    }

    pub fn is_reserved_tax_code(&self, tax_code: &str) -> bool {
        self.reserved_tax_codes.iter().any(|c| c == tax_code)
    }
}

/// Decides how long a unit waits before a resync attempt.
pub trait WaitTimeStrategy: Send + Sync {
    fn wait_time(&self, unit: &EnqueuedClassificationUnit) -> Duration;
}

/// Same wait for every unit.
pub struct FixedWaitTime(pub Duration);

impl WaitTimeStrategy for FixedWaitTime {
    fn wait_time(&self, _unit: &EnqueuedClassificationUnit) -> Duration {
        self.0
    }
}

/// Parse `HS6:DE|FR,USHTS:US` into system groups.
pub fn parse_classification_systems(raw: &str) -> Result<Vec<(String, Vec<String>)>, ConfigError> {
    let mut systems = Vec::new();
    for group in raw.split(',').map(str::trim).filter(|g| !g.is_empty()) {
        let (system, countries) = group
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidSystemGroup(group.to_string()))?;

        let countries: Vec<String> = countries
            .split('|')
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect();

        if system.trim().is_empty() || countries.is_empty() {
            return Err(ConfigError::InvalidSystemGroup(group.to_string()));
        }
        systems.push((system.trim().to_string(), countries));
    }
    Ok(systems)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Sync batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("Invalid classification system group '{0}' (expected SYSTEM:CC|CC)")]
    InvalidSystemGroup(String),
}

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Action a queued classification unit asks the worker to perform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Get,
    Sync,
}

/// One piece of classification work: an item, a destination country and an action.
///
/// The serialized payload is persisted by the job queue and has to stay stable
/// across releases. Together with the job hook and group it is also the identity
/// used to detect an equivalent job that is already scheduled.
///
/// Units of action [`SyncAction::Sync`] cover every destination country and carry
/// an empty `country_of_destination`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EnqueuedClassificationUnit {
    pub product_id: i64,

    #[serde(default)]
    pub country_of_destination: String,

    pub action: SyncAction,

    /// Epoch seconds before which the unit must not run. `None` means now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl EnqueuedClassificationUnit {
    pub fn new(product_id: i64, country_of_destination: impl Into<String>, action: SyncAction) -> Self {
        Self {
            product_id,
            country_of_destination: country_of_destination.into(),
            action,
            timestamp: None,
            error_message: None,
            resolution: None,
        }
    }

    /// A catalog-walk unit, expanded per country when it runs.
    pub fn sync(product_id: i64) -> Self {
        Self::new(product_id, String::new(), SyncAction::Sync)
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    /// Encode into the queue payload.
    pub fn to_payload(&self) -> serde_json::Value {
        // Plain struct of strings, integers and a unit enum; serialization cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Decode a queue payload.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(payload)
    }
}

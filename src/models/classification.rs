use serde::{Deserialize, Serialize};

/// Error codes the classification service uses for authentication and authorization failures.
pub const AUTH_ERROR_CODES: [&str; 3] = ["AuthorizationException", "AuthenticationException", "AuthenticationIncomplete"];

/// HS classification request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub country_of_destination: String,
    pub item: ClassificationItem,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationItem {
    pub company_id: String,
    pub item_code: String,
    pub summary: String,
    pub description: String,
    pub item_group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_code: Option<String>,
    pub classification_parameters: Vec<ClassificationParameter>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationParameter {
    pub name: String,
    pub value: String,
}

impl ClassificationItem {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.classification_parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStatus {
    Pending,
    Classified,
    CannotBeClassified,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// HS classification response, shared by create and get calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResponse {
    #[serde(default)]
    pub status: ClassificationStatus,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub country_of_destination: Option<String>,
    #[serde(default)]
    pub hs_code: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub errors: Vec<ApiError>,
}

impl ClassificationResponse {
    pub fn has_errors(&self) -> bool {
        self.status == ClassificationStatus::Error || !self.errors.is_empty()
    }

    pub fn has_auth_error(&self) -> bool {
        self.errors
            .iter()
            .any(|e| AUTH_ERROR_CODES.contains(&e.code.as_str()))
    }

    /// All error codes and messages, one per line.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Item as stored in the remote item master.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    #[serde(default)]
    pub item_code: String,
    #[serde(default)]
    pub tax_code: Option<String>,
    #[serde(default)]
    pub classifications: Vec<RemoteClassification>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteClassification {
    pub system_code: String,
    #[serde(default)]
    pub product_code: Option<String>,
}

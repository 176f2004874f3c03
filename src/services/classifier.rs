use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use crate::config::ApiEnvironment;
use crate::models::classification::{ClassificationRequest, ClassificationResponse, RemoteItem, AUTH_ERROR_CODES};

const PRODUCTION_URL: &str = "https://api.classification.avalara.net/api/v2";
const SANDBOX_URL: &str = "https://api-sandbox.classification.avalara.net/api/v2";

/// Remote HS classification service.
#[async_trait]
pub trait ClassificationClient: Send + Sync {
    /// Create (or re-create) the classification of an item for a destination country.
    async fn create_or_update(&self, request: &ClassificationRequest) -> Result<ClassificationResponse, ClassifierError>;

    /// Fetch the current state of an earlier classification.
    async fn get(&self, request: &ClassificationRequest) -> Result<ClassificationResponse, ClassifierError>;

    /// Look up an item in the remote item master. `None` when unknown or unsupported.
    async fn query_item(&self, _item_code: &str) -> Result<Option<RemoteItem>, ClassifierError> {
        Ok(None)
    }
}

/// HTTP client for the classification API.
pub struct HttpClassificationClient {
    http: Client,
    base_url: String,
    company_id: String,
    username: String,
    password: String,
    item_master_url: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ItemQueryResponse {
    #[serde(default)]
    value: Vec<RemoteItem>,
}

impl HttpClassificationClient {
    pub fn new(
        environment: ApiEnvironment,
        company_id: String,
        username: String,
        password: String,
    ) -> Result<Self, ClassifierError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(ClassifierError::Http)?;

        let base_url = match environment {
            ApiEnvironment::Production => PRODUCTION_URL,
            ApiEnvironment::Development => SANDBOX_URL,
        };

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            company_id,
            username,
            password,
            item_master_url: None,
        })
    }

    /// Enable remote item lookups against the given item master endpoint.
    pub fn with_item_master_url(mut self, url: Option<String>) -> Self {
        self.item_master_url = url;
        self
    }

    fn classifications_url(&self) -> String {
        format!("{}/companies/{}/classifications/hs", self.base_url, self.company_id)
    }

    async fn read_response(response: Response) -> Result<ClassificationResponse, ClassifierError> {
        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(ClassifierError::Http);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }
}

/// Map a non-success HTTP status and body onto the error taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> ClassifierError {
    let error = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
    let code = error.as_ref().map(|e| e.code.as_str()).unwrap_or_default();
    let message = match &error {
        Some(e) if !e.message.is_empty() => format!("{}: {}", e.code, e.message),
        _ => format!("HTTP {}: {}", status.as_u16(), body),
    };

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) || AUTH_ERROR_CODES.contains(&code) {
        ClassifierError::Authorization(message)
    } else if matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY) {
        ClassifierError::Validation(message)
    } else {
        ClassifierError::Transient(message)
    }
}

#[async_trait]
impl ClassificationClient for HttpClassificationClient {
    async fn create_or_update(&self, request: &ClassificationRequest) -> Result<ClassificationResponse, ClassifierError> {
        let response = self
            .http
            .post(self.classifications_url())
            .basic_auth(&self.username, Some(&self.password))
            .json(request)
            .send()
            .await
            .map_err(ClassifierError::Http)?;

        Self::read_response(response).await
    }

    async fn get(&self, request: &ClassificationRequest) -> Result<ClassificationResponse, ClassifierError> {
        let Some(id) = request.id.as_deref() else {
            return Err(ClassifierError::Validation(format!(
                "no classification id for item {} in {}",
                request.item.item_code, request.country_of_destination
            )));
        };

        let response = self
            .http
            .get(format!("{}/{}", self.classifications_url(), id))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(ClassifierError::Http)?;

        Self::read_response(response).await
    }

    async fn query_item(&self, item_code: &str) -> Result<Option<RemoteItem>, ClassifierError> {
        let Some(url) = self.item_master_url.as_deref() else {
            return Ok(None);
        };

        let filter = format!("itemCode eq '{item_code}'");
        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("$filter", filter.as_str()), ("$include", "classifications"), ("$top", "1")])
            .send()
            .await
            .map_err(ClassifierError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let items: ItemQueryResponse = response.json().await.map_err(ClassifierError::Http)?;
        Ok(items.value.into_iter().next())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Classification service unavailable: {0}")]
    Transient(String),

    #[error("Classification service rejected credentials: {0}")]
    Authorization(String),

    #[error("Classification request rejected: {0}")]
    Validation(String),
}

impl ClassifierError {
    /// Authorization failures stop the whole sync, not just this unit.
    pub fn is_authorization(&self) -> bool {
        matches!(self, ClassifierError::Authorization(_))
    }
}

//! HTTP collaborators: session lifecycle, scan submission and catalog.
//!
//! [`InventoryApi`] is the seam the rest of the crate depends on;
//! [`HttpInventoryApi`] binds it to the REST backend with `reqwest`.
//!
//! | Operation          | Request                                |
//! |--------------------|----------------------------------------|
//! | start              | `POST api/Inventory/start`             |
//! | join               | `POST api/Inventory/join`              |
//! | finish             | `POST api/Inventory/finish`            |
//! | scan               | `POST api/Inventory/scan`              |
//! | categories by zone | `GET  api/Category/by-zone/{zoneId}`   |
//! | item conditions    | `GET  api/StateItem/GetAll`            |

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use tally_core::{
    CatalogCategory, ItemCondition, OperatingGroupId, ScanResponse, SessionId, StateId, ZoneId,
};

use crate::auth::TokenProvider;
use crate::config::ApiConfig;
use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub zone_id: ZoneId,
    pub operating_group_id: OperatingGroupId,
}

/// `sessionId` may be missing on a malformed answer; callers must check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    #[serde(default, alias = "inventaryId")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub invitation_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub invitation_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub zone_id: ZoneId,
    #[serde(alias = "inventaryId")]
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishRequest {
    pub session_id: SessionId,
    pub observations: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub session_id: SessionId,
    pub code: String,
    pub state_id: StateId,
}

/// The backend the synchronization core talks to over request/response.
#[async_trait]
pub trait InventoryApi: Send + Sync {
    async fn start(&self, request: StartRequest) -> Result<StartResponse, ApiError>;

    /// Rejected codes come back as [`ApiError::Status`] with a structured body.
    async fn join(&self, request: JoinRequest) -> Result<JoinResponse, ApiError>;

    async fn finish(&self, request: FinishRequest) -> Result<(), ApiError>;

    async fn scan(&self, request: ScanRequest) -> Result<ScanResponse, ApiError>;

    async fn categories_by_zone(&self, zone_id: ZoneId) -> Result<Vec<CatalogCategory>, ApiError>;

    async fn item_conditions(&self) -> Result<Vec<ItemCondition>, ApiError>;
}

/// Pull a human-readable message out of an error body.
///
/// Accepts `{"message": ..}` (any casing), `{"error": ..}`, `{"title": ..}`
/// or a bare JSON string. Returns `None` when nothing usable is found.
pub fn parse_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    let message = match &value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => ["message", "Message", "error", "title"]
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_str()).map(str::to_string)),
        _ => None,
    }?;
    let cleaned = message.trim().trim_matches('"').trim().to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// REST implementation of [`InventoryApi`].
#[derive(Clone)]
pub struct HttpInventoryApi {
    client: Client,
    base_url: reqwest::Url,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpInventoryApi {
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, ApiError> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = reqwest::Url::parse(&base)
            .map_err(|e| ApiError::Transport(format!("invalid base url {base}: {e}")))?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ApiError::Transport(format!("invalid path {path}: {e}")))?;
        let mut builder = self.client.request(method, url);
        if let Some(token) = self.tokens.access_token().await {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            log::warn!("Access token rejected or expired ({})", response.url().path());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl InventoryApi for HttpInventoryApi {
    async fn start(&self, request: StartRequest) -> Result<StartResponse, ApiError> {
        let builder = self.request(Method::POST, "api/Inventory/start").await?;
        self.send_json(builder.json(&request)).await
    }

    async fn join(&self, request: JoinRequest) -> Result<JoinResponse, ApiError> {
        let builder = self.request(Method::POST, "api/Inventory/join").await?;
        self.send_json(builder.json(&request)).await
    }

    async fn finish(&self, request: FinishRequest) -> Result<(), ApiError> {
        let builder = self.request(Method::POST, "api/Inventory/finish").await?;
        self.send(builder.json(&request)).await.map(|_| ())
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResponse, ApiError> {
        let builder = self.request(Method::POST, "api/Inventory/scan").await?;
        self.send_json(builder.json(&request)).await
    }

    async fn categories_by_zone(&self, zone_id: ZoneId) -> Result<Vec<CatalogCategory>, ApiError> {
        let path = format!("api/Category/by-zone/{zone_id}");
        let builder = self.request(Method::GET, &path).await?;
        self.send_json(builder).await
    }

    async fn item_conditions(&self) -> Result<Vec<ItemCondition>, ApiError> {
        let builder = self.request(Method::GET, "api/StateItem/GetAll").await?;
        self.send_json(builder).await
    }
}

use async_trait::async_trait;
use loadgen_common::{
    paths, CreatePullRequestRequest, DeactivateTeamRequest, MergePullRequestRequest, Team,
};
use reqwest::{Client, RequestBuilder};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::TargetConfig;
use crate::error::{LoadgenError, Result};

/// Response observed from the target: status, latency and raw body
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub latency: Duration,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, latency: Duration, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            latency,
            body: body.into(),
        }
    }

    /// Latency in milliseconds
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }

    /// Decode the body as JSON
    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Narrow interface to the API under test.
///
/// An `Err` is a transport failure; any HTTP status, including 5xx, comes
/// back as `Ok`.
#[async_trait]
pub trait TargetApi: Send + Sync {
    async fn health(&self) -> Result<ApiResponse>;
    async fn add_team(&self, team: &Team) -> Result<ApiResponse>;
    async fn get_stats(&self) -> Result<ApiResponse>;
    async fn get_user_reviews(&self, user_id: &str) -> Result<ApiResponse>;
    async fn create_pull_request(&self, request: &CreatePullRequestRequest)
        -> Result<ApiResponse>;
    async fn merge_pull_request(&self, request: &MergePullRequestRequest) -> Result<ApiResponse>;
    async fn deactivate_team(&self, request: &DeactivateTeamRequest) -> Result<ApiResponse>;
}

/// `reqwest`-backed client for the target API
#[derive(Debug, Clone)]
pub struct HttpTargetClient {
    base_url: String,
    http_client: Client,
    health_timeout: Duration,
}

impl HttpTargetClient {
    /// Create a new client from target configuration
    pub fn new(config: &TargetConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| LoadgenError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            base_url = %config.base_url,
            timeout_seconds = config.request_timeout_seconds,
            "Target client created"
        );

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
            health_timeout: Duration::from_secs(config.health_timeout_seconds),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and time it until the full body has been read
    async fn execute(&self, request: RequestBuilder) -> Result<ApiResponse> {
        let start = Instant::now();
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        let latency = start.elapsed();

        debug!(status = status, latency_ms = latency.as_millis() as u64, "Request completed");

        Ok(ApiResponse::new(status, latency, body.to_vec()))
    }
}

#[async_trait]
impl TargetApi for HttpTargetClient {
    async fn health(&self) -> Result<ApiResponse> {
        let request = self
            .http_client
            .get(self.url(paths::HEALTH))
            .timeout(self.health_timeout);
        self.execute(request).await
    }

    async fn add_team(&self, team: &Team) -> Result<ApiResponse> {
        let request = self.http_client.post(self.url(paths::TEAM_ADD)).json(team);
        self.execute(request).await
    }

    async fn get_stats(&self) -> Result<ApiResponse> {
        let request = self.http_client.get(self.url(paths::STATS));
        self.execute(request).await
    }

    async fn get_user_reviews(&self, user_id: &str) -> Result<ApiResponse> {
        let request = self
            .http_client
            .get(self.url(paths::USER_REVIEWS))
            .query(&[("user_id", user_id)]);
        self.execute(request).await
    }

    async fn create_pull_request(
        &self,
        request: &CreatePullRequestRequest,
    ) -> Result<ApiResponse> {
        let request = self
            .http_client
            .post(self.url(paths::PULL_REQUEST_CREATE))
            .json(request);
        self.execute(request).await
    }

    async fn merge_pull_request(&self, request: &MergePullRequestRequest) -> Result<ApiResponse> {
        let request = self
            .http_client
            .post(self.url(paths::PULL_REQUEST_MERGE))
            .json(request);
        self.execute(request).await
    }

    async fn deactivate_team(&self, request: &DeactivateTeamRequest) -> Result<ApiResponse> {
        let request = self
            .http_client
            .post(self.url(paths::TEAM_DEACTIVATE))
            .json(request);
        self.execute(request).await
    }
}

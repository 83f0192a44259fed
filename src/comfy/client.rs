use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::error::ComfyError;
use super::types::{ArtifactRef, ExecutionRecord, HistoryEntry, QueueSnapshot, SubmitResponse};
use crate::config::EaselConfig;
use crate::tracker::WorkflowStatus;
use crate::workflow::WorkflowPrompt;

pub struct ComfyClient {
    http: Client,
    base_url: String,
}

impl ComfyClient {
    /// Create a client for the engine at `base_url`. The timeout applies to
    /// every operation; exceeding it surfaces as [`ComfyError::Timeout`].
    pub fn new(base_url: impl Into<String>, api_key: Option<&str>, timeout: Duration) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}"))
        {
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &EaselConfig) -> Self {
        Self::new(&config.url, config.api_key.as_deref(), config.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a workflow prompt, returning the engine-assigned id.
    ///
    /// A 400 response is a validation rejection and carries the engine's
    /// per-node diagnostics.
    pub async fn submit(&self, prompt: &WorkflowPrompt) -> Result<SubmitResponse, ComfyError> {
        let url = format!("{}/prompt", self.base_url);
        debug!(%url, nodes = prompt.nodes.len(), "submitting workflow prompt");

        let response = self
            .http
            .post(&url)
            .json(&prompt.to_api_format())
            .send()
            .await?;

        let status = response.status();

        if status == StatusCode::BAD_REQUEST {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let message = body
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("workflow validation failed")
                .to_string();
            let node_errors: BTreeMap<String, serde_json::Value> = body
                .get("node_errors")
                .and_then(|v| v.as_object())
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            return Err(ComfyError::Validation {
                message,
                node_errors,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ComfyError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    pub async fn queue_snapshot(&self) -> Result<QueueSnapshot, ComfyError> {
        let url = format!("{}/queue", self.base_url);
        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ComfyError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// Terminal execution record for a prompt. [`ComfyError::NotFound`] when
    /// the engine has no history entry for the id yet.
    pub async fn history(&self, prompt_id: &str) -> Result<ExecutionRecord, ComfyError> {
        let url = format!("{}/history/{prompt_id}", self.base_url);
        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ComfyError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: BTreeMap<String, HistoryEntry> = response.json().await?;
        let entry = body.get(prompt_id).ok_or_else(|| {
            ComfyError::NotFound(format!("prompt {prompt_id} not found in history"))
        })?;

        Ok(ExecutionRecord::from_entry(prompt_id, entry))
    }

    /// Current status of a prompt, derived from history (terminal states win)
    /// and the queue. An id visible in neither is still PENDING, since right
    /// after submission the engine may not have recorded it anywhere yet.
    pub async fn status(&self, prompt_id: &str) -> Result<WorkflowStatus, ComfyError> {
        match self.history(prompt_id).await {
            Ok(record) => return Ok(record.into_status()),
            Err(ComfyError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let snapshot = self.queue_snapshot().await?;
        if snapshot.is_running(prompt_id) {
            return Ok(WorkflowStatus::running());
        }
        if let Some(position) = snapshot.pending_position(prompt_id) {
            return Ok(WorkflowStatus::queued(Some(position)));
        }
        Ok(WorkflowStatus::pending())
    }

    /// Download one produced artifact's bytes.
    pub async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ComfyError> {
        let url = format!("{}/view", self.base_url);
        debug!(%url, artifact = %artifact, "fetching artifact");

        let response = self
            .http
            .get(&url)
            .query(&[
                ("filename", artifact.filename.as_str()),
                ("subfolder", artifact.subfolder.as_str()),
                ("type", artifact.folder_kind.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ComfyError::NotFound(artifact.path()));
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ComfyError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Best-effort cancellation: drop the prompt from the pending queue and,
    /// when it is the one currently running, interrupt it. Idempotent: a
    /// prompt the engine no longer knows is a no-op success. Returns whether
    /// the engine acknowledged every step.
    pub async fn cancel(&self, prompt_id: &str) -> Result<bool, ComfyError> {
        let snapshot = self.queue_snapshot().await?;

        let url = format!("{}/queue", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "delete": [prompt_id] }))
            .send()
            .await?;
        let mut acknowledged = response.status().is_success();

        if snapshot.is_running(prompt_id) {
            let url = format!("{}/interrupt", self.base_url);
            let response = self.http.post(&url).send().await?;
            acknowledged &= response.status().is_success();
        }

        Ok(acknowledged)
    }

    /// Reachability probe. Unreachable or unhealthy engines come back as
    /// `Ok(false)`; only a malformed response body is an error.
    pub async fn health_check(&self) -> Result<bool, ComfyError> {
        let url = format!("{}/queue", self.base_url);
        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(err) if err.is_connect() || err.is_timeout() => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        if !response.status().is_success() {
            return Ok(false);
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|err| ComfyError::Api {
                status: 200,
                message: format!("malformed health response: {err}"),
            })?;
        Ok(true)
    }
}

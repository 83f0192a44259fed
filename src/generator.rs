use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::comfy::ComfyClient;
use crate::comfy::types::ArtifactRef;
use crate::error::EaselError;
use crate::retry::RetryPolicy;
use crate::tracker::{NotificationHub, WorkflowState, WorkflowTracker};
use crate::workflow::{TemplateLibrary, WorkflowPrompt};

/// Outcome of one completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub prompt_id: String,
    pub images: Vec<ArtifactRef>,
    pub seed: Option<i64>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Drives a generation end to end: instantiate a template, submit the
/// prompt, wait for a terminal state, collect the produced artifacts.
///
/// Owns the optional result cache and, when a [`NotificationHub`] is
/// attached, consumes push notifications instead of pure polling. Safe to
/// share across concurrently in-flight generations.
pub struct Generator {
    client: Arc<ComfyClient>,
    tracker: WorkflowTracker<Arc<ComfyClient>>,
    library: Option<Mutex<TemplateLibrary>>,
    hub: Option<Arc<NotificationHub>>,
    cache: Option<ResultCache>,
    retry: RetryPolicy,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl Generator {
    pub fn new(client: Arc<ComfyClient>) -> Self {
        Self {
            tracker: WorkflowTracker::new(Arc::clone(&client)),
            client,
            library: None,
            hub: None,
            cache: None,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(1),
            wait_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_library(mut self, library: TemplateLibrary) -> Self {
        self.library = Some(Mutex::new(library));
        self
    }

    pub fn with_hub(mut self, hub: Arc<NotificationHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.tracker = WorkflowTracker::with_retry(Arc::clone(&self.client), retry.clone());
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn tracker(&self) -> &WorkflowTracker<Arc<ComfyClient>> {
        &self.tracker
    }

    /// Instantiate a library template and generate from it.
    pub async fn generate_from_template(
        &self,
        template_id: &str,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<GenerationRecord, EaselError> {
        let library = self
            .library
            .as_ref()
            .ok_or_else(|| EaselError::Config("no template library configured".into()))?;
        let template = library
            .lock()
            .expect("library mutex poisoned")
            .load(template_id)?;
        let prompt = template.instantiate(parameters)?;
        self.generate(prompt).await
    }

    /// Submit a prompt and wait for its terminal state.
    ///
    /// A FAILED terminal state surfaces the engine's error payload; a
    /// CANCELLED one maps to [`EaselError::Cancelled`]. On any error after
    /// submission the remote job is left running; its id remains usable
    /// for `status`/`cancel`, since abandonment is not cancellation.
    pub async fn generate(&self, mut prompt: WorkflowPrompt) -> Result<GenerationRecord, EaselError> {
        if let Some(cache) = &self.cache
            && let Some(hit) = cache.get(&prompt)
        {
            return Ok(hit);
        }

        if prompt.client_id.is_none() {
            prompt.client_id = Some(Uuid::new_v4().to_string());
        }

        let started = std::time::Instant::now();
        // Submission retries only on connection-level failure, before any
        // engine acknowledgement.
        let response = self.retry.run(|| self.client.submit(&prompt)).await?;
        let prompt_id = response.prompt_id.clone();
        info!(%prompt_id, "workflow submitted");

        self.tracker.register(&prompt_id);
        self.tracker.mark_queued(&prompt_id);

        let status = if let Some(hub) = &self.hub {
            let correlation_id = prompt.client_id.clone().unwrap_or_default();
            let mut events = hub.subscribe(&correlation_id);
            let waited = self
                .tracker
                .wait_with_events(&prompt_id, &mut events, self.poll_interval, self.wait_timeout)
                .await;
            hub.unsubscribe(&correlation_id);
            waited?
        } else {
            self.tracker
                .wait(&prompt_id, self.poll_interval, self.wait_timeout)
                .await?
        };

        match status.state {
            WorkflowState::Completed => {
                let images = match status.result {
                    Some(images) if !images.is_empty() => images,
                    _ => self.client.history(&prompt_id).await?.images,
                };
                if images.is_empty() {
                    return Err(EaselError::Generation {
                        prompt_id,
                        message: "workflow produced no output artifacts".into(),
                    });
                }
                let record = GenerationRecord {
                    prompt_id,
                    images,
                    seed: prompt.seed(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    completed_at: Utc::now(),
                };
                debug!(prompt_id = %record.prompt_id, images = record.images.len(), "generation completed");
                if let Some(cache) = &self.cache {
                    cache.insert(&prompt, record.clone());
                }
                Ok(record)
            }
            WorkflowState::Failed => Err(EaselError::Generation {
                prompt_id,
                message: status
                    .error
                    .unwrap_or_else(|| "engine reported failure without detail".into()),
            }),
            WorkflowState::Cancelled => Err(EaselError::Cancelled(prompt_id)),
            state => Err(EaselError::Generation {
                prompt_id,
                message: format!("wait returned non-terminal state {state}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comfy::ComfyError;
    use crate::comfy::types::PushMessage;
    use crate::workflow::WorkflowNode;
    use serde_json::json;
    use std::collections::BTreeMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sampler_prompt() -> WorkflowPrompt {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "1".to_string(),
            WorkflowNode::new("KSampler")
                .with_input("seed", 42_i64)
                .with_input("steps", 20_i64),
        );
        WorkflowPrompt::new(nodes)
    }

    fn fast_generator(server_uri: &str) -> Generator {
        let client = Arc::new(ComfyClient::new(server_uri, None, Duration::from_secs(5)));
        Generator::new(client)
            .with_poll_interval(Duration::from_millis(10))
            .with_wait_timeout(Duration::from_secs(5))
    }

    async fn mount_submit(server: &MockServer, prompt_id: &str, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "prompt_id": prompt_id,
                "number": 1,
                "node_errors": {}
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn completed_history(prompt_id: &str) -> serde_json::Value {
        json!({
            prompt_id: {
                "outputs": {
                    "9": {"images": [{"filename": "out_00001_.png", "subfolder": "", "type": "output"}]}
                },
                "status": {"status_str": "success", "completed": true}
            }
        })
    }

    #[tokio::test]
    async fn generate_submits_polls_and_collects_artifacts() {
        let server = MockServer::start().await;
        mount_submit(&server, "p-1", 1).await;
        // First poll: not in history yet, running in the queue.
        Mock::given(method("GET"))
            .and(path("/history/p-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/queue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "queue_running": [[0, "p-1"]],
                "queue_pending": []
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/history/p-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completed_history("p-1")))
            .mount(&server)
            .await;

        let record = fast_generator(&server.uri())
            .generate(sampler_prompt())
            .await
            .unwrap();

        assert_eq!(record.prompt_id, "p-1");
        assert_eq!(record.images.len(), 1);
        assert_eq!(record.images[0].filename, "out_00001_.png");
        assert_eq!(record.seed, Some(42));
    }

    #[tokio::test]
    async fn failed_workflow_surfaces_engine_payload() {
        let server = MockServer::start().await;
        mount_submit(&server, "p-2", 1).await;
        Mock::given(method("GET"))
            .and(path("/history/p-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "p-2": {
                    "outputs": {},
                    "status": {
                        "status_str": "error",
                        "messages": [["execution_error", {"exception_message": "CUDA out of memory"}]]
                    }
                }
            })))
            .mount(&server)
            .await;

        let err = fast_generator(&server.uri())
            .generate(sampler_prompt())
            .await
            .unwrap_err();
        let EaselError::Generation { prompt_id, message } = err else {
            panic!("expected Generation error, got {err:?}");
        };
        assert_eq!(prompt_id, "p-2");
        assert!(message.contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn validation_rejection_propagates_before_tracking() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "invalid prompt"},
                "node_errors": {"1": {"errors": []}}
            })))
            .mount(&server)
            .await;

        let err = fast_generator(&server.uri())
            .generate(sampler_prompt())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EaselError::Engine(ComfyError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn cache_short_circuits_resubmission() {
        let server = MockServer::start().await;
        // The engine must see exactly one submission for two generate calls.
        mount_submit(&server, "p-3", 1).await;
        Mock::given(method("GET"))
            .and(path("/history/p-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completed_history("p-3")))
            .mount(&server)
            .await;

        let generator = fast_generator(&server.uri()).with_cache(ResultCache::new());

        let first = generator.generate(sampler_prompt()).await.unwrap();
        let second = generator.generate(sampler_prompt()).await.unwrap();
        assert_eq!(first.prompt_id, second.prompt_id);
    }

    #[tokio::test]
    async fn generate_from_template_without_library_is_a_config_error() {
        let server = MockServer::start().await;
        let err = fast_generator(&server.uri())
            .generate_from_template("portrait", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EaselError::Config(_)));
    }

    #[tokio::test]
    async fn generate_from_template_applies_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("simple.json"),
            serde_json::to_string_pretty(&json!({
                "name": "Simple",
                "description": "one sampler",
                "parameters": {
                    "steps": {
                        "name": "steps",
                        "description": "sampling steps",
                        "type": "int",
                        "default": 20
                    }
                },
                "nodes": {
                    "1": {"class_type": "KSampler", "inputs": {"seed": 7, "steps": "{{steps}}"}}
                }
            }))
            .unwrap(),
        )
        .unwrap();

        let server = MockServer::start().await;
        mount_submit(&server, "p-4", 1).await;
        Mock::given(method("GET"))
            .and(path("/history/p-4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completed_history("p-4")))
            .mount(&server)
            .await;

        let generator = fast_generator(&server.uri())
            .with_library(TemplateLibrary::open(dir.path()).unwrap());
        let record = generator
            .generate_from_template("simple", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(record.seed, Some(7));
    }

    #[tokio::test]
    async fn push_mode_completes_from_notifications() {
        let server = MockServer::start().await;
        mount_submit(&server, "p-5", 1).await;
        Mock::given(method("GET"))
            .and(path("/history/p-5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completed_history("p-5")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/queue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "queue_running": [],
                "queue_pending": []
            })))
            .mount(&server)
            .await;

        let hub = Arc::new(NotificationHub::new());
        let generator = fast_generator(&server.uri())
            .with_hub(Arc::clone(&hub))
            .with_poll_interval(Duration::from_millis(50));

        // A feed task pushes lifecycle messages once the generator subscribes.
        let feed = Arc::clone(&hub);
        tokio::spawn(async move {
            while feed.subscriber_count() == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            feed.dispatch(
                "test-correlation",
                PushMessage::ExecutionStart {
                    prompt_id: "p-5".into(),
                },
            );
            feed.dispatch(
                "test-correlation",
                PushMessage::ExecutionSuccess {
                    prompt_id: "p-5".into(),
                },
            );
        });

        let record = generator
            .generate(sampler_prompt().with_client_id("test-correlation"))
            .await
            .unwrap();
        assert_eq!(record.prompt_id, "p-5");
        assert_eq!(record.images.len(), 1);
    }
}

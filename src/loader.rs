//! Artifact loader: downloads the compiled rule artifact, revalidates it
//! with the server's validator token, and keeps a periodically refreshed
//! snapshot available for concurrent evaluations. The snapshot is replaced
//! by pointer swap only; readers keep whatever `Arc` they captured.

use crate::artifact::{major_version, RuleArtifact};
use crate::config::ClientConfig;
use crate::errors::{DecisioningError, SharedReporter};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Artifacts with a different major version are produced for an
/// incompatible engine and rejected outright.
pub const EXPECTED_MAJOR_VERSION: u64 = 1;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Initial-load retry schedule: linearly increasing delay, bounded attempts.
/// Only applies until the first artifact has ever loaded; after that,
/// failures simply wait for the next regular tick.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub step: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            step: Duration::from_secs(10),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given 1-based retry attempt, or `None` once the
    /// attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.step * attempt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// New artifact parsed and swapped in.
    Updated,
    /// Server says the cached artifact is still current.
    NotModified,
}

#[derive(Default)]
struct LoaderState {
    latest: RwLock<Option<Arc<RuleArtifact>>>,
    etag: RwLock<Option<String>>,
    last_fetch: RwLock<Option<SystemTime>>,
}

pub struct ArtifactLoader {
    config: Arc<ClientConfig>,
    reporter: SharedReporter,
    http: reqwest::Client,
    retry_policy: RetryPolicy,
    state: Arc<LoaderState>,
    refresh_signal: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ArtifactLoader {
    pub fn new(config: Arc<ClientConfig>, reporter: SharedReporter) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        ArtifactLoader {
            config,
            reporter,
            http,
            retry_policy: RetryPolicy::default(),
            state: Arc::new(LoaderState::default()),
            refresh_signal: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    pub fn artifact_url(&self) -> String {
        format!(
            "https://{}/{}/{}/v{}/rules.json",
            self.config.cdn_host,
            self.config.client,
            self.config.environment,
            EXPECTED_MAJOR_VERSION
        )
    }

    /// Current artifact snapshot, if any fetch has ever succeeded.
    pub fn latest(&self) -> Option<Arc<RuleArtifact>> {
        self.state.latest.read().unwrap().clone()
    }

    pub fn last_etag(&self) -> Option<String> {
        self.state.etag.read().unwrap().clone()
    }

    pub fn last_fetch(&self) -> Option<SystemTime> {
        *self.state.last_fetch.read().unwrap()
    }

    /// Install an artifact directly, bypassing the network. Used for offline
    /// evaluation against a local artifact file.
    pub fn seed(&self, artifact: RuleArtifact) {
        *self.state.latest.write().unwrap() = Some(Arc::new(artifact));
    }

    /// Begin the background refresh loop. A second call while the loop is
    /// running is a no-op. The first fetch runs immediately.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let loader = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            loader.run_refresh_loop().await;
        }));
    }

    /// Cancel the refresh loop, including any scheduled retry.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Force an immediate fetch. Also nudges the background loop so its next
    /// tick is rescheduled from now.
    pub async fn refresh(&self) {
        if let Err(e) = self.fetch_once().await {
            self.reporter.report(&e);
        }
        self.refresh_signal.notify_one();
    }

    async fn run_refresh_loop(&self) {
        let interval = self.config.polling_interval();
        let mut initial_attempt: u32 = 0;

        loop {
            let delay = match self.fetch_once().await {
                Ok(outcome) => {
                    log::debug!(
                        "artifact fetch for {} completed: {:?}",
                        self.config.client,
                        outcome
                    );
                    interval
                }
                Err(e) => {
                    self.reporter.report(&e);
                    if self.latest().is_none() {
                        initial_attempt += 1;
                        match self.retry_policy.delay_for(initial_attempt) {
                            Some(delay) => delay,
                            None => interval,
                        }
                    } else {
                        interval
                    }
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.refresh_signal.notified() => {}
            }
        }
    }

    async fn fetch_once(&self) -> Result<FetchOutcome, DecisioningError> {
        let url = self.artifact_url();
        let mut request = self.http.get(&url);
        if let Some(etag) = self.last_etag() {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DecisioningError::ArtifactFetch(format!("GET {url}: {e}")))?;

        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = if status == 200 {
            Some(response.text().await.map_err(|e| {
                DecisioningError::ArtifactFetch(format!("reading artifact body: {e}"))
            })?)
        } else {
            None
        };

        self.apply_response(status, etag, body.as_deref())
    }

    /// Protocol core, separated from the transport so it can be exercised
    /// without a server.
    fn apply_response(
        &self,
        status: u16,
        etag: Option<String>,
        body: Option<&str>,
    ) -> Result<FetchOutcome, DecisioningError> {
        match status {
            304 => Ok(FetchOutcome::NotModified),
            200 => {
                let body = body.ok_or_else(|| {
                    DecisioningError::ArtifactFetch("200 response with no body".to_string())
                })?;
                let artifact = parse_and_validate(body)?;
                log::info!(
                    "artifact for {} updated to version {}",
                    self.config.client,
                    artifact.version
                );
                *self.state.latest.write().unwrap() = Some(Arc::new(artifact));
                // The token describes exactly the body it arrived with; a 200
                // without one means there is nothing to revalidate against.
                *self.state.etag.write().unwrap() = etag;
                *self.state.last_fetch.write().unwrap() = Some(SystemTime::now());
                Ok(FetchOutcome::Updated)
            }
            other => Err(DecisioningError::ArtifactFetch(format!(
                "unexpected artifact response status {other}"
            ))),
        }
    }
}

/// Parse an artifact body and enforce compatibility: the major version must
/// match and the rule list must be present (an empty list is valid; a
/// missing one is not).
pub fn parse_and_validate(body: &str) -> Result<RuleArtifact, DecisioningError> {
    let raw: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| DecisioningError::ArtifactParse(format!("malformed artifact: {e}")))?;

    if raw.get("rules").is_none() {
        return Err(DecisioningError::ArtifactParse(
            "artifact has no rules".to_string(),
        ));
    }

    let artifact: RuleArtifact = serde_json::from_value(raw)
        .map_err(|e| DecisioningError::ArtifactParse(format!("malformed artifact: {e}")))?;

    match major_version(&artifact.version) {
        Some(EXPECTED_MAJOR_VERSION) => Ok(artifact),
        Some(major) => Err(DecisioningError::ArtifactParse(format!(
            "artifact version {} (major {major}) is incompatible with expected major {}",
            artifact.version, EXPECTED_MAJOR_VERSION
        ))),
        None => Err(DecisioningError::ArtifactParse(format!(
            "artifact version '{}' is not parseable",
            artifact.version
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LogReporter;

    fn artifact_body(version: &str) -> String {
        format!(
            r#"{{"version": "{version}", "globalMbox": "overall-mbox", "localMboxes": ["promo"], "rules": []}}"#
        )
    }

    fn loader() -> ArtifactLoader {
        ArtifactLoader::new(
            Arc::new(ClientConfig::new("client123")),
            Arc::new(LogReporter),
        )
    }

    #[test]
    fn test_version_gate() {
        assert!(parse_and_validate(&artifact_body("1.5.3")).is_ok());
        assert!(matches!(
            parse_and_validate(&artifact_body("2.0.0")),
            Err(DecisioningError::ArtifactParse(_))
        ));
        assert!(parse_and_validate(&artifact_body("nonsense")).is_err());
    }

    #[test]
    fn test_missing_rules_rejected() {
        let body = r#"{"version": "1.0.0", "globalMbox": "overall-mbox"}"#;
        assert!(matches!(
            parse_and_validate(body),
            Err(DecisioningError::ArtifactParse(_))
        ));
    }

    #[test]
    fn test_retry_schedule() {
        let policy = RetryPolicy {
            step: Duration::from_secs(10),
            max_attempts: 3,
        };
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(10)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(20)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(30)));
        assert_eq!(policy.delay_for(4), None);
        assert_eq!(policy.delay_for(0), None);
    }

    #[test]
    fn test_artifact_url() {
        assert_eq!(
            loader().artifact_url(),
            "https://assets.decisioningedge.net/client123/production/v1/rules.json"
        );
    }

    #[test]
    fn test_apply_success_records_etag() {
        let loader = loader();
        let outcome = loader
            .apply_response(
                200,
                Some("abc123".to_string()),
                Some(&artifact_body("1.0.0")),
            )
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Updated);
        assert_eq!(loader.last_etag().as_deref(), Some("abc123"));
        assert!(loader.latest().is_some());
        assert!(loader.last_fetch().is_some());
    }

    #[test]
    fn test_not_modified_preserves_artifact_and_etag() {
        let loader = loader();
        loader
            .apply_response(200, Some("abc123".to_string()), Some(&artifact_body("1.0.0")))
            .unwrap();
        let before = loader.latest().unwrap();

        let outcome = loader.apply_response(304, None, None).unwrap();
        assert_eq!(outcome, FetchOutcome::NotModified);
        assert!(Arc::ptr_eq(&before, &loader.latest().unwrap()));
        assert_eq!(loader.last_etag().as_deref(), Some("abc123"));
    }

    #[test]
    fn test_success_without_etag_drops_stale_token() {
        let loader = loader();
        loader
            .apply_response(200, Some("abc123".to_string()), Some(&artifact_body("1.0.0")))
            .unwrap();
        assert_eq!(loader.last_etag().as_deref(), Some("abc123"));

        loader
            .apply_response(200, None, Some(&artifact_body("1.0.1")))
            .unwrap();
        assert!(loader.last_etag().is_none());
    }

    #[test]
    fn test_failed_fetch_leaves_artifact_unchanged() {
        let loader = loader();
        loader
            .apply_response(200, None, Some(&artifact_body("1.0.0")))
            .unwrap();
        let before = loader.latest().unwrap();

        assert!(loader.apply_response(500, None, None).is_err());
        assert!(loader
            .apply_response(200, None, Some(&artifact_body("2.0.0")))
            .is_err());
        assert!(Arc::ptr_eq(&before, &loader.latest().unwrap()));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_allows_restart() {
        let loader = Arc::new(ArtifactLoader::new(
            Arc::new(ClientConfig::new("client123")),
            Arc::new(LogReporter),
        ));
        loader.start();
        let first = loader
            .task
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.id())
            .unwrap();
        loader.start();
        let second = loader
            .task
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.id())
            .unwrap();
        assert_eq!(first, second);

        loader.stop();
        assert!(loader.task.lock().unwrap().is_none());
        loader.start();
        assert!(loader.task.lock().unwrap().is_some());
        loader.stop();
    }
}

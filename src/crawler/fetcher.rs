//! Fetch client
//!
//! One logical page retrieval, internally issuing one or more physical
//! requests. This module handles:
//! - Politeness jitter before every physical request
//! - Response classification (success, transient, block, fatal)
//! - Exponential backoff for transient failures
//! - Identity rotation and cooldown on block or challenge pages
//! - Proactive rotation when failures cluster inside the block window

use crate::config::{CrawlerConfig, IdentityConfig, UnexpectedStatusPolicy};
use crate::crawler::pacer::{backoff_delay, random_between, Pacer, PauseKind};
use crate::crawler::transport::{RawResponse, Transport};
use crate::session::SessionRotator;
use scraper::Html;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A successfully retrieved page
#[derive(Debug, Clone)]
pub struct Document {
    /// Final URL after redirects
    pub url: Url,
    pub status: u16,
    pub body: String,
}

impl Document {
    /// Parses the body as an HTML document
    pub fn html(&self) -> Html {
        Html::parse_document(&self.body)
    }
}

/// Result of one logical fetch
#[derive(Debug)]
pub enum FetchResult {
    Success(Document),

    /// The page loaded but held no usable content; worth trying again later
    Retryable { reason: String, attempts: u32 },

    /// The page could not be fetched now
    Fatal { reason: String },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success(_))
    }
}

/// Per-call expectations about the page being fetched
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    /// Substring a usable page must contain
    pub expected_marker: Option<String>,
}

impl FetchContext {
    pub fn expecting(marker: impl Into<String>) -> Self {
        Self {
            expected_marker: Some(marker.into()),
        }
    }
}

/// Retry, backoff, and block-handling parameters
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    pub politeness_min_ms: u64,
    pub politeness_max_ms: u64,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub backoff_jitter: f64,
    pub block_cooldown: Duration,
    pub unexpected_status: UnexpectedStatusPolicy,
    pub unexpected_status_sleep: Duration,
    pub challenge_markers: Vec<String>,
}

impl FetchPolicy {
    pub fn from_config(crawler: &CrawlerConfig, identity: &IdentityConfig) -> Self {
        Self {
            max_attempts: crawler.max_attempts.max(1),
            politeness_min_ms: crawler.politeness_min_ms,
            politeness_max_ms: crawler.politeness_max_ms,
            backoff_base: crawler.backoff_base(),
            backoff_cap: crawler.backoff_cap(),
            backoff_jitter: crawler.backoff_jitter,
            block_cooldown: crawler.block_cooldown(),
            unexpected_status: crawler.unexpected_status,
            unexpected_status_sleep: Duration::from_secs(crawler.unexpected_status_sleep_secs),
            challenge_markers: identity.challenge_markers.clone(),
        }
    }
}

/// Classification of one physical response
#[derive(Debug)]
enum Outcome {
    Usable(Document),
    Empty(String),
    Transient(String),
    Blocked(String),
    Gone(String),
    Unexpected(u16),
}

/// Fetches pages through the active session identity
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    rotator: Arc<SessionRotator>,
    pacer: Arc<dyn Pacer>,
    policy: FetchPolicy,
    shutdown: CancellationToken,
}

impl FetchClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        rotator: Arc<SessionRotator>,
        pacer: Arc<dyn Pacer>,
        policy: FetchPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            rotator,
            pacer,
            policy,
            shutdown,
        }
    }

    pub fn rotator(&self) -> &Arc<SessionRotator> {
        &self.rotator
    }

    pub fn pacer(&self) -> &Arc<dyn Pacer> {
        &self.pacer
    }

    /// Retrieves one page
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | 2xx with content | Success |
    /// | 2xx, empty or marker missing | Retryable, no further attempts |
    /// | Challenge marker in body, 403 | Rotate (once per call), cooldown, retry |
    /// | 429, 500, 502, 503, 504, network error | Backoff, retry |
    /// | 404, 410 | Fatal |
    /// | Anything else | Fatal, or long sleep and rotation per policy |
    ///
    /// Running out of attempts returns Fatal.
    pub async fn fetch(&self, url: &Url, ctx: &FetchContext) -> FetchResult {
        let max_attempts = self.policy.max_attempts;
        let mut transient_failures = 0u32;
        let mut rotated = false;
        let mut last_reason = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            if self.shutdown.is_cancelled() {
                return FetchResult::Fatal {
                    reason: "interrupted by shutdown".to_string(),
                };
            }

            self.pacer
                .pause(
                    PauseKind::Politeness,
                    random_between(self.policy.politeness_min_ms, self.policy.politeness_max_ms),
                )
                .await;

            let session = self.rotator.begin_request();
            let outcome = match self.transport.get(url, &session).await {
                Ok(response) => self.classify(response, ctx),
                Err(e) => Outcome::Transient(e.to_string()),
            };
            let is_last = attempt == max_attempts;

            match outcome {
                Outcome::Usable(document) => {
                    self.rotator.record_outcome(false);
                    tracing::debug!(url = %url, attempt, "Fetched");
                    return FetchResult::Success(document);
                }

                Outcome::Empty(reason) => {
                    self.rotator.record_outcome(false);
                    tracing::debug!(url = %url, attempt, "{}", reason);
                    return FetchResult::Retryable {
                        reason,
                        attempts: attempt,
                    };
                }

                Outcome::Transient(reason) => {
                    tracing::warn!(url = %url, attempt, "Transient failure: {}", reason);
                    transient_failures += 1;

                    if self.rotator.record_outcome(true) && !rotated {
                        tracing::info!(url = %url, "Failures clustering, rotating identity early");
                        self.rotator.rotate_from(session.generation);
                        rotated = true;
                    }

                    if !is_last {
                        let delay = backoff_delay(
                            transient_failures,
                            self.policy.backoff_base,
                            self.policy.backoff_cap,
                            self.policy.backoff_jitter,
                        );
                        self.pacer.pause(PauseKind::Backoff, delay).await;
                    }
                    last_reason = reason;
                }

                Outcome::Blocked(reason) => {
                    tracing::warn!(url = %url, attempt, "Blocked: {}", reason);
                    self.rotator.record_outcome(true);

                    if !rotated {
                        self.rotator.rotate_from(session.generation);
                        rotated = true;
                    }

                    if !is_last {
                        self.pacer
                            .pause(PauseKind::Cooldown, self.policy.block_cooldown)
                            .await;
                    }
                    last_reason = reason;
                }

                Outcome::Gone(reason) => {
                    tracing::warn!(url = %url, "{}", reason);
                    return FetchResult::Fatal { reason };
                }

                Outcome::Unexpected(status) => {
                    let reason = format!("unexpected HTTP status {}", status);
                    match self.policy.unexpected_status {
                        UnexpectedStatusPolicy::Fatal => {
                            tracing::error!(url = %url, status, "Unexpected status, giving up");
                            return FetchResult::Fatal { reason };
                        }
                        UnexpectedStatusPolicy::SleepAndReset => {
                            tracing::warn!(url = %url, status, "Unexpected status, sleeping before reset");
                            if !is_last {
                                self.pacer
                                    .pause(PauseKind::StatusSleep, self.policy.unexpected_status_sleep)
                                    .await;
                            }
                            if !rotated {
                                self.rotator.rotate_from(session.generation);
                                rotated = true;
                            }
                        }
                    }
                    last_reason = reason;
                }
            }
        }

        tracing::warn!(url = %url, "Giving up after {} attempts", max_attempts);
        FetchResult::Fatal {
            reason: format!("gave up after {} attempts: {}", max_attempts, last_reason),
        }
    }

    fn classify(&self, response: RawResponse, ctx: &FetchContext) -> Outcome {
        let RawResponse {
            status,
            final_url,
            body,
        } = response;

        if let Some(marker) = self
            .policy
            .challenge_markers
            .iter()
            .find(|m| !m.is_empty() && body.contains(m.as_str()))
        {
            return Outcome::Blocked(format!("challenge page (\"{}\")", marker));
        }

        match status {
            200..=299 => {
                if body.trim().is_empty() {
                    return Outcome::Empty("empty response body".to_string());
                }
                if let Some(marker) = &ctx.expected_marker {
                    if !body.contains(marker.as_str()) {
                        return Outcome::Empty(format!("expected content \"{}\" missing", marker));
                    }
                }
                Outcome::Usable(Document {
                    url: final_url,
                    status,
                    body,
                })
            }
            403 => Outcome::Blocked("HTTP 403".to_string()),
            429 | 500 | 502 | 503 | 504 => Outcome::Transient(format!("HTTP {}", status)),
            404 | 410 => Outcome::Gone(format!("HTTP {}", status)),
            other => Outcome::Unexpected(other),
        }
    }
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crawler::pacer::RecordingPacer;
    use crate::crawler::transport::TransportError;
    use crate::session::SessionState;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of responses, then repeats the last one
    pub(crate) struct ScriptedTransport {
        script: Mutex<VecDeque<Result<(u16, String), ()>>>,
        last: Mutex<Option<Result<(u16, String), ()>>>,
        pub generations: Mutex<Vec<u64>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<Result<(u16, &str), ()>>) -> Self {
            Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|r| r.map(|(s, b)| (s, b.to_string())))
                        .collect(),
                ),
                last: Mutex::new(None),
                generations: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn statuses(codes: &[u16]) -> Self {
            Self::new(codes.iter().map(|c| Ok((*c, "<html>ok</html>"))).collect())
        }

        pub(crate) fn calls(&self) -> usize {
            self.generations.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(
            &self,
            url: &Url,
            session: &SessionState,
        ) -> Result<RawResponse, TransportError> {
            self.generations.lock().unwrap().push(session.generation);

            let next = self.script.lock().unwrap().pop_front();
            let step = match next {
                Some(step) => {
                    *self.last.lock().unwrap() = Some(step.clone());
                    step
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or(Err(())),
            };

            match step {
                Ok((status, body)) => Ok(RawResponse {
                    status,
                    final_url: url.clone(),
                    body,
                }),
                Err(()) => Err(TransportError::Timeout),
            }
        }
    }

    pub(crate) fn test_policy() -> FetchPolicy {
        FetchPolicy {
            max_attempts: 5,
            politeness_min_ms: 0,
            politeness_max_ms: 0,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(120),
            backoff_jitter: 0.5,
            block_cooldown: Duration::from_secs(1800),
            unexpected_status: UnexpectedStatusPolicy::Fatal,
            unexpected_status_sleep: Duration::from_secs(7200),
            challenge_markers: IdentityConfig::default().challenge_markers,
        }
    }

    fn client_with(
        transport: Arc<ScriptedTransport>,
        policy: FetchPolicy,
        identity: IdentityConfig,
    ) -> (FetchClient, Arc<SessionRotator>, Arc<RecordingPacer>) {
        let rotator = Arc::new(SessionRotator::new(&identity));
        let pacer = Arc::new(RecordingPacer::new());
        let client = FetchClient::new(
            transport,
            Arc::clone(&rotator),
            pacer.clone(),
            policy,
            CancellationToken::new(),
        );
        (client, rotator, pacer)
    }

    fn client(
        transport: Arc<ScriptedTransport>,
    ) -> (FetchClient, Arc<SessionRotator>, Arc<RecordingPacer>) {
        client_with(transport, test_policy(), IdentityConfig::default())
    }

    fn url() -> Url {
        Url::parse("https://youcontrol.com.ua/catalog/company_details/12345678/").unwrap()
    }

    #[tokio::test]
    async fn test_success_after_two_rate_limits() {
        let transport = Arc::new(ScriptedTransport::statuses(&[429, 429, 200]));
        let (client, _, pacer) = client(transport.clone());

        let result = client.fetch(&url(), &FetchContext::default()).await;

        assert!(result.is_success());
        assert_eq!(transport.calls(), 3);

        let backoffs = pacer.delays(PauseKind::Backoff);
        assert_eq!(backoffs.len(), 2);
        assert!(backoffs[1] > backoffs[0]);
        assert_eq!(pacer.delays(PauseKind::Politeness).len(), 3);
    }

    #[tokio::test]
    async fn test_repeated_403_rotates_at_most_once() {
        let transport = Arc::new(ScriptedTransport::statuses(&[403, 403, 403, 403, 403]));
        let (client, rotator, pacer) = client(transport.clone());
        let before = rotator.current();

        let result = client.fetch(&url(), &FetchContext::default()).await;

        assert!(matches!(result, FetchResult::Fatal { .. }));
        assert_eq!(transport.calls(), 5);
        assert_eq!(rotator.rotations(), 1);
        assert_ne!(rotator.current().identity.user_agent, before.identity.user_agent);
        // Cooldown after every block except the last attempt
        assert_eq!(pacer.delays(PauseKind::Cooldown).len(), 4);
    }

    #[tokio::test]
    async fn test_requests_after_block_use_new_session() {
        let transport = Arc::new(ScriptedTransport::statuses(&[403, 200]));
        let (client, _, _) = client(transport.clone());

        let result = client.fetch(&url(), &FetchContext::default()).await;

        assert!(result.is_success());
        assert_eq!(*transport.generations.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_challenge_marker_is_a_block() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok((200, "<html><title>Checking your browser before accessing</title></html>")),
            Ok((200, "<html>company</html>")),
        ]));
        let (client, rotator, pacer) = client(transport);

        let result = client.fetch(&url(), &FetchContext::default()).await;

        assert!(result.is_success());
        assert_eq!(rotator.rotations(), 1);
        assert_eq!(pacer.delays(PauseKind::Cooldown), vec![Duration::from_secs(1800)]);
    }

    #[tokio::test]
    async fn test_not_found_is_fatal_without_retry() {
        let transport = Arc::new(ScriptedTransport::statuses(&[404]));
        let (client, _, _) = client(transport.clone());

        let result = client.fetch(&url(), &FetchContext::default()).await;

        assert!(matches!(result, FetchResult::Fatal { .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_body_is_retryable() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok((200, "   "))]));
        let (client, _, _) = client(transport.clone());

        let result = client.fetch(&url(), &FetchContext::default()).await;

        match result {
            FetchResult::Retryable { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("expected Retryable, got {:?}", other),
        }
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_marker_is_retryable() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok((200, "<html>loading</html>"))]));
        let (client, _, _) = client(transport);

        let result = client
            .fetch(&url(), &FetchContext::expecting("seo-table-row"))
            .await;

        assert!(matches!(result, FetchResult::Retryable { .. }));
    }

    #[tokio::test]
    async fn test_network_errors_exhaust_to_fatal() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(())]));
        let (client, _, pacer) = client(transport.clone());

        let result = client.fetch(&url(), &FetchContext::default()).await;

        assert!(matches!(result, FetchResult::Fatal { .. }));
        assert_eq!(transport.calls(), 5);
        assert_eq!(pacer.delays(PauseKind::Backoff).len(), 4);
    }

    #[tokio::test]
    async fn test_clustered_failures_rotate_proactively() {
        let identity = IdentityConfig {
            block_window: 10,
            block_threshold: 3,
            ..IdentityConfig::default()
        };
        let transport = Arc::new(ScriptedTransport::statuses(&[503, 503, 503, 200]));
        let (client, rotator, _) = client_with(transport.clone(), test_policy(), identity);

        let result = client.fetch(&url(), &FetchContext::default()).await;

        assert!(result.is_success());
        assert_eq!(rotator.rotations(), 1);
        assert_eq!(*transport.generations.lock().unwrap(), vec![0, 0, 0, 1]);
    }

    #[tokio::test]
    async fn test_unexpected_status_policies() {
        let transport = Arc::new(ScriptedTransport::statuses(&[418]));
        let (client, _, _) = client(transport.clone());
        assert!(matches!(
            client.fetch(&url(), &FetchContext::default()).await,
            FetchResult::Fatal { .. }
        ));
        assert_eq!(transport.calls(), 1);

        let policy = FetchPolicy {
            unexpected_status: UnexpectedStatusPolicy::SleepAndReset,
            ..test_policy()
        };
        let transport = Arc::new(ScriptedTransport::statuses(&[418, 200]));
        let (client, rotator, pacer) =
            client_with(transport, policy, IdentityConfig::default());

        assert!(client.fetch(&url(), &FetchContext::default()).await.is_success());
        assert_eq!(rotator.rotations(), 1);
        assert_eq!(pacer.delays(PauseKind::StatusSleep), vec![Duration::from_secs(7200)]);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_makes_no_request() {
        let transport = Arc::new(ScriptedTransport::statuses(&[200]));
        let rotator = Arc::new(SessionRotator::new(&IdentityConfig::default()));
        let token = CancellationToken::new();
        let client = FetchClient::new(
            transport.clone(),
            rotator,
            Arc::new(RecordingPacer::new()),
            test_policy(),
            token.clone(),
        );
        token.cancel();

        let result = client.fetch(&url(), &FetchContext::default()).await;

        assert!(matches!(result, FetchResult::Fatal { .. }));
        assert_eq!(transport.calls(), 0);
    }
}

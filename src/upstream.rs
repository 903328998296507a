//! Upstream HTTP client with bounded retry
//!
//! `UpstreamClient` performs one logical call against an external API. Each
//! attempt is classified into an [`UpstreamResult`]; transient failures are
//! retried with linear backoff up to the attempt budget, and rate-limited
//! responses are retried on a capped schedule that does not consume that
//! budget. The transport and the sleep function are injected so the retry
//! schedule can be exercised without a network or a wall clock.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Attempts allowed for transient failures
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for linear backoff (`base_delay * attempt`)
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Step for the rate-limit schedule (`step * hits`)
const DEFAULT_RATE_LIMIT_STEP: Duration = Duration::from_secs(20);

/// Upper bound for a single rate-limit wait
const DEFAULT_RATE_LIMIT_CAP: Duration = Duration::from_secs(90);

/// Rate-limited responses tolerated before giving up
const DEFAULT_RATE_LIMIT_RETRIES: u32 = 8;

/// Retry configuration for an [`UpstreamClient`]
///
/// Built once at startup and copied into the client; nothing mutates it
/// afterwards. Tests substitute a policy with millisecond delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for transient failures (values below 1 behave as 1)
    pub max_attempts: u32,
    /// Linear backoff unit between transient failures
    pub base_delay: Duration,
    /// Increment of the rate-limit wait per rate-limited response
    pub rate_limit_step: Duration,
    /// Ceiling for a single rate-limit wait
    pub rate_limit_cap_delay: Duration,
    /// Maximum rate-limit retries; `None` retries for as long as the upstream keeps answering 429
    pub rate_limit_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            rate_limit_step: DEFAULT_RATE_LIMIT_STEP,
            rate_limit_cap_delay: DEFAULT_RATE_LIMIT_CAP,
            rate_limit_retries: Some(DEFAULT_RATE_LIMIT_RETRIES),
        }
    }
}

impl RetryPolicy {
    /// Wait after the given (1-based) failed attempt
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Wait after the given (1-based) rate-limited response
    pub fn rate_limit_delay(&self, hits: u32) -> Duration {
        self.rate_limit_step
            .saturating_mul(hits)
            .min(self.rate_limit_cap_delay)
    }

    fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// An upstream API key
///
/// Keys travel as query parameters, so they never appear in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// HTTP method of an upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fully described upstream call, replayed verbatim on every attempt
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// Short upstream name used in logs and error messages
    pub upstream: &'static str,
    pub method: Method,
    /// URL without query string
    pub url: String,
    /// Non-secret query parameters
    pub query: Vec<(String, String)>,
    /// Query parameter name and value carrying the API key
    pub credential: Option<(&'static str, ApiKey)>,
    /// JSON body for POST requests
    pub body: Option<Value>,
}

/// Status and body of a completed HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Errors raised by a [`Transport`] before a complete response was read
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request did not complete within the configured timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection or protocol failure
    #[error("network error: {0}")]
    Network(String),

    /// Response headers arrived but the body could not be read
    #[error("failed to read response body: {0}")]
    Body(String),

    /// The request could not be built; retrying will not help
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    fn from_reqwest(error: reqwest::Error) -> Self {
        // The URL carries the API key, so it is stripped before formatting
        let is_timeout = error.is_timeout();
        let is_builder = error.is_builder();
        let message = error.without_url().to_string();
        if is_timeout {
            TransportError::Timeout(message)
        } else if is_builder {
            TransportError::InvalidRequest(message)
        } else {
            TransportError::Network(message)
        }
    }
}

/// Seam between the retry loop and the HTTP stack
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a UpstreamRequest,
    ) -> BoxFuture<'a, Result<RawResponse, TransportError>>;
}

/// Production transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a UpstreamRequest,
    ) -> BoxFuture<'a, Result<RawResponse, TransportError>> {
        Box::pin(async move {
            let mut builder = match request.method {
                Method::Get => self.client.get(&request.url),
                Method::Post => self.client.post(&request.url),
            };
            builder = builder.query(&request.query);
            if let Some((param, key)) = &request.credential {
                builder = builder.query(&[(*param, key.expose())]);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(TransportError::from_reqwest)?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::Body(e.without_url().to_string()))?;

            Ok(RawResponse { status, body })
        })
    }
}

/// Sleep function used between attempts
pub type Sleeper = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Sleeper backed by the tokio timer
pub fn tokio_sleeper() -> Sleeper {
    Arc::new(|delay| Box::pin(tokio::time::sleep(delay)))
}

/// Why a single attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCause {
    /// HTTP status, when the upstream answered at all
    pub status: Option<StatusCode>,
    pub message: String,
}

/// Classification of a single upstream attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamResult {
    /// 2xx with a readable body
    Success(String),
    /// Retryable failure: network error, timeout, non-2xx status
    TransientFailure(FailureCause),
    /// The upstream answered 429
    RateLimited,
    /// Failure that retrying cannot fix
    FatalFailure(FailureCause),
}

/// Classifies the outcome of one transport call
pub fn classify(outcome: Result<RawResponse, TransportError>) -> UpstreamResult {
    match outcome {
        Ok(response) if response.status.is_success() => UpstreamResult::Success(response.body),
        Ok(response) if response.status == StatusCode::TOO_MANY_REQUESTS => {
            UpstreamResult::RateLimited
        }
        Ok(response) => UpstreamResult::TransientFailure(FailureCause {
            status: Some(response.status),
            message: format!("upstream returned {}", response.status),
        }),
        Err(error @ TransportError::InvalidRequest(_)) => {
            UpstreamResult::FatalFailure(FailureCause {
                status: None,
                message: error.to_string(),
            })
        }
        Err(error) => UpstreamResult::TransientFailure(FailureCause {
            status: None,
            message: error.to_string(),
        }),
    }
}

/// Terminal failure of an upstream call after retries were exhausted
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct UpstreamFailure {
    /// Upstream name
    pub upstream: &'static str,
    /// Last HTTP status seen, if any
    pub status: Option<StatusCode>,
    /// Attempts counted against the budget (rate-limited retries excluded)
    pub attempts: u32,
    pub message: String,
}

impl UpstreamFailure {
    fn from_cause(upstream: &'static str, attempts: u32, cause: FailureCause) -> Self {
        Self {
            upstream,
            status: cause.status,
            attempts,
            message: format!(
                "{} upstream failed after {} attempt(s): {}",
                upstream, attempts, cause.message
            ),
        }
    }

    fn rate_limited(upstream: &'static str, attempts: u32, hits: u32) -> Self {
        Self {
            upstream,
            status: Some(StatusCode::TOO_MANY_REQUESTS),
            attempts,
            message: format!(
                "{} upstream is rate limiting requests ({} responses with status 429)",
                upstream, hits
            ),
        }
    }
}

/// Performs upstream calls under a fixed [`RetryPolicy`]
///
/// Holds no per-call state; clones share the transport and can run
/// concurrently. Backoff sleeps only suspend the calling task.
#[derive(Clone)]
pub struct UpstreamClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    sleeper: Sleeper,
}

impl fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl UpstreamClient {
    /// Creates a client that sleeps on the tokio timer
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            sleeper: tokio_sleeper(),
        }
    }

    /// Replaces the sleep function (used by tests to record waits)
    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Performs one logical call, retrying per the policy
    ///
    /// # Returns
    /// * `Ok(body)` - body of the first successful attempt
    /// * `Err(UpstreamFailure)` - the attempt budget or the rate-limit budget ran out,
    ///   or the request cannot succeed at all
    pub async fn fetch(&self, request: &UpstreamRequest) -> Result<String, UpstreamFailure> {
        self.fetch_parsed(request, |body| Ok::<_, Infallible>(body.to_string()))
            .await
    }

    /// Like [`fetch`](Self::fetch), but an attempt only succeeds once `parse`
    /// accepts its body
    ///
    /// A 2xx response whose body `parse` rejects is a transient failure and
    /// uses up an attempt like any other.
    pub async fn fetch_parsed<T, E, F>(
        &self,
        request: &UpstreamRequest,
        parse: F,
    ) -> Result<T, UpstreamFailure>
    where
        E: fmt::Display,
        F: Fn(&str) -> Result<T, E>,
    {
        let budget = self.policy.attempt_budget();
        let mut attempt: u32 = 1;
        let mut rate_limited: u32 = 0;

        loop {
            debug!(upstream = request.upstream, attempt, "calling upstream");
            let cause = match classify(self.transport.send(request).await) {
                UpstreamResult::Success(body) => match parse(&body) {
                    Ok(value) => {
                        if attempt > 1 || rate_limited > 0 {
                            info!(
                                upstream = request.upstream,
                                attempt, rate_limited, "upstream recovered"
                            );
                        }
                        return Ok(value);
                    }
                    Err(e) => FailureCause {
                        status: None,
                        message: format!("unusable response body: {}", e),
                    },
                },
                UpstreamResult::RateLimited => {
                    rate_limited += 1;
                    if self
                        .policy
                        .rate_limit_retries
                        .is_some_and(|limit| rate_limited > limit)
                    {
                        warn!(
                            upstream = request.upstream,
                            rate_limited, "giving up after repeated rate limiting"
                        );
                        return Err(UpstreamFailure::rate_limited(
                            request.upstream,
                            attempt,
                            rate_limited,
                        ));
                    }
                    let wait = self.policy.rate_limit_delay(rate_limited);
                    warn!(
                        upstream = request.upstream,
                        rate_limited,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    (self.sleeper)(wait).await;
                    continue;
                }
                UpstreamResult::FatalFailure(cause) => {
                    return Err(self.give_up(request, attempt, cause));
                }
                UpstreamResult::TransientFailure(cause) => cause,
            };

            if attempt >= budget {
                return Err(self.give_up(request, attempt, cause));
            }
            let wait = self.policy.backoff_delay(attempt);
            warn!(
                upstream = request.upstream,
                attempt,
                error = %cause.message,
                wait_ms = wait.as_millis() as u64,
                "transient upstream failure, retrying"
            );
            (self.sleeper)(wait).await;
            attempt += 1;
        }
    }

    fn give_up(
        &self,
        request: &UpstreamRequest,
        attempt: u32,
        cause: FailureCause,
    ) -> UpstreamFailure {
        let failure = UpstreamFailure::from_cause(request.upstream, attempt, cause);
        warn!(upstream = request.upstream, error = %failure, "upstream call failed");
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Transport that replays a fixed script of outcomes
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<RawResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for ScriptedTransport {
        fn send<'a>(
            &'a self,
            _request: &'a UpstreamRequest,
        ) -> BoxFuture<'a, Result<RawResponse, TransportError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            Box::pin(async move { next })
        }
    }

    fn status(code: u16) -> Result<RawResponse, TransportError> {
        Ok(RawResponse {
            status: StatusCode::from_u16(code).unwrap(),
            body: format!("body-{}", code),
        })
    }

    fn recording_sleeper() -> (Sleeper, Arc<Mutex<Vec<Duration>>>) {
        let waits = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&waits);
        let sleeper: Sleeper = Arc::new(move |delay| {
            recorded.lock().unwrap().push(delay);
            Box::pin(async {})
        });
        (sleeper, waits)
    }

    fn request() -> UpstreamRequest {
        UpstreamRequest {
            upstream: "test",
            method: Method::Get,
            url: "http://upstream.invalid/feed".to_string(),
            query: Vec::new(),
            credential: Some(("apiKey", ApiKey::new("secret"))),
            body: None,
        }
    }

    fn client(
        transport: Arc<ScriptedTransport>,
        policy: RetryPolicy,
    ) -> (UpstreamClient, Arc<Mutex<Vec<Duration>>>) {
        let (sleeper, waits) = recording_sleeper();
        let client = UpstreamClient::new(transport, policy).with_sleeper(sleeper);
        (client, waits)
    }

    #[test]
    fn test_default_policy_constants() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.rate_limit_step, Duration::from_secs(20));
        assert_eq!(policy.rate_limit_cap_delay, Duration::from_secs(90));
        assert_eq!(policy.rate_limit_retries, Some(8));
    }

    #[test]
    fn test_backoff_delay_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(6));
    }

    #[test]
    fn test_rate_limit_delay_is_capped() {
        let policy = RetryPolicy::default();
        let waits: Vec<u64> = (1..=7).map(|n| policy.rate_limit_delay(n).as_secs()).collect();
        assert_eq!(waits, vec![20, 40, 60, 80, 90, 90, 90]);
    }

    #[test]
    fn test_classify_outcomes() {
        assert_eq!(classify(status(200)), UpstreamResult::Success("body-200".into()));
        assert_eq!(classify(status(429)), UpstreamResult::RateLimited);
        assert!(matches!(
            classify(status(503)),
            UpstreamResult::TransientFailure(FailureCause { status: Some(s), .. })
                if s == StatusCode::SERVICE_UNAVAILABLE
        ));
        assert!(matches!(
            classify(Err(TransportError::Timeout("slow".into()))),
            UpstreamResult::TransientFailure(FailureCause { status: None, .. })
        ));
        assert!(matches!(
            classify(Err(TransportError::InvalidRequest("bad url".into()))),
            UpstreamResult::FatalFailure(_)
        ));
    }

    #[test]
    fn test_api_key_is_redacted_in_debug() {
        let debug = format!("{:?}", request());
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_success_after_two_server_errors() {
        let transport = ScriptedTransport::new(vec![status(500), status(500), status(200)]);
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        let (client, waits) = client(Arc::clone(&transport), policy);

        let body = client.fetch(&request()).await.expect("third attempt succeeds");

        assert_eq!(body, "body-200");
        assert_eq!(transport.calls(), 3);
        assert_eq!(
            *waits.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_failure() {
        let transport = ScriptedTransport::new(vec![status(502), status(500), status(503)]);
        let (client, waits) = client(Arc::clone(&transport), RetryPolicy::default());

        let failure = client.fetch(&request()).await.unwrap_err();

        assert_eq!(transport.calls(), 3);
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.status, Some(StatusCode::SERVICE_UNAVAILABLE));
        assert!(failure.message.contains("503"));
        assert_eq!(waits.lock().unwrap().len(), 2);
    }

    fn body(text: &str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse {
            status: StatusCode::OK,
            body: text.to_string(),
        })
    }

    fn parse_number(body: &str) -> Result<u32, std::num::ParseIntError> {
        body.trim().parse()
    }

    #[tokio::test]
    async fn test_unparseable_success_body_is_retried() {
        let transport = ScriptedTransport::new(vec![body("<html>proxy</html>"), body("42")]);
        let (client, waits) = client(Arc::clone(&transport), RetryPolicy::default());

        let value = client
            .fetch_parsed(&request(), parse_number)
            .await
            .expect("second attempt parses");

        assert_eq!(value, 42);
        assert_eq!(transport.calls(), 2);
        assert_eq!(*waits.lock().unwrap(), vec![Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_unparseable_bodies_exhaust_attempts() {
        let transport =
            ScriptedTransport::new(vec![body("junk"), status(500), body("still junk")]);
        let (client, _waits) = client(Arc::clone(&transport), RetryPolicy::default());

        let failure = client
            .fetch_parsed(&request(), parse_number)
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 3);
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.status, None);
        assert!(failure.message.contains("unusable response body"));
    }

    #[tokio::test]
    async fn test_network_errors_are_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Network("connection reset".into())),
            Err(TransportError::Timeout("deadline".into())),
            status(200),
        ]);
        let (client, _waits) = client(Arc::clone(&transport), RetryPolicy::default());

        assert!(client.fetch(&request()).await.is_ok());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_retried() {
        let transport =
            ScriptedTransport::new(vec![Err(TransportError::InvalidRequest("no host".into()))]);
        let (client, waits) = client(Arc::clone(&transport), RetryPolicy::default());

        let failure = client.fetch(&request()).await.unwrap_err();

        assert_eq!(transport.calls(), 1);
        assert_eq!(failure.status, None);
        assert!(waits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_schedule_does_not_consume_attempts() {
        let mut script: Vec<_> = (0..6).map(|_| status(429)).collect();
        script.push(status(200));
        let transport = ScriptedTransport::new(script);
        let policy = RetryPolicy {
            max_attempts: 1,
            rate_limit_retries: None,
            ..RetryPolicy::default()
        };
        let (client, waits) = client(Arc::clone(&transport), policy);

        let body = client.fetch(&request()).await.expect("eventually succeeds");

        assert_eq!(body, "body-200");
        assert_eq!(transport.calls(), 7);
        let secs: Vec<u64> = waits.lock().unwrap().iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![20, 40, 60, 80, 90, 90]);
    }

    #[tokio::test]
    async fn test_rate_limit_budget_is_enforced() {
        let transport = ScriptedTransport::new((0..3).map(|_| status(429)).collect());
        let policy = RetryPolicy {
            rate_limit_retries: Some(2),
            ..RetryPolicy::default()
        };
        let (client, waits) = client(Arc::clone(&transport), policy);

        let failure = client.fetch(&request()).await.unwrap_err();

        assert_eq!(transport.calls(), 3);
        assert_eq!(failure.status, Some(StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(failure.attempts, 1);
        assert_eq!(waits.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mixed_rate_limit_and_transient_failures() {
        let transport = ScriptedTransport::new(vec![
            status(429),
            status(500),
            status(429),
            status(500),
            status(200),
        ]);
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        let (client, waits) = client(Arc::clone(&transport), policy);

        assert!(client.fetch(&request()).await.is_ok());
        let secs: Vec<u64> = waits.lock().unwrap().iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![20, 1, 40, 2]);
    }
}

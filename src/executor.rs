//! Rate-limited request execution with retry and session recovery
//!
//! Every request to a site flows through its [`RequestExecutor`]: a token
//! bucket keeps the site happy, transient failures get a bounded
//! exponential-backoff retry, and a per-request deadline caps the total
//! wait. `execute_authenticated` layers the session dance on top: detect an
//! expiry signal, re-login once, re-issue the request once, and give up
//! with an authentication error if the fresh session dies too.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, TransportError};
use crate::session::{SessionManager, SessionState};
use crate::transport::{HttpRequest, RawResponse, Transport};

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per second
    pub requests_per_second: u32,
    /// Burst capacity (allows short bursts above the rate)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // Be conservative with trackers
        Self {
            requests_per_second: 1,
            burst_size: 3,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_interval: Duration,
    /// Maximum backoff duration
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create an ExponentialBackoff from this config
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        }
    }
}

/// Everything the executor needs to know about pacing one site
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    /// Deadline for a single request attempt, transport time included
    pub request_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Statuses worth a bounded retry before involving the caller.
/// 429 (rate limit), 500-599 (server errors), 408 (timeout).
fn is_transient_status(status: u16) -> bool {
    status == 429 || status == 408 || (500..600).contains(&status)
}

fn with_session(request: &HttpRequest, state: &SessionState) -> HttpRequest {
    let mut request = request.clone();
    if !state.cookies.is_empty() {
        request.cookies = Some(state.cookies.clone());
    }
    request
}

/// Paces, retries, and authenticates every request to one site
pub struct RequestExecutor {
    site: String,
    transport: Arc<dyn Transport>,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl RequestExecutor {
    pub fn new(site: impl Into<String>, transport: Arc<dyn Transport>, config: ExecutorConfig) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.rate_limit.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.rate_limit.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            site: site.into(),
            transport,
            limiter: RateLimiter::direct(quota),
            retry: config.retry,
            request_timeout: config.request_timeout,
        }
    }

    /// One paced attempt under the per-request deadline
    async fn send_once(&self, request: &HttpRequest) -> Result<RawResponse, TransportError> {
        self.limiter.until_ready().await;
        debug!(site = %self.site, url = %request.url, "Sending rate-limited request");

        match timeout(self.request_timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Execute a request with rate limiting and retries.
    ///
    /// Transport failures and transient statuses are retried with backoff.
    /// A response that is still transient after the last attempt is
    /// returned as `Ok` so the caller can classify it; only transport
    /// failures surface as errors here.
    pub async fn execute(&self, request: &HttpRequest) -> Result<RawResponse, PipelineError> {
        let mut attempts = 0;
        let mut backoff = self.retry.to_backoff();

        loop {
            attempts += 1;
            let outcome = self.send_once(request).await;

            let transient = match &outcome {
                Ok(response) => is_transient_status(response.status),
                Err(_) => true,
            };

            if !transient || attempts >= self.retry.max_retries {
                return outcome.map_err(|source| PipelineError::Transport {
                    site: self.site.clone(),
                    source,
                });
            }

            match backoff.next_backoff() {
                Some(duration) => {
                    let retry_ms: u128 = duration.as_millis();
                    match &outcome {
                        Ok(response) => warn!(
                            site = %self.site,
                            status = response.status,
                            attempt = attempts,
                            retry_in_ms = retry_ms,
                            "Transient status, retrying"
                        ),
                        Err(e) => warn!(
                            site = %self.site,
                            error = %e,
                            attempt = attempts,
                            retry_in_ms = retry_ms,
                            "Request failed, retrying"
                        ),
                    }
                    tokio::time::sleep(duration).await;
                }
                None => {
                    return outcome.map_err(|source| PipelineError::Transport {
                        site: self.site.clone(),
                        source,
                    });
                }
            }
        }
    }

    /// Execute a request under the site's session, recovering from expiry.
    ///
    /// On an expiry signal the session is replaced (once) and the request
    /// re-issued (once) with the fresh cookies. A second expiry in a row
    /// means the credentials themselves are bad. Timeouts and other
    /// transport failures never count as expiry.
    pub async fn execute_authenticated(
        &self,
        session: &SessionManager,
        request: &HttpRequest,
    ) -> Result<RawResponse, PipelineError> {
        let (epoch, state) = session.ensure(self).await?;
        let response = self.execute(&with_session(request, &state)).await?;

        let signals = session.expiry_signals();
        if !signals.iter().any(|s| s.matches(&response)) {
            return self.classify(response);
        }

        info!(site = %self.site, url = %request.url, "Session expired mid-request, recovering");
        let (_, fresh) = session.reauthenticate(self, epoch).await?;
        let response = self.execute(&with_session(request, &fresh)).await?;

        if signals.iter().any(|s| s.matches(&response)) {
            session.invalidate().await;
            return Err(PipelineError::Authentication {
                site: self.site.clone(),
                reason: "session expired again immediately after re-login".to_string(),
            });
        }
        self.classify(response)
    }

    /// Reject statuses no parser should ever see. Runs after the expiry
    /// checks so a logged-out redirect is handled as expiry, not as a
    /// status error.
    fn classify(&self, response: RawResponse) -> Result<RawResponse, PipelineError> {
        if response.is_success() {
            return Ok(response);
        }

        // Some sites answer a torrent download with a redirect straight to
        // the magnet URI; that is the one redirect callers can use.
        if response.is_redirect()
            && response
                .location()
                .map(|l| l.starts_with("magnet:"))
                .unwrap_or(false)
        {
            return Ok(response);
        }

        Err(PipelineError::UnexpectedStatus {
            site: self.site.clone(),
            status: response.status,
            url: response.url.clone(),
        })
    }
}

// Logins requested by the session manager ride the same token bucket and
// deadline as everything else sent to the site.
#[async_trait]
impl Transport for RequestExecutor {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse, TransportError> {
        self.send_once(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ExpirySignal, FormLogin};
    use crate::testing::{MockResponse, MockTransport};

    fn fast_executor(transport: Arc<MockTransport>) -> RequestExecutor {
        RequestExecutor::new(
            "demo",
            transport,
            ExecutorConfig {
                rate_limit: RateLimitConfig {
                    requests_per_second: 1000,
                    burst_size: 1000,
                },
                retry: RetryConfig {
                    max_retries: 3,
                    initial_interval: Duration::from_millis(1),
                    max_interval: Duration::from_millis(5),
                    multiplier: 1.5,
                },
                request_timeout: Duration::from_secs(5),
            },
        )
    }

    fn session_manager_with(expiry: Vec<ExpirySignal>) -> SessionManager {
        SessionManager::new(
            "demo",
            Arc::new(FormLogin {
                site: "demo".to_string(),
                login_url: "https://demo.example/login.php".to_string(),
                form: vec![("username".to_string(), "alice".to_string())],
                csrf: None,
                probe_url: None,
                success_marker: "/logout.php".to_string(),
                error_selector: None,
                expiry,
            }),
        )
    }

    fn session_manager() -> SessionManager {
        session_manager_with(vec![ExpirySignal::MissingMarker("/logout.php".to_string())])
    }

    fn logged_in_page(extra: &str) -> MockResponse {
        MockResponse::html(
            200,
            &format!("<a href=\"/logout.php\">logout</a>{}", extra),
        )
        .with_set_cookie("uid=1")
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(429));
        assert!(is_transient_status(408));
        assert!(is_transient_status(503));
        assert!(!is_transient_status(200));
        assert!(!is_transient_status(404));
        assert!(!is_transient_status(302));
    }

    #[tokio::test]
    async fn test_retries_transient_status_then_succeeds() {
        let transport = Arc::new(MockTransport::new());
        transport.stub_sequence(
            "/search",
            vec![
                MockResponse::html(503, "down"),
                MockResponse::html(200, "ok"),
            ],
        );

        let executor = fast_executor(transport.clone());
        let response = executor
            .execute(&HttpRequest::get("https://demo.example/search"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.request_count("/search"), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_response() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("/search", MockResponse::html(503, "still down"));

        let executor = fast_executor(transport.clone());
        let response = executor
            .execute(&HttpRequest::get("https://demo.example/search"))
            .await
            .unwrap();

        // the caller classifies the final 503; execute only retries it
        assert_eq!(response.status, 503);
        assert_eq!(transport.request_count("/search"), 3);
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_after_retries() {
        let transport = Arc::new(MockTransport::new());
        transport.stub(
            "/search",
            MockResponse::failure(TransportError::Connect("refused".into())),
        );

        let executor = fast_executor(transport.clone());
        let err = executor
            .execute(&HttpRequest::get("https://demo.example/search"))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), "transport");
        assert_eq!(transport.request_count("/search"), 3);
    }

    #[tokio::test]
    async fn test_relogin_and_reissue_on_expiry() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("login.php", logged_in_page(""));
        transport.stub_sequence(
            "/search",
            vec![
                MockResponse::html(200, "please log in"),
                logged_in_page("<table>results</table>"),
            ],
        );

        let executor = fast_executor(transport.clone());
        let session = session_manager();

        let response = executor
            .execute_authenticated(&session, &HttpRequest::get("https://demo.example/search"))
            .await
            .unwrap();

        assert!(response.text().contains("results"));
        assert_eq!(transport.request_count("login.php"), 2);
        assert_eq!(transport.request_count("/search"), 2);
    }

    #[tokio::test]
    async fn test_json_error_expiry_recovers_like_html_expiry() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("login.php", logged_in_page(""));
        transport.stub_sequence(
            "/api",
            vec![
                MockResponse::json(200, r#"{"error":"INVALID_SESSION"}"#),
                MockResponse::json(200, r#"{"results":["ok"]}"#),
            ],
        );

        let executor = fast_executor(transport.clone());
        let session = session_manager_with(vec![ExpirySignal::JsonErrorCode(
            "INVALID_SESSION".to_string(),
        )]);

        let response = executor
            .execute_authenticated(&session, &HttpRequest::get("https://demo.example/api?t=search"))
            .await
            .unwrap();

        assert!(response.text().contains("results"));
        assert_eq!(transport.request_count("login.php"), 2);
        assert_eq!(transport.request_count("/api"), 2);
    }

    #[tokio::test]
    async fn test_second_expiry_is_an_auth_error() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("login.php", logged_in_page(""));
        transport.stub("/search", MockResponse::html(200, "please log in"));

        let executor = fast_executor(transport.clone());
        let session = session_manager();

        let err = executor
            .execute_authenticated(&session, &HttpRequest::get("https://demo.example/search"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Authentication { .. }));
        // one re-login and one re-issue, then give up
        assert_eq!(transport.request_count("login.php"), 2);
        assert_eq!(transport.request_count("/search"), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_not_expiry() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("login.php", logged_in_page(""));
        transport.stub("/search", MockResponse::failure(TransportError::Timeout));

        let executor = fast_executor(transport.clone());
        let session = session_manager();

        let err = executor
            .execute_authenticated(&session, &HttpRequest::get("https://demo.example/search"))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), "transport");
        // no re-login: a timeout says nothing about the session
        assert_eq!(transport.request_count("login.php"), 1);
    }

    #[tokio::test]
    async fn test_unexplained_status_is_rejected_after_expiry_checks() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("login.php", logged_in_page(""));
        transport.stub("/search", MockResponse::html(404, "gone"));

        let executor = fast_executor(transport.clone());
        let session = session_manager();

        let err = executor
            .execute_authenticated(&session, &HttpRequest::get("https://demo.example/search"))
            .await
            .unwrap_err();

        match err {
            PipelineError::UnexpectedStatus { status, .. } => assert_eq!(status, 404),
            other => panic!("expected UnexpectedStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_magnet_redirect_passes_classification() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("login.php", logged_in_page(""));
        transport.stub(
            "/download",
            MockResponse::redirect("magnet:?xt=urn:btih:deadbeef"),
        );

        let executor = fast_executor(transport.clone());
        let session = session_manager();

        let response = executor
            .execute_authenticated(&session, &HttpRequest::get("https://demo.example/download?id=1"))
            .await
            .unwrap();

        assert_eq!(response.status, 302);
        assert!(response.location().unwrap().starts_with("magnet:"));
    }
}

//! Session lifecycle for authenticated sites
//!
//! Private sites hand out session cookies that expire whenever they feel
//! like it, usually by serving a login page with a 200 status. The
//! [`SessionManager`] owns one site's session: it logs in on first use,
//! coalesces concurrent logins into a single request, and replaces an
//! expired session exactly once per detection wave (an epoch counter keeps
//! requests that saw the same dead session from stampeding the login
//! endpoint).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::transport::{HttpRequest, RawResponse, Transport};

/// Where a site's session currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Expired,
}

/// An established session: the cookie material requests carry
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Value for the `Cookie` request header
    pub cookies: String,
    /// When this session was established
    pub established_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(cookies: impl Into<String>) -> Self {
        Self {
            cookies: cookies.into(),
            established_at: Utc::now(),
        }
    }

    /// Build session state from a response's `Set-Cookie` values
    pub fn from_set_cookies(values: &[String]) -> Self {
        Self::new(merge_cookies("", values))
    }
}

/// Fold `Set-Cookie` response values into an existing `Cookie` header
/// value. Later values win for a repeated name; attributes (Path, HttpOnly,
/// ...) are dropped since only the pair goes back to the site.
fn merge_cookies(base: &str, set_cookies: &[String]) -> String {
    let mut pairs: Vec<(String, String)> = Vec::new();

    for part in base.split(';') {
        if let Some((name, value)) = part.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                pairs.push((name.to_string(), value.trim().to_string()));
            }
        }
    }

    for raw in set_cookies {
        let first = raw.split(';').next().unwrap_or("");
        if let Some((name, value)) = first.split_once('=') {
            let name = name.trim();
            let value = value.trim();
            if name.is_empty() {
                continue;
            }
            if let Some(existing) = pairs.iter_mut().find(|(n, _)| n == name) {
                existing.1 = value.to_string();
            } else {
                pairs.push((name.to_string(), value.to_string()));
            }
        }
    }

    pairs
        .iter()
        .map(|(n, v)| format!("{}={}", n, v))
        .collect::<Vec<_>>()
        .join("; ")
}

/// One way a response can reveal that the session behind it is dead.
///
/// Checked after every response: sites routinely serve their login page
/// with a 200 status, so status codes alone prove nothing.
#[derive(Debug, Clone)]
pub enum ExpirySignal {
    /// A marker present only while logged in (e.g. the logout link) is gone
    /// from an otherwise successful page
    MissingMarker(String),
    /// The response redirects to a path fragment (e.g. "/login")
    RedirectTo(String),
    /// The response has a specific status code
    Status(u16),
    /// A JSON body carries the given text in its `error` field
    JsonErrorCode(String),
}

impl ExpirySignal {
    /// Does this response show the session has expired?
    pub fn matches(&self, response: &RawResponse) -> bool {
        match self {
            ExpirySignal::MissingMarker(marker) => {
                // Only a page the site served successfully can prove the
                // marker absent; an error status is not expiry evidence.
                response.is_success() && !response.text().contains(marker.as_str())
            }
            ExpirySignal::RedirectTo(path) => {
                response.is_redirect()
                    && response
                        .location()
                        .map(|l| l.contains(path.as_str()))
                        .unwrap_or(false)
            }
            ExpirySignal::Status(code) => response.status == *code,
            ExpirySignal::JsonErrorCode(code) => {
                match serde_json::from_slice::<serde_json::Value>(&response.body) {
                    Ok(value) => value
                        .get("error")
                        .map(|e| e.to_string().contains(code.as_str()))
                        .unwrap_or(false),
                    Err(_) => false,
                }
            }
        }
    }
}

/// How a site is logged into. Adapters supply one of these; the pipeline
/// never knows the mechanics.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    /// Establish a fresh session from scratch
    async fn login(&self, transport: &dyn Transport) -> Result<SessionState, PipelineError>;

    /// The checks run against every response to spot a dead session
    fn expiry_signals(&self) -> Vec<ExpirySignal>;
}

/// Login flow for public endpoints and key-in-URL APIs: no session to
/// establish, nothing ever expires
pub struct NoAuth;

#[async_trait]
impl LoginFlow for NoAuth {
    async fn login(&self, _transport: &dyn Transport) -> Result<SessionState, PipelineError> {
        Ok(SessionState::new(""))
    }

    fn expiry_signals(&self) -> Vec<ExpirySignal> {
        vec![]
    }
}

/// The CSRF token a login form wants echoed back
#[derive(Debug, Clone)]
pub struct CsrfField {
    /// CSS selector for the element carrying the token (its `value` attribute)
    pub selector: String,
    /// Form field name the token is submitted under
    pub field: String,
}

/// Cookie-based form login: optional CSRF pre-fetch, credential POST,
/// success-marker probe
pub struct FormLogin {
    pub site: String,
    pub login_url: String,
    /// Form fields to submit (credentials included)
    pub form: Vec<(String, String)>,
    /// Fetch the login page first and lift a CSRF token out of it
    pub csrf: Option<CsrfField>,
    /// Page fetched after the POST to confirm the session works. Required
    /// when the site answers the login POST with a redirect instead of a
    /// page body.
    pub probe_url: Option<String>,
    /// Text present only when logged in (e.g. the logout link)
    pub success_marker: String,
    /// CSS selector for the site's own login-failure message
    pub error_selector: Option<String>,
    /// Expiry checks for this site
    pub expiry: Vec<ExpirySignal>,
}

impl FormLogin {
    fn transport_err(&self, source: crate::error::TransportError) -> PipelineError {
        PipelineError::Transport {
            site: self.site.clone(),
            source,
        }
    }
}

#[async_trait]
impl LoginFlow for FormLogin {
    async fn login(&self, transport: &dyn Transport) -> Result<SessionState, PipelineError> {
        let mut cookies = String::new();
        let mut form = self.form.clone();

        if let Some(ref csrf) = self.csrf {
            let request = HttpRequest::get(&self.login_url);
            let response = transport
                .send(&request)
                .await
                .map_err(|e| self.transport_err(e))?;
            cookies = merge_cookies(&cookies, &response.set_cookies());

            let body = response.text().into_owned();
            match select_attr(&body, &csrf.selector, "value") {
                Some(token) => form.push((csrf.field.clone(), token)),
                None => {
                    return Err(PipelineError::Authentication {
                        site: self.site.clone(),
                        reason: format!("login page is missing the {} token", csrf.field),
                    });
                }
            }
        }

        let request = HttpRequest::post_form(&self.login_url, form).with_cookies(cookies.clone());
        let response = transport
            .send(&request)
            .await
            .map_err(|e| self.transport_err(e))?;
        let cookies = merge_cookies(&cookies, &response.set_cookies());

        let probe_body = match self.probe_url {
            Some(ref url) => {
                let request = HttpRequest::get(url).with_cookies(cookies.clone());
                let response = transport
                    .send(&request)
                    .await
                    .map_err(|e| self.transport_err(e))?;
                response.text().into_owned()
            }
            None => response.text().into_owned(),
        };

        if probe_body.contains(&self.success_marker) {
            return Ok(SessionState::new(cookies));
        }

        let reason = self
            .error_selector
            .as_deref()
            .and_then(|selector| select_text(&probe_body, selector))
            .unwrap_or_else(|| "login rejected".to_string());

        Err(PipelineError::Authentication {
            site: self.site.clone(),
            reason,
        })
    }

    fn expiry_signals(&self) -> Vec<ExpirySignal> {
        self.expiry.clone()
    }
}

// These stay synchronous so the non-Send `Html` never lives across an await.
fn select_attr(body: &str, selector: &str, attr: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse(selector).ok()?;
    let element = document.select(&selector).next()?;
    element.value().attr(attr).map(|s| s.to_string())
}

fn select_text(body: &str, selector: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse(selector).ok()?;
    let element = document.select(&selector).next()?;
    let text = element.text().collect::<String>().trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

#[derive(Debug, Default)]
struct SessionSlot {
    state: Option<SessionState>,
    /// Bumped on every login and invalidation; lets requests that saw the
    /// same dead session coalesce on one re-login
    epoch: u64,
    failed_logins: u32,
}

/// Owns one site's session lifecycle
pub struct SessionManager {
    site: String,
    flow: Arc<dyn LoginFlow>,
    status: parking_lot::Mutex<SessionStatus>,
    slot: Mutex<SessionSlot>,
}

impl SessionManager {
    pub fn new(site: impl Into<String>, flow: Arc<dyn LoginFlow>) -> Self {
        Self {
            site: site.into(),
            flow,
            status: parking_lot::Mutex::new(SessionStatus::Unauthenticated),
            slot: Mutex::new(SessionSlot::default()),
        }
    }

    /// Current lifecycle state, for diagnostics
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.lock() = status;
    }

    /// The expiry checks to run against every response
    pub fn expiry_signals(&self) -> Vec<ExpirySignal> {
        self.flow.expiry_signals()
    }

    /// Return the current session, logging in first if there is none.
    /// Concurrent callers share a single login request.
    pub async fn ensure(
        &self,
        transport: &dyn Transport,
    ) -> Result<(u64, SessionState), PipelineError> {
        let mut slot = self.slot.lock().await;
        if let Some(ref state) = slot.state {
            return Ok((slot.epoch, state.clone()));
        }
        self.login_locked(&mut slot, transport).await
    }

    /// Replace a session observed as expired. `seen_epoch` is the epoch the
    /// failing request was sent under; if another request already triggered
    /// the replacement, the fresh session is returned without logging in
    /// again.
    pub async fn reauthenticate(
        &self,
        transport: &dyn Transport,
        seen_epoch: u64,
    ) -> Result<(u64, SessionState), PipelineError> {
        let mut slot = self.slot.lock().await;

        if slot.epoch != seen_epoch {
            if let Some(ref state) = slot.state {
                debug!(
                    site = %self.site,
                    epoch = slot.epoch,
                    "Session already refreshed by a concurrent request"
                );
                return Ok((slot.epoch, state.clone()));
            }
        }

        self.set_status(SessionStatus::Expired);
        info!(site = %self.site, "Session expired, re-authenticating");
        slot.state = None;
        self.login_locked(&mut slot, transport).await
    }

    /// Tear the session down (logout, shutdown, or after a failed recovery)
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        slot.state = None;
        slot.epoch += 1;
        self.set_status(SessionStatus::Unauthenticated);
        debug!(site = %self.site, "Session invalidated");
    }

    async fn login_locked(
        &self,
        slot: &mut SessionSlot,
        transport: &dyn Transport,
    ) -> Result<(u64, SessionState), PipelineError> {
        self.set_status(SessionStatus::Authenticating);
        info!(site = %self.site, "Establishing session");

        match self.flow.login(transport).await {
            Ok(state) => {
                slot.epoch += 1;
                slot.state = Some(state.clone());
                slot.failed_logins = 0;
                self.set_status(SessionStatus::Authenticated);
                info!(site = %self.site, epoch = slot.epoch, "Session established");
                Ok((slot.epoch, state))
            }
            Err(e) => {
                slot.state = None;
                slot.failed_logins += 1;
                self.set_status(SessionStatus::Unauthenticated);
                warn!(
                    site = %self.site,
                    failed_logins = slot.failed_logins,
                    error = %e,
                    "Login failed"
                );
                Err(e)
            }
        }
    }
}

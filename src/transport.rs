//! HTTP transport abstraction
//!
//! The pipeline never talks to `reqwest` directly. Everything goes through
//! the [`Transport`] trait so tests run against a scripted double and
//! callers can swap in their own client (proxies, TLS pinning). Two rules
//! shape the contract: redirects are never followed (a redirect is session
//! evidence the executor must see) and cookies travel explicitly in the
//! request rather than in a client-side jar (the session owns them).

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect;

use crate::error::TransportError;

/// HTTP method for a pipeline request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One outgoing HTTP request, fully described
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Extra headers (referer, user-agent overrides, ...)
    pub headers: Vec<(String, String)>,
    /// Form body for POST requests
    pub form: Option<Vec<(String, String)>>,
    /// Value for the `Cookie` header, attached by the executor from the
    /// current session state
    pub cookies: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: vec![],
            form: None,
            cookies: None,
        }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![],
            form: Some(form),
            cookies: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_cookies(mut self, cookies: impl Into<String>) -> Self {
        let cookies = cookies.into();
        if !cookies.is_empty() {
            self.cookies = Some(cookies);
        }
        self
    }
}

/// One raw HTTP response: status, headers, and the unmodified body bytes.
/// Bodies stay as bytes because torrent downloads are binary; HTML/XML
/// adapters go through [`RawResponse::text`].
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// The URL that was requested (redirects are not followed)
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Body as text, lossy on invalid UTF-8
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// First header with the given name, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All `Set-Cookie` values in response order
    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// The `Location` header, present on redirects
    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// The transport collaborator: sends one request, returns one raw response.
///
/// Implementations must not follow redirects and must not keep their own
/// cookie state.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse, TransportError>;
}

/// Default transport backed by `reqwest`
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(redirect::Policy::none())
            .gzip(true)
            .deflate(true)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(ref cookies) = request.cookies {
            builder = builder.header(reqwest::header::COOKIE, cookies);
        }
        if let Some(ref form) = request.form {
            builder = builder.form(form);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let mut headers = Vec::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(classify_reqwest_error)?
            .to_vec();

        Ok(RawResponse {
            status,
            url: request.url.clone(),
            headers,
            body,
        })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Http(e.to_string())
    }
}

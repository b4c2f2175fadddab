//! Scripted transport for tests
//!
//! Routes are matched by URL substring; each route holds a queue of
//! responses consumed in order, with the last one repeating. Every request
//! is logged so tests can assert on what actually went over the wire.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::TransportError;
use crate::transport::{HttpRequest, RawResponse, Transport};

/// One canned response
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    delay: Option<Duration>,
    failure: Option<TransportError>,
}

impl MockResponse {
    pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: body.into(),
            delay: None,
            failure: None,
        }
    }

    pub fn html(status: u16, body: &str) -> Self {
        Self::new(status, "text/html; charset=utf-8", body.as_bytes().to_vec())
    }

    pub fn xml(status: u16, body: &str) -> Self {
        Self::new(status, "application/xml", body.as_bytes().to_vec())
    }

    pub fn json(status: u16, body: &str) -> Self {
        Self::new(status, "application/json", body.as_bytes().to_vec())
    }

    /// A redirect to `location` with an empty body
    pub fn redirect(location: &str) -> Self {
        let mut response = Self::new(302, "text/html", Vec::new());
        response
            .headers
            .push(("Location".to_string(), location.to_string()));
        response
    }

    /// A transport-level failure instead of a response
    pub fn failure(failure: TransportError) -> Self {
        Self {
            status: 0,
            headers: vec![],
            body: vec![],
            delay: None,
            failure: Some(failure),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_set_cookie(self, value: &str) -> Self {
        self.with_header("Set-Cookie", value)
    }

    /// Sleep before answering, for timeout and concurrency tests
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct Route {
    fragment: String,
    responses: VecDeque<MockResponse>,
}

/// In-memory [`Transport`] answering from stubbed routes
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    log: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request whose URL contains `fragment` with `response`
    pub fn stub(&self, fragment: &str, response: MockResponse) {
        self.stub_sequence(fragment, vec![response]);
    }

    /// Answer requests matching `fragment` with `responses` in order; the
    /// final response repeats once the queue is drained. Re-stubbing a
    /// fragment replaces its queue.
    pub fn stub_sequence(&self, fragment: &str, responses: Vec<MockResponse>) {
        let mut routes = self.routes.lock();
        routes.retain(|r| r.fragment != fragment);
        routes.push(Route {
            fragment: fragment.to_string(),
            responses: responses.into(),
        });
    }

    /// Requests sent so far whose URL contains `fragment`
    pub fn request_count(&self, fragment: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|r| r.url.contains(fragment))
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.log.lock().len()
    }

    /// The most recent request whose URL contains `fragment`
    pub fn last_request(&self, fragment: &str) -> Option<HttpRequest> {
        self.log
            .lock()
            .iter()
            .rev()
            .find(|r| r.url.contains(fragment))
            .cloned()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse, TransportError> {
        self.log.lock().push(request.clone());

        // Pull the response while holding the lock, sleep after releasing it
        let mock = {
            let mut routes = self.routes.lock();
            let route = routes
                .iter_mut()
                .find(|r| request.url.contains(&r.fragment) && !r.responses.is_empty());
            match route {
                Some(route) => {
                    if route.responses.len() > 1 {
                        route.responses.pop_front().unwrap()
                    } else {
                        route.responses.front().cloned().unwrap()
                    }
                }
                None => {
                    return Err(TransportError::Connect(format!(
                        "no stub matches {}",
                        request.url
                    )));
                }
            }
        };

        if let Some(delay) = mock.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(failure) = mock.failure {
            return Err(failure);
        }

        Ok(RawResponse {
            status: mock.status,
            url: request.url.clone(),
            headers: mock.headers,
            body: mock.body,
        })
    }
}

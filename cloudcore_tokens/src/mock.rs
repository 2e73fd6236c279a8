//! A scripted transport and token helpers for tests

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::{
    error::TransportError,
    transport::{HttpResponse, HttpTransport, TokenRequest},
};

/// Builds an unsigned JWT carrying the given `iat` and `exp` claims
pub fn jwt_with(iat: u64, exp: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({ "iat": iat, "exp": exp, "sub": "test" }).to_string(),
    );
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// A scripted response
#[derive(Clone, Debug)]
pub struct MockResponse {
    outcome: Result<HttpResponse, String>,
    delay: Option<Duration>,
}

impl MockResponse {
    /// A response with the given status and JSON body
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self::raw(status, body.to_string())
    }

    /// A response with the given status and raw body
    pub fn raw(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            outcome: Ok(HttpResponse {
                status,
                headers: HeaderMap::new(),
                body: body.into(),
            }),
            delay: None,
        }
    }

    /// A `200 OK` carrying a fresh JWT in `field`
    pub fn token(field: &str, iat: u64, exp: u64) -> Self {
        Self::json(200, serde_json::json!({ field: jwt_with(iat, exp) }))
    }

    /// A failure to send the request at all
    pub fn send_error(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
            delay: None,
        }
    }

    /// Adds a response header
    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        if let Ok(resp) = &mut self.outcome {
            resp.headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        self
    }

    /// Holds the response back for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Default)]
struct Inner {
    script: Mutex<VecDeque<MockResponse>>,
    fallback: Mutex<Option<MockResponse>>,
    requests: Mutex<Vec<TokenRequest>>,
    calls: AtomicUsize,
}

/// An [`HttpTransport`] that replays scripted responses and records requests
///
/// Clones share the same script and recordings.
#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    /// Constructs a transport with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response to be returned once, in order
    pub fn push(&self, response: MockResponse) -> &Self {
        lock(&self.inner.script).push_back(response);
        self
    }

    /// Sets the response returned whenever the queue is empty
    pub fn always(&self, response: MockResponse) -> &Self {
        *lock(&self.inner.fallback) = Some(response);
        self
    }

    /// The number of requests received so far
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<TokenRequest> {
        lock(&self.inner.requests).clone()
    }

    /// The most recent request
    pub fn last_request(&self) -> Option<TokenRequest> {
        lock(&self.inner.requests).last().cloned()
    }

    /// Shares this transport as a trait object
    pub fn shared(&self) -> Arc<dyn HttpTransport> {
        Arc::new(self.clone())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: TokenRequest) -> Result<HttpResponse, TransportError> {
        lock(&self.inner.requests).push(request);
        self.inner.calls.fetch_add(1, Ordering::SeqCst);

        let next = lock(&self.inner.script)
            .pop_front()
            .or_else(|| lock(&self.inner.fallback).clone());

        let Some(response) = next else {
            return Err(TransportError::Send("no scripted response".into()));
        };

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }

        response.outcome.map_err(|m| TransportError::Send(m.into()))
    }
}

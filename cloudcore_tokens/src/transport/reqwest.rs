use std::{
    collections::HashMap,
    error::Error as StdError,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;

use super::{HttpResponse, HttpTransport, Proxies, TokenRequest};
use crate::error::TransportError;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ClientKey {
    proxies: Proxies,
    verify_tls: bool,
}

/// An [`HttpTransport`] backed by `reqwest`
///
/// Clients are built lazily and reused for every request that shares the same
/// proxy and certificate verification settings.
#[derive(Debug, Default)]
pub struct ReqwestTransport {
    clients: Mutex<HashMap<ClientKey, ::reqwest::Client>>,
}

impl ReqwestTransport {
    /// Constructs a new transport
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, key: ClientKey) -> Result<::reqwest::Client, TransportError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder =
            ::reqwest::Client::builder().danger_accept_invalid_certs(!key.verify_tls);

        if let Some(http) = &key.proxies.http {
            let proxy = ::reqwest::Proxy::http(http)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        if let Some(https) = &key.proxies.https {
            let proxy = ::reqwest::Proxy::https(https)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Send(e.into()))?;

        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[tracing::instrument(
        skip(self, request),
        fields(request.method = %request.method, request.url = %request.url),
    )]
    async fn execute(&self, request: TokenRequest) -> Result<HttpResponse, TransportError> {
        let client = self.client_for(ClientKey {
            proxies: request.proxies.clone(),
            verify_tls: request.verify_tls,
        })?;

        let body = request.body.to_bytes()?;

        let mut req = client
            .request(request.method, &request.url)
            .headers(request.headers)
            .timeout(request.timeout);

        if !request.query.is_empty() {
            req = req.query(&request.query);
        }

        if let Some(auth) = request.basic_auth {
            req = req.basic_auth(auth.username, Some(auth.password.as_str()));
        }

        if let Some(body) = body {
            req = req.body(body);
        }

        tracing::trace!("sending token request");

        let resp = req.send().await.map_err(classify_send_error)?;

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::BodyRead(e.into()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify_send_error(error: ::reqwest::Error) -> TransportError {
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(e) = source {
        if e.to_string().to_ascii_lowercase().contains("certificate") {
            return TransportError::Certificate(error.into());
        }
        source = e.source();
    }
    TransportError::Send(error.into())
}

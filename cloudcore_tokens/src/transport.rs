//! The HTTP collaborator used by token managers
//!
//! Token managers describe each call to a token service as a [`TokenRequest`]
//! and hand it to an [`HttpTransport`]. The transport owns connection
//! concerns (proxies, certificate verification, timeouts); the managers own
//! what is sent. Responses outside the `2xx` range become
//! [`ApiError`][crate::ApiError]s.

use std::{collections::BTreeMap, fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method};

use crate::{
    error::{ApiError, TransportError},
    validate, Error, Password, ValidationError,
};

#[cfg(feature = "reqwest")]
mod reqwest;

#[cfg(feature = "reqwest")]
pub use self::reqwest::ReqwestTransport;

/// The timeout applied to token requests unless configured otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Proxies used to reach a token service
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Proxies {
    /// The proxy endpoint to use for HTTP requests
    pub http: Option<String>,
    /// The proxy endpoint to use for HTTPS requests
    pub https: Option<String>,
}

impl Proxies {
    /// Whether any proxy is configured
    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none()
    }
}

/// Options that govern how a token manager reaches its token service
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Headers sent with every token request
    pub headers: BTreeMap<String, String>,
    /// Proxies for token requests
    pub proxies: Proxies,
    /// Skips verification of the token service's certificate
    pub disable_ssl_verification: bool,
    /// Timeout for each token request, [`DEFAULT_TIMEOUT`] if unset
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Adds a header to be sent with every token request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the proxies used for token requests
    pub fn with_proxies(mut self, proxies: Proxies) -> Self {
        self.proxies = proxies;
        self
    }

    /// Enables or disables verification of the token service's certificate
    pub fn with_disable_ssl_verification(mut self, disable: bool) -> Self {
        self.disable_ssl_verification = disable;
        self
    }

    /// Sets the timeout for each token request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Checks that every configured header is a valid HTTP header
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ValidationError::new(format!("invalid header name: {name}")))?;
            HeaderValue::from_str(value)
                .map_err(|_| ValidationError::new(format!("invalid value for header {name}")))?;
        }
        for proxy in [&self.proxies.http, &self.proxies.https].into_iter().flatten() {
            validate::not_placeholder("proxy", proxy)?;
        }
        Ok(())
    }
}

/// HTTP basic credentials attached to a token request
#[derive(Clone, Debug)]
pub struct BasicAuth {
    /// The user name
    pub username: String,
    /// The password
    pub password: Password,
}

/// The body of a token request
#[derive(Clone, Default)]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded` fields, in order
    Form(Vec<(String, String)>),
    /// A JSON document
    Json(serde_json::Value),
}

impl RequestBody {
    /// Encodes the body, or `None` if there is nothing to send
    pub fn to_bytes(&self) -> Result<Option<Bytes>, TransportError> {
        match self {
            Self::Empty => Ok(None),
            Self::Form(fields) => Ok(Some(Bytes::from(encode_form(fields)))),
            Self::Json(value) => serde_json::to_vec(value)
                .map(|v| Some(Bytes::from(v)))
                .map_err(|e| TransportError::InvalidRequest(e.to_string())),
        }
    }

    /// Looks up a form field by name
    pub fn form_field(&self, name: &str) -> Option<&str> {
        match self {
            Self::Form(fields) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// The JSON document, if this is a JSON body
    pub fn json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Encodes fields as `application/x-www-form-urlencoded`, spaces as `+`
fn encode_form(fields: &[(String, String)]) -> String {
    fn component(s: &str) -> String {
        urlencoding::encode(s).replace("%20", "+")
    }

    fields
        .iter()
        .map(|(k, v)| format!("{}={}", component(k), component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bodies carry credentials; only their shape is shown.
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Form(fields) => f
                .debug_tuple("Form")
                .field(&fields.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>())
                .finish(),
            Self::Json(_) => f.write_str("Json(…)"),
        }
    }
}

/// A fully described request to a token service
#[derive(Clone, Debug)]
pub struct TokenRequest {
    /// The HTTP method
    pub method: Method,
    /// The absolute URL, without query parameters
    pub url: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Query parameters, in order
    pub query: Vec<(String, String)>,
    /// The request body
    pub body: RequestBody,
    /// HTTP basic credentials, if any
    pub basic_auth: Option<BasicAuth>,
    /// Proxies to route the request through
    pub proxies: Proxies,
    /// Whether the server's certificate must be verified
    pub verify_tls: bool,
    /// The bound on the request's duration
    pub timeout: Duration,
}

impl TokenRequest {
    /// Starts building a request, applying the manager's request options
    ///
    /// User-supplied headers from `options` are applied first, so later calls to
    /// [`default_header()`][TokenRequestBuilder::default_header] keep them and calls
    /// to [`header()`][TokenRequestBuilder::header] replace them.
    pub fn builder(
        method: Method,
        url: impl Into<String>,
        options: &RequestOptions,
    ) -> TokenRequestBuilder {
        let mut headers = HeaderMap::new();
        let mut error = None;
        for (name, value) in &options.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.insert(n, v);
                }
                _ => {
                    error = Some(TransportError::InvalidRequest(format!(
                        "invalid header {name}"
                    )));
                }
            }
        }

        let request = TokenRequest {
            method,
            url: url.into(),
            headers,
            query: Vec::new(),
            body: RequestBody::Empty,
            basic_auth: None,
            proxies: options.proxies.clone(),
            verify_tls: !options.disable_ssl_verification,
            timeout: options.timeout.unwrap_or(DEFAULT_TIMEOUT),
        };

        TokenRequestBuilder {
            request: match error {
                Some(e) => Err(e),
                None => Ok(request),
            },
        }
    }

    /// Gets a header value as a string
    pub fn header_str(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A builder for [`TokenRequest`]s
///
/// Errors are deferred until [`build()`][Self::build].
#[derive(Debug)]
#[must_use]
pub struct TokenRequestBuilder {
    request: Result<TokenRequest, TransportError>,
}

impl TokenRequestBuilder {
    fn with(mut self, f: impl FnOnce(&mut TokenRequest) -> Result<(), TransportError>) -> Self {
        if let Ok(req) = &mut self.request {
            if let Err(e) = f(req) {
                self.request = Err(e);
            }
        }
        self
    }

    /// Sets a header, replacing any user-supplied value
    pub fn header(self, name: HeaderName, value: &str) -> Self {
        self.with(|req| {
            let mut value = HeaderValue::from_str(value).map_err(|_| {
                TransportError::InvalidRequest(format!("invalid value for header {name}"))
            })?;
            if name == header::AUTHORIZATION {
                value.set_sensitive(true);
            }
            req.headers.insert(name, value);
            Ok(())
        })
    }

    /// Sets a header unless the user already supplied one
    pub fn default_header(self, name: HeaderName, value: &str) -> Self {
        self.with(|req| {
            if !req.headers.contains_key(&name) {
                let value = HeaderValue::from_str(value).map_err(|_| {
                    TransportError::InvalidRequest(format!("invalid value for header {name}"))
                })?;
                req.headers.insert(name, value);
            }
            Ok(())
        })
    }

    /// Appends a query parameter
    pub fn query(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let (name, value) = (name.into(), value.into());
        self.with(move |req| {
            req.query.push((name, value));
            Ok(())
        })
    }

    /// Sets a form-encoded body
    pub fn form(self, fields: Vec<(String, String)>) -> Self {
        self.with(move |req| {
            req.body = RequestBody::Form(fields);
            Ok(())
        })
    }

    /// Sets a JSON body
    pub fn json(self, value: serde_json::Value) -> Self {
        self.with(move |req| {
            req.body = RequestBody::Json(value);
            Ok(())
        })
    }

    /// Attaches HTTP basic credentials
    pub fn basic_auth(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        let username = username.into();
        let password = Password::new(password.into());
        self.with(move |req| {
            req.basic_auth = Some(BasicAuth { username, password });
            Ok(())
        })
    }

    /// Finishes the request
    pub fn build(self) -> Result<TokenRequest, TransportError> {
        self.request
    }
}

/// A response from a token service
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// The HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// The raw body
    pub body: Bytes,
}

/// Something that can carry a [`TokenRequest`] to a token service
#[async_trait]
pub trait HttpTransport: Send + Sync + fmt::Debug {
    /// Performs the request, returning the response whatever its status
    async fn execute(&self, request: TokenRequest) -> Result<HttpResponse, TransportError>;
}

/// Performs `request`, failing with an [`ApiError`] on a non-2xx status
pub async fn send(transport: &dyn HttpTransport, request: TokenRequest) -> Result<HttpResponse, Error> {
    tracing::debug!(
        request.method = %request.method,
        request.url = %request.url,
        "invoking token service operation"
    );

    let response = transport.execute(request).await?;

    tracing::debug!(
        response.status = response.status,
        "received response from token service"
    );

    if (200..=299).contains(&response.status) {
        Ok(response)
    } else {
        let transaction_id = response
            .headers
            .get("X-Global-Transaction-ID")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        Err(ApiError::from_response(response.status, response.body, transaction_id).into())
    }
}

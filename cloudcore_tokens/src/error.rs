//! Errors raised while configuring token managers or obtaining tokens

use std::{borrow::Cow, error::Error as StdError, fmt, io, path::PathBuf};

use bytes::Bytes;
use thiserror::Error;

/// A boxed error from the HTTP collaborator
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Any error that can occur while configuring a token manager or obtaining a token
#[derive(Debug, Error)]
pub enum Error {
    /// The manager or authenticator was configured incorrectly
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The token service answered with a non-2xx status
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The request never produced a response
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The compute resource token could not be read from the local filesystem
    #[error("unable to retrieve the CR token value from file {}", path.display())]
    CrToken {
        /// The file that was read last
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A successful response body was not valid JSON
    #[error("error deserializing token body from the token service")]
    TokenBody(#[from] serde_json::Error),

    /// A successful response body did not carry the expected token field
    #[error("token service response did not contain a `{field}` string")]
    MissingToken {
        /// The name of the response field holding the token
        field: &'static str,
    },

    /// A configuration value could not be interpreted
    #[error("invalid value for configuration property {key}: {message}")]
    Config {
        /// The configuration property
        key: String,
        /// What was wrong with it
        message: String,
    },
}

impl Error {
    /// Returns the HTTP status code if this error came from the token service
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api(e) => Some(e.status),
            _ => None,
        }
    }
}

/// A construction-time validation failure
///
/// These are always raised before any network activity and are never retried.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: Cow<'static, str>,
}

impl ValidationError {
    /// Constructs a new validation error with the given message
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The human-readable description of the failure
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An error response from a token service
#[derive(Clone, Debug, Error)]
pub struct ApiError {
    /// The HTTP status code
    pub status: u16,
    /// A best-effort, human-readable message extracted from the body
    pub message: String,
    /// The raw response body
    pub body: Bytes,
    /// The `X-Global-Transaction-ID` header, if present
    pub transaction_id: Option<String>,
}

impl ApiError {
    /// Builds an error from a response status, body and transaction id
    pub fn from_response(status: u16, body: Bytes, transaction_id: Option<String>) -> Self {
        let message = error_message(&body);
        Self {
            status,
            message,
            body,
            transaction_id,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}, Status code: {}", self.message, self.status)?;
        if let Some(id) = &self.transaction_id {
            write!(f, " , X-global-transaction-id: {}", id)?;
        }
        Ok(())
    }
}

/// Extracts a readable message from an error body
///
/// Looks for `errors[0].message`, `error`, `message`, then `errorMessage`. Falls
/// back to the raw text, and finally to "Unknown error".
fn error_message(body: &[u8]) -> String {
    const UNKNOWN: &str = "Unknown error";

    let json: serde_json::Value = match serde_json::from_slice(body) {
        Ok(json) => json,
        Err(_) => {
            let text = String::from_utf8_lossy(body);
            let text = text.trim();
            return if text.is_empty() {
                UNKNOWN.to_owned()
            } else {
                text.to_owned()
            };
        }
    };

    let candidates = [
        json.pointer("/errors/0/message"),
        json.get("error"),
        json.get("message"),
        json.get("errorMessage"),
    ];

    let message = candidates
        .into_iter()
        .flatten()
        .find_map(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        });
    message.unwrap_or_else(|| UNKNOWN.to_owned())
}

/// A failure in the HTTP collaborator before a response was received
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server's certificate could not be verified
    #[error(
        "SSL certificate verification failed: if you are connecting to a server that uses a \
         self-signed certificate, disable SSL verification via `disable_ssl_verification`"
    )]
    Certificate(#[source] BoxError),

    /// The request could not be sent
    #[error("error sending request to token service")]
    Send(#[source] BoxError),

    /// The response body could not be read
    #[error("error reading response body")]
    BodyRead(#[source] BoxError),

    /// The request could not be built
    #[error("invalid token request: {0}")]
    InvalidRequest(String),
}

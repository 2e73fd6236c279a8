//! Bearer tokens supplied by the caller

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use cloudcore_tokens::{validate, AccessToken, AccessTokenRef, Error, ValidationError};
use http::{header::AUTHORIZATION, HeaderMap, HeaderValue};

use crate::{AuthType, Authenticator};

const BEARER_TOKEN: &str = "bearer token";

/// Builds a sensitive `Bearer` authorization value
///
/// Returns `None` if the token contains bytes that are not allowed in a header.
pub(crate) fn bearer_header(token: &str) -> Option<HeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_bytes());
    let mut value = HeaderValue::from_maybe_shared(header_value.freeze()).ok()?;
    value.set_sensitive(true);
    Some(value)
}

/// Sends a caller-managed bearer token with every request
///
/// The token is never refreshed. Replace it with
/// [`set_bearer_token()`][Self::set_bearer_token()] before it expires.
#[derive(Clone, Debug)]
pub struct BearerTokenAuthenticator {
    token: AccessToken,
    header: HeaderValue,
}

impl BearerTokenAuthenticator {
    /// Validates the token and constructs the authenticator
    pub fn new(token: impl Into<String>) -> Result<Self, ValidationError> {
        let token = token.into();
        let header = Self::header_for(&token)?;
        Ok(Self {
            token: AccessToken::new(token),
            header,
        })
    }

    pub(crate) fn from_parts(token: Option<&str>) -> Result<Self, ValidationError> {
        Self::new(validate::required(BEARER_TOKEN, token)?)
    }

    /// The current token
    pub fn bearer_token(&self) -> &AccessTokenRef {
        &self.token
    }

    /// Replaces the token sent with subsequent requests
    pub fn set_bearer_token(&mut self, token: impl Into<String>) -> Result<(), ValidationError> {
        *self = Self::new(token)?;
        Ok(())
    }

    fn header_for(token: &str) -> Result<HeaderValue, ValidationError> {
        validate::not_placeholder(BEARER_TOKEN, token)?;
        bearer_header(token).ok_or_else(|| {
            ValidationError::new("The bearer token contains characters not allowed in a header.")
        })
    }
}

#[async_trait]
impl Authenticator for BearerTokenAuthenticator {
    fn authentication_type(&self) -> AuthType {
        AuthType::BearerToken
    }

    async fn authenticate(&self, headers: &mut HeaderMap) -> Result<(), Error> {
        headers.insert(AUTHORIZATION, self.header.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sets_the_bearer_authorization_header() {
        let auth = BearerTokenAuthenticator::new("my-token").unwrap();
        let mut headers = HeaderMap::new();

        auth.authenticate(&mut headers).await.unwrap();

        assert_eq!(headers[AUTHORIZATION], "Bearer my-token");
        assert!(headers[AUTHORIZATION].is_sensitive());
    }

    #[tokio::test]
    async fn replaced_tokens_are_used_for_later_requests() {
        let mut auth = BearerTokenAuthenticator::new("first").unwrap();
        auth.set_bearer_token("second").unwrap();
        let mut headers = HeaderMap::new();

        auth.authenticate(&mut headers).await.unwrap();

        assert_eq!(headers[AUTHORIZATION], "Bearer second");
        assert_eq!(auth.bearer_token().as_str(), "second");
    }

    #[test]
    fn missing_tokens_are_rejected() {
        let err = BearerTokenAuthenticator::from_parts(None).unwrap_err();
        assert_eq!(err.message(), "The bearer token shouldn't be None.");
    }

    #[test]
    fn placeholder_tokens_are_rejected() {
        assert!(BearerTokenAuthenticator::new("\"token\"").is_err());
    }

    #[test]
    fn tokens_with_line_breaks_are_rejected() {
        assert!(BearerTokenAuthenticator::new("abc\r\ndef").is_err());
    }

    #[test]
    fn failed_replacement_keeps_the_old_token() {
        let mut auth = BearerTokenAuthenticator::new("first").unwrap();
        assert!(auth.set_bearer_token("{token}").is_err());
        assert_eq!(auth.bearer_token().as_str(), "first");
    }
}

//! HTTP basic authentication

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use cloudcore_tokens::{validate, Error, Password, ValidationError};
use http::{header::AUTHORIZATION, HeaderMap, HeaderValue};

use crate::{AuthType, Authenticator};

const CREDENTIALS: &str = "username and password";

/// Sends a username and password with every request
///
/// The `Authorization` header is computed once, at construction.
#[derive(Clone, Debug)]
pub struct BasicAuthenticator {
    username: String,
    password: Password,
    header: HeaderValue,
}

impl BasicAuthenticator {
    /// Validates the credentials and constructs the authenticator
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let username = username.into();
        let password = password.into();
        validate::not_placeholder(CREDENTIALS, &username)?;
        validate::not_placeholder(CREDENTIALS, &password)?;

        let encoded = STANDARD.encode(format!("{username}:{password}"));
        let mut header = HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(|_| ValidationError::new("invalid basic authorization header"))?;
        header.set_sensitive(true);

        Ok(Self {
            username,
            password: Password::new(password),
            header,
        })
    }

    pub(crate) fn from_parts(
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, ValidationError> {
        match (username, password) {
            (Some(username), Some(password)) => Self::new(username, password),
            _ => Err(ValidationError::new(format!(
                "The {CREDENTIALS} shouldn't be None."
            ))),
        }
    }

    /// The username
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password
    pub fn password(&self) -> &Password {
        &self.password
    }
}

#[async_trait]
impl Authenticator for BasicAuthenticator {
    fn authentication_type(&self) -> AuthType {
        AuthType::Basic
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
    async fn sets_the_basic_authorization_header() {
        let auth = BasicAuthenticator::new("user", "pass").unwrap();
        let mut headers = HeaderMap::new();

        auth.authenticate(&mut headers).await.unwrap();

        assert_eq!(headers[AUTHORIZATION], "Basic dXNlcjpwYXNz");
        assert!(headers[AUTHORIZATION].is_sensitive());
        assert_eq!(auth.authentication_type(), AuthType::Basic);
    }

    #[tokio::test]
    async fn leaves_other_headers_alone() {
        let auth = BasicAuthenticator::new("user", "pass").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer old"));

        auth.authenticate(&mut headers).await.unwrap();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers["x-request-id"], "abc");
        assert_eq!(headers[AUTHORIZATION], "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let err = BasicAuthenticator::from_parts(Some("user"), None).unwrap_err();
        assert_eq!(err.message(), "The username and password shouldn't be None.");
    }

    #[test]
    fn placeholder_credentials_are_rejected() {
        let err = BasicAuthenticator::new("{username}", "pass").unwrap_err();
        assert_eq!(
            err.message(),
            "The username and password shouldn't start or end with curly brackets or quotes. \
             Please remove any surrounding {, }, or \" characters."
        );
    }

    #[test]
    fn password_is_hidden_from_debug_output() {
        let auth = BasicAuthenticator::new("user", "hunter2").unwrap();
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }
}

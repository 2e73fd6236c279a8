//! Tokens from Cloud Pak for Data

use async_trait::async_trait;
use http::{header, Method};

use super::{join_url, json_request, user_agent};
use crate::{
    manager::{ManagerOptions, TokenManager, TokenSource},
    tokens::TokenResponse,
    transport::{self, HttpTransport, RequestOptions, TokenRequest},
    validate, ApiKey, ApiKeyRef, Error, Password, PasswordRef, ValidationError,
};

const VALIDATE_AUTH_PATH: &str = "/v1/preauth/validateAuth";
const AUTHORIZE_PATH: &str = "/v1/authorize";

/// Configuration for a [`Cp4dTokenManager`]
#[derive(Clone, Debug, Default)]
pub struct Cp4dConfig {
    /// The user to authenticate as
    pub username: Option<String>,
    /// The user's password, mutually exclusive with `apikey`
    pub password: Option<Password>,
    /// The user's API key, mutually exclusive with `password`
    pub apikey: Option<ApiKey>,
    /// The base URL of the Cloud Pak for Data deployment
    pub url: Option<String>,
    /// How the deployment is reached
    pub options: RequestOptions,
}

impl Cp4dConfig {
    /// Configuration for authenticating with a password
    pub fn with_password(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(Password::new(password.into())),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Configuration for authenticating with an API key
    pub fn with_apikey(
        url: impl Into<String>,
        username: impl Into<String>,
        apikey: impl Into<String>,
    ) -> Self {
        Self {
            username: Some(username.into()),
            apikey: Some(ApiKey::new(apikey.into())),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Sets the request options
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug)]
enum Credential {
    Password(Password),
    ApiKey(ApiKey),
}

/// Obtains tokens from a Cloud Pak for Data deployment
#[derive(Debug)]
pub struct Cp4dTokenSource {
    username: String,
    credential: Credential,
    url: String,
    options: RequestOptions,
}

impl Cp4dTokenSource {
    /// Validates `config` and constructs the source
    pub fn new(config: Cp4dConfig) -> Result<Self, ValidationError> {
        let username = validate::required("username", config.username.as_deref())?.to_owned();

        let password = config.password.as_deref().map(PasswordRef::as_str);
        let apikey = config.apikey.as_deref().map(ApiKeyRef::as_str);
        let credential = match (password, apikey) {
            (Some(p), None) => {
                validate::not_placeholder("password", p)?;
                Credential::Password(Password::new(p.to_owned()))
            }
            (None, Some(k)) => {
                validate::not_placeholder("apikey", k)?;
                Credential::ApiKey(ApiKey::new(k.to_owned()))
            }
            _ => {
                return Err(ValidationError::new(
                    "Exactly one of `apikey` or `password` must be specified.",
                ))
            }
        };

        let base = validate::required("url", config.url.as_deref())?;
        config.options.validate()?;

        let url = match credential {
            Credential::Password(_) if base.contains(VALIDATE_AUTH_PATH) => base.to_owned(),
            Credential::Password(_) => join_url(base, VALIDATE_AUTH_PATH),
            Credential::ApiKey(_) => join_url(base, AUTHORIZE_PATH),
        };

        Ok(Self {
            username,
            credential,
            url,
            options: config.options,
        })
    }
}

#[async_trait]
impl TokenSource for Cp4dTokenSource {
    fn name(&self) -> &'static str {
        "cp4d"
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.url, username = %self.username))]
    async fn request_token(&self, transport: &dyn HttpTransport) -> Result<TokenResponse, Error> {
        let (request, field) = match &self.credential {
            Credential::Password(password) => (
                TokenRequest::builder(Method::GET, &self.url, &self.options)
                    .default_header(header::USER_AGENT, &user_agent("cp4d-authenticator"))
                    .basic_auth(&self.username, password.as_str()),
                "accessToken",
            ),
            Credential::ApiKey(apikey) => (
                json_request(Method::POST, &self.url, &self.options, "cp4d-authenticator").json(
                    serde_json::json!({
                        "username": self.username,
                        "api_key": apikey.as_str(),
                    }),
                ),
                "token",
            ),
        };

        let response = transport::send(transport, request.build()?).await?;
        TokenResponse::from_json(&response.body, field)
    }
}

/// A token manager for Cloud Pak for Data
pub type Cp4dTokenManager = TokenManager<Cp4dTokenSource>;

impl TokenManager<Cp4dTokenSource> {
    /// Validates `config` and constructs a manager using the default transport
    #[cfg(feature = "reqwest")]
    pub fn new(config: Cp4dConfig) -> Result<Self, ValidationError> {
        Self::new_with_options(config, ManagerOptions::default())
    }

    /// Validates `config` and constructs a manager with the given collaborators
    pub fn new_with_options(
        config: Cp4dConfig,
        options: ManagerOptions,
    ) -> Result<Self, ValidationError> {
        Ok(Self::with_options(Cp4dTokenSource::new(config)?, options))
    }
}

#[cfg(test)]
mod tests {
    use cloudcore_clock::{ManualClock, UnixTime};

    use super::*;
    use crate::mock::{MockResponse, MockTransport};

    fn manager(config: Cp4dConfig, mock: &MockTransport) -> Cp4dTokenManager {
        let options =
            ManagerOptions::new(mock.shared()).with_clock(ManualClock::new(UnixTime(1_000)));
        Cp4dTokenManager::new_with_options(config, options).unwrap()
    }

    mod when_validating {
        use super::*;

        #[test]
        fn password_and_apikey_are_exclusive() {
            let config = Cp4dConfig {
                apikey: Some(ApiKey::from_static("key")),
                ..Cp4dConfig::with_password("https://h", "u", "p")
            };
            let err = Cp4dTokenSource::new(config).unwrap_err();
            assert_eq!(
                err.message(),
                "Exactly one of `apikey` or `password` must be specified."
            );
        }

        #[test]
        fn username_is_required() {
            let config = Cp4dConfig {
                username: None,
                ..Cp4dConfig::with_password("https://h", "u", "p")
            };
            let err = Cp4dTokenSource::new(config).unwrap_err();
            assert_eq!(err.message(), "The username shouldn't be None.");
        }
    }

    mod when_requesting {
        use super::*;

        #[tokio::test]
        async fn passwords_use_basic_auth_against_validate_auth() {
            let mock = MockTransport::new();
            mock.push(MockResponse::token("accessToken", 1_000, 4_600));
            let manager = manager(Cp4dConfig::with_password("https://h", "u", "p"), &mock);

            manager.get_token().await.unwrap();

            let req = mock.last_request().unwrap();
            assert_eq!(req.method, Method::GET);
            assert_eq!(req.url, "https://h/v1/preauth/validateAuth");
            let auth = req.basic_auth.unwrap();
            assert_eq!(auth.username, "u");
            assert_eq!(auth.password.as_str(), "p");
        }

        #[tokio::test]
        async fn full_validate_auth_urls_are_kept() {
            let mock = MockTransport::new();
            mock.push(MockResponse::token("accessToken", 1_000, 4_600));
            let manager = manager(
                Cp4dConfig::with_password("https://h/v1/preauth/validateAuth", "u", "p"),
                &mock,
            );

            manager.get_token().await.unwrap();

            assert_eq!(
                mock.last_request().unwrap().url,
                "https://h/v1/preauth/validateAuth"
            );
        }

        #[tokio::test]
        async fn apikeys_are_posted_to_authorize() {
            let mock = MockTransport::new();
            mock.push(MockResponse::token("token", 1_000, 4_600));
            let manager = manager(Cp4dConfig::with_apikey("https://h/", "u", "k"), &mock);

            manager.get_token().await.unwrap();

            let req = mock.last_request().unwrap();
            assert_eq!(req.method, Method::POST);
            assert_eq!(req.url, "https://h/v1/authorize");
            assert!(req.basic_auth.is_none());
            assert_eq!(
                req.body.json(),
                Some(&serde_json::json!({ "username": "u", "api_key": "k" }))
            );
        }
    }
}

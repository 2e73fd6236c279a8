//! Tokens from the Multi-Cloud SaaS Platform user management service

use async_trait::async_trait;
use http::Method;

use super::{join_url, json_request};
use crate::{
    manager::{ManagerOptions, TokenManager, TokenSource},
    tokens::TokenResponse,
    transport::{self, HttpTransport, RequestOptions},
    validate, ApiKey, ApiKeyRef, Error, ValidationError,
};

const OPERATION_PATH: &str = "/siusermgr/api/1.0/apikeys/token";
const TOKEN_FIELD: &str = "token";

/// Configuration for an [`McspTokenManager`]
#[derive(Clone, Debug, Default)]
pub struct McspConfig {
    /// The API key exchanged for tokens
    pub apikey: Option<ApiKey>,
    /// The base URL of the token service
    pub url: Option<String>,
    /// How the token service is reached
    pub options: RequestOptions,
}

impl McspConfig {
    /// Configuration for exchanging `apikey` at `url`
    pub fn new(apikey: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            apikey: Some(ApiKey::new(apikey.into())),
            url: Some(url.into()),
            options: RequestOptions::default(),
        }
    }

    /// Sets the request options
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

/// Exchanges an API key for an MCSP token
#[derive(Debug)]
pub struct McspTokenSource {
    apikey: ApiKey,
    url: String,
    options: RequestOptions,
}

impl McspTokenSource {
    /// Validates `config` and constructs the source
    pub fn new(config: McspConfig) -> Result<Self, ValidationError> {
        let apikey = validate::required("apikey", config.apikey.as_deref().map(ApiKeyRef::as_str))?;
        let url = validate::required("url", config.url.as_deref())?;
        config.options.validate()?;

        Ok(Self {
            apikey: ApiKey::new(apikey.to_owned()),
            url: join_url(url, OPERATION_PATH),
            options: config.options,
        })
    }
}

#[async_trait]
impl TokenSource for McspTokenSource {
    fn name(&self) -> &'static str {
        "mcsp"
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.url))]
    async fn request_token(&self, transport: &dyn HttpTransport) -> Result<TokenResponse, Error> {
        let request = json_request(Method::POST, &self.url, &self.options, "mcsp-authenticator")
            .json(serde_json::json!({ "apikey": self.apikey.as_str() }))
            .build()?;

        let response = transport::send(transport, request).await?;
        TokenResponse::from_json(&response.body, TOKEN_FIELD)
    }
}

/// A token manager for MCSP API key exchanges
pub type McspTokenManager = TokenManager<McspTokenSource>;

impl TokenManager<McspTokenSource> {
    /// Validates `config` and constructs a manager using the default transport
    #[cfg(feature = "reqwest")]
    pub fn new(config: McspConfig) -> Result<Self, ValidationError> {
        Self::new_with_options(config, ManagerOptions::default())
    }

    /// Validates `config` and constructs a manager with the given collaborators
    pub fn new_with_options(
        config: McspConfig,
        options: ManagerOptions,
    ) -> Result<Self, ValidationError> {
        Ok(Self::with_options(McspTokenSource::new(config)?, options))
    }
}

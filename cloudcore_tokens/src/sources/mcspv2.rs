//! Tokens from version 2 of the Multi-Cloud SaaS Platform token service
//!
//! Tokens are scoped to a collection (`scope_collection_type`/`scope_id`) and
//! may carry caller-supplied extension claims.

use std::collections::BTreeMap;

use async_trait::async_trait;
use http::{header, Method};

use super::{join_url, user_agent};
use crate::{
    manager::{ManagerOptions, TokenManager, TokenSource},
    tokens::TokenResponse,
    transport::{self, HttpTransport, RequestOptions, TokenRequest},
    validate, ApiKey, ApiKeyRef, Error, ValidationError,
};

const TOKEN_FIELD: &str = "token";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Configuration for an [`McspV2TokenManager`]
#[derive(Clone, Debug)]
pub struct McspV2Config {
    /// The API key exchanged for tokens
    pub apikey: Option<ApiKey>,
    /// The base URL of the token service
    pub url: Option<String>,
    /// The type of the collection that scopes the token, such as `accounts`
    pub scope_collection_type: Option<String>,
    /// The ID of the collection that scopes the token
    pub scope_id: Option<String>,
    /// Whether built-in actions are included in the token
    pub include_builtin_actions: bool,
    /// Whether custom actions are included in the token
    pub include_custom_actions: bool,
    /// Whether roles are included in the token
    pub include_roles: bool,
    /// Whether role names are prefixed with their definition scope
    pub prefix_roles: bool,
    /// Extension claims to embed in the token
    pub caller_ext_claim: Option<BTreeMap<String, String>>,
    /// How the token service is reached
    pub options: RequestOptions,
}

impl Default for McspV2Config {
    fn default() -> Self {
        Self {
            apikey: None,
            url: None,
            scope_collection_type: None,
            scope_id: None,
            include_builtin_actions: false,
            include_custom_actions: false,
            include_roles: true,
            prefix_roles: false,
            caller_ext_claim: None,
            options: RequestOptions::default(),
        }
    }
}

impl McspV2Config {
    /// Configuration for exchanging `apikey` at `url` for a token scoped to a collection
    pub fn new(
        apikey: impl Into<String>,
        url: impl Into<String>,
        scope_collection_type: impl Into<String>,
        scope_id: impl Into<String>,
    ) -> Self {
        Self {
            apikey: Some(ApiKey::new(apikey.into())),
            url: Some(url.into()),
            scope_collection_type: Some(scope_collection_type.into()),
            scope_id: Some(scope_id.into()),
            ..Self::default()
        }
    }

    /// Sets whether built-in actions are included
    pub fn with_include_builtin_actions(mut self, include: bool) -> Self {
        self.include_builtin_actions = include;
        self
    }

    /// Sets whether custom actions are included
    pub fn with_include_custom_actions(mut self, include: bool) -> Self {
        self.include_custom_actions = include;
        self
    }

    /// Sets whether roles are included
    pub fn with_include_roles(mut self, include: bool) -> Self {
        self.include_roles = include;
        self
    }

    /// Sets whether role names are prefixed with their definition scope
    pub fn with_prefix_roles(mut self, prefix: bool) -> Self {
        self.prefix_roles = prefix;
        self
    }

    /// Sets the extension claims
    pub fn with_caller_ext_claim(mut self, claims: BTreeMap<String, String>) -> Self {
        self.caller_ext_claim = Some(claims);
        self
    }

    /// Sets the request options
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

/// Exchanges an API key for a scoped MCSP token
#[derive(Debug)]
pub struct McspV2TokenSource {
    apikey: ApiKey,
    url: String,
    query: [(&'static str, bool); 4],
    caller_ext_claim: Option<BTreeMap<String, String>>,
    options: RequestOptions,
}

impl McspV2TokenSource {
    /// Validates `config` and constructs the source
    pub fn new(config: McspV2Config) -> Result<Self, ValidationError> {
        let apikey = validate::required("apikey", config.apikey.as_deref().map(ApiKeyRef::as_str))?;
        let url = validate::required("url", config.url.as_deref())?;
        let collection_type = validate::required(
            "scope_collection_type",
            config.scope_collection_type.as_deref(),
        )?;
        let scope_id = validate::required("scope_id", config.scope_id.as_deref())?;
        config.options.validate()?;

        let url = join_url(
            url,
            &format!(
                "/api/2.0/{}/{}/apikeys/token",
                urlencoding::encode(collection_type),
                urlencoding::encode(scope_id),
            ),
        );

        Ok(Self {
            apikey: ApiKey::new(apikey.to_owned()),
            url,
            query: [
                ("includeBuiltinActions", config.include_builtin_actions),
                ("includeCustomActions", config.include_custom_actions),
                ("includeRoles", config.include_roles),
                ("prefixRolesWithDefinitionScope", config.prefix_roles),
            ],
            caller_ext_claim: config.caller_ext_claim,
            options: config.options,
        })
    }
}

#[async_trait]
impl TokenSource for McspV2TokenSource {
    fn name(&self) -> &'static str {
        "mcspv2"
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.url))]
    async fn request_token(&self, transport: &dyn HttpTransport) -> Result<TokenResponse, Error> {
        let mut body = serde_json::Map::new();
        body.insert("apikey".to_owned(), self.apikey.as_str().into());
        if let Some(claims) = &self.caller_ext_claim {
            let claims = claims
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::from(v.as_str())))
                .collect::<serde_json::Map<_, _>>();
            body.insert("callerExtClaim".to_owned(), claims.into());
        }

        // Required headers take priority over user-supplied ones.
        let mut request = TokenRequest::builder(Method::POST, &self.url, &self.options)
            .header(header::USER_AGENT, &user_agent("mcspv2-authenticator"))
            .header(header::CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(header::ACCEPT, JSON_CONTENT_TYPE)
            .json(body.into());
        for (name, value) in self.query {
            request = request.query(name, value.to_string());
        }

        let response = transport::send(transport, request.build()?).await?;
        TokenResponse::from_json(&response.body, TOKEN_FIELD)
    }
}

/// A token manager for scoped MCSP API key exchanges
pub type McspV2TokenManager = TokenManager<McspV2TokenSource>;

impl TokenManager<McspV2TokenSource> {
    /// Validates `config` and constructs a manager using the default transport
    #[cfg(feature = "reqwest")]
    pub fn new(config: McspV2Config) -> Result<Self, ValidationError> {
        Self::new_with_options(config, ManagerOptions::default())
    }

    /// Validates `config` and constructs a manager with the given collaborators
    pub fn new_with_options(
        config: McspV2Config,
        options: ManagerOptions,
    ) -> Result<Self, ValidationError> {
        Ok(Self::with_options(McspV2TokenSource::new(config)?, options))
    }
}

//! IAM tokens obtained with an API key

use async_trait::async_trait;

use super::{form_field, iam_form_request, iam_token_url};
use crate::{
    manager::{ManagerOptions, TokenManager, TokenSource},
    tokens::TokenResponse,
    transport::{self, HttpTransport, RequestOptions},
    validate, ApiKey, ApiKeyRef, ClientId, ClientSecret, Error, ValidationError,
};

const GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";
const RESPONSE_TYPE: &str = "cloud_iam";
const TOKEN_FIELD: &str = "access_token";

/// Configuration for an [`IamTokenManager`]
#[derive(Clone, Debug, Default)]
pub struct IamConfig {
    /// The API key exchanged for tokens
    pub apikey: Option<ApiKey>,
    /// The IAM base URL or token endpoint
    pub url: Option<String>,
    /// The client ID for HTTP basic authentication against IAM
    pub client_id: Option<ClientId>,
    /// The client secret for HTTP basic authentication against IAM
    pub client_secret: Option<ClientSecret>,
    /// The scope of the requested token
    pub scope: Option<String>,
    /// How IAM is reached
    pub options: RequestOptions,
}

impl IamConfig {
    /// Configuration for exchanging `apikey`
    pub fn new(apikey: impl Into<String>) -> Self {
        Self {
            apikey: Some(ApiKey::new(apikey.into())),
            ..Self::default()
        }
    }

    /// Sets the IAM base URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the client credentials used to authenticate with IAM
    pub fn with_client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(ClientId::new(client_id.into()));
        self.client_secret = Some(ClientSecret::new(client_secret.into()));
        self
    }

    /// Sets the scope of the requested token
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the request options
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

/// Validates a client ID and secret that must be given together
pub(crate) fn client_credentials(
    client_id: Option<ClientId>,
    client_secret: Option<ClientSecret>,
) -> Result<Option<(ClientId, ClientSecret)>, ValidationError> {
    validate::client_credentials_pair(
        client_id.as_deref().map(|c| c.as_str()),
        client_secret.as_deref().map(|c| c.as_str()),
    )?;
    validate::optional("client_id", client_id.as_deref().map(|c| c.as_str()))?;
    validate::optional(
        "client_secret",
        client_secret.as_deref().map(|c| c.as_str()),
    )?;
    Ok(client_id.zip(client_secret))
}

/// Exchanges an API key for IAM tokens
#[derive(Debug)]
pub struct IamTokenSource {
    apikey: ApiKey,
    url: String,
    client: Option<(ClientId, ClientSecret)>,
    scope: Option<String>,
    options: RequestOptions,
}

impl IamTokenSource {
    /// Validates `config` and constructs the source
    pub fn new(config: IamConfig) -> Result<Self, ValidationError> {
        validate::required("apikey", config.apikey.as_deref().map(ApiKeyRef::as_str))?;
        validate::optional("url", config.url.as_deref())?;
        config.options.validate()?;
        let client = client_credentials(config.client_id, config.client_secret)?;

        let apikey = config
            .apikey
            .ok_or_else(|| ValidationError::new("The apikey shouldn't be None."))?;

        Ok(Self {
            apikey,
            url: iam_token_url(config.url.as_deref()),
            client,
            scope: config.scope,
            options: config.options,
        })
    }

    /// The IAM token endpoint
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The request options
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }
}

#[async_trait]
impl TokenSource for IamTokenSource {
    fn name(&self) -> &'static str {
        "iam"
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.url))]
    async fn request_token(&self, transport: &dyn HttpTransport) -> Result<TokenResponse, Error> {
        let mut form = vec![
            form_field("grant_type", GRANT_TYPE),
            form_field("apikey", self.apikey.as_str()),
            form_field("response_type", RESPONSE_TYPE),
        ];
        if let Some(scope) = &self.scope {
            form.push(form_field("scope", scope));
        }

        let mut request =
            iam_form_request(&self.url, &self.options, "iam-authenticator").form(form);
        if let Some((id, secret)) = &self.client {
            request = request.basic_auth(id.as_str(), secret.as_str());
        }

        let response = transport::send(transport, request.build()?).await?;
        TokenResponse::from_json(&response.body, TOKEN_FIELD)
    }
}

/// A token manager for IAM API key exchanges
pub type IamTokenManager = TokenManager<IamTokenSource>;

impl TokenManager<IamTokenSource> {
    /// Validates `config` and constructs a manager using the default transport
    #[cfg(feature = "reqwest")]
    pub fn new(config: IamConfig) -> Result<Self, ValidationError> {
        Self::new_with_options(config, ManagerOptions::default())
    }

    /// Validates `config` and constructs a manager with the given collaborators
    pub fn new_with_options(
        config: IamConfig,
        options: ManagerOptions,
    ) -> Result<Self, ValidationError> {
        Ok(Self::with_options(IamTokenSource::new(config)?, options))
    }
}

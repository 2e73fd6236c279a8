//! Tokens for a trusted profile, assumed with an IAM token obtained from an API key
//!
//! The exchange takes two hops. A nested [`IamTokenManager`] turns the API key
//! into an IAM access token (and caches it on its own schedule), which is then
//! traded for a token of the trusted profile. Client credentials and scope only
//! ever apply to the first hop.

use async_trait::async_trait;

use super::{
    form_field,
    iam::{IamConfig, IamTokenManager, IamTokenSource},
    iam_form_request, iam_token_url,
};
use crate::{
    manager::{ManagerOptions, TokenManager, TokenSource},
    tokens::TokenResponse,
    transport::{self, HttpTransport, RequestOptions},
    validate, ApiKey, ClientId, ClientSecret, Error, ValidationError,
};

const GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:assume";
const RESPONSE_TYPE: &str = "cloud_iam";
const TOKEN_FIELD: &str = "access_token";

/// Configuration for an [`IamAssumeTokenManager`]
#[derive(Clone, Debug, Default)]
pub struct IamAssumeConfig {
    /// The API key exchanged for the initial IAM token
    pub apikey: Option<ApiKey>,
    /// The ID of the trusted profile to assume
    pub iam_profile_id: Option<String>,
    /// The CRN of the trusted profile to assume
    pub iam_profile_crn: Option<String>,
    /// The name of the trusted profile to assume
    pub iam_profile_name: Option<String>,
    /// The account holding the named trusted profile
    pub iam_account_id: Option<String>,
    /// The IAM base URL or token endpoint
    pub url: Option<String>,
    /// The client ID used when obtaining the initial IAM token
    pub client_id: Option<ClientId>,
    /// The client secret used when obtaining the initial IAM token
    pub client_secret: Option<ClientSecret>,
    /// The scope of the initial IAM token
    pub scope: Option<String>,
    /// How IAM is reached, on both hops
    pub options: RequestOptions,
}

impl IamAssumeConfig {
    /// Configuration for exchanging `apikey`
    pub fn new(apikey: impl Into<String>) -> Self {
        Self {
            apikey: Some(ApiKey::new(apikey.into())),
            ..Self::default()
        }
    }

    /// Selects the trusted profile by ID
    pub fn with_iam_profile_id(mut self, id: impl Into<String>) -> Self {
        self.iam_profile_id = Some(id.into());
        self
    }

    /// Selects the trusted profile by CRN
    pub fn with_iam_profile_crn(mut self, crn: impl Into<String>) -> Self {
        self.iam_profile_crn = Some(crn.into());
        self
    }

    /// Selects the trusted profile by name within an account
    pub fn with_iam_profile_name(
        mut self,
        name: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        self.iam_profile_name = Some(name.into());
        self.iam_account_id = Some(account_id.into());
        self
    }

    /// Sets the IAM base URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the client credentials used when obtaining the initial IAM token
    pub fn with_client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(ClientId::new(client_id.into()));
        self.client_secret = Some(ClientSecret::new(client_secret.into()));
        self
    }

    /// Sets the scope of the initial IAM token
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

#[derive(Debug)]
enum Profile {
    Id(String),
    Crn(String),
    Name { name: String, account: String },
}

impl Profile {
    fn select(config: &mut IamAssumeConfig) -> Result<Self, ValidationError> {
        let selected = validate::count_present(&[
            config.iam_profile_id.as_deref(),
            config.iam_profile_crn.as_deref(),
            config.iam_profile_name.as_deref(),
        ]);
        if selected != 1 {
            return Err(ValidationError::new(
                "Exactly one of `iam_profile_id`, `iam_profile_crn`, or `iam_profile_name` must be specified.",
            ));
        }

        let name = config.iam_profile_name.take().filter(|s| !s.is_empty());
        let account = config.iam_account_id.take().filter(|s| !s.is_empty());
        let profile = match (config.iam_profile_id.take(), config.iam_profile_crn.take()) {
            (Some(id), _) if !id.is_empty() => Profile::Id(id),
            (_, Some(crn)) if !crn.is_empty() => Profile::Crn(crn),
            _ => match (name, account) {
                (Some(name), Some(account)) => Profile::Name { name, account },
                _ => {
                    return Err(ValidationError::new(
                        "`iam_profile_name` and `iam_account_id` must be provided together, or not at all.",
                    ))
                }
            },
        };

        match &profile {
            Profile::Id(id) => validate::not_placeholder("iam_profile_id", id)?,
            Profile::Crn(crn) => validate::not_placeholder("iam_profile_crn", crn)?,
            Profile::Name { name, account } => {
                validate::not_placeholder("iam_profile_name", name)?;
                validate::not_placeholder("iam_account_id", account)?;
            }
        }

        Ok(profile)
    }

    fn form_fields(&self) -> Vec<(String, String)> {
        match self {
            Profile::Id(id) => vec![form_field("profile_id", id)],
            Profile::Crn(crn) => vec![form_field("profile_crn", crn)],
            Profile::Name { name, account } => vec![
                form_field("profile_name", name),
                form_field("account", account),
            ],
        }
    }
}

/// Exchanges an IAM token for a token of a trusted profile
#[derive(Debug)]
pub struct IamAssumeTokenSource {
    delegate: IamTokenManager,
    profile: Profile,
    url: String,
    options: RequestOptions,
}

impl IamAssumeTokenSource {
    /// Validates `config` and constructs the source, with a delegate IAM
    /// manager sharing the given collaborators
    pub fn new(
        mut config: IamAssumeConfig,
        options: ManagerOptions,
    ) -> Result<Self, ValidationError> {
        if config.iam_account_id.is_some() && config.iam_profile_name.is_none() {
            return Err(ValidationError::new(
                "`iam_profile_name` and `iam_account_id` must be provided together, or not at all.",
            ));
        }
        let profile = Profile::select(&mut config)?;

        let delegate_config = IamConfig {
            apikey: config.apikey,
            url: config.url.clone(),
            client_id: config.client_id,
            client_secret: config.client_secret,
            scope: config.scope,
            options: config.options.clone(),
        };
        let delegate = TokenManager::with_options(IamTokenSource::new(delegate_config)?, options);

        Ok(Self {
            delegate,
            profile,
            url: iam_token_url(config.url.as_deref()),
            options: config.options,
        })
    }

    /// The manager of the initial IAM token
    pub fn delegate(&self) -> &IamTokenManager {
        &self.delegate
    }
}

#[async_trait]
impl TokenSource for IamAssumeTokenSource {
    fn name(&self) -> &'static str {
        "iam-assume"
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.url))]
    async fn request_token(&self, transport: &dyn HttpTransport) -> Result<TokenResponse, Error> {
        let iam_token = self.delegate.get_token().await?;

        let mut form = vec![
            form_field("grant_type", GRANT_TYPE),
            form_field("access_token", iam_token.as_str()),
        ];
        form.extend(self.profile.form_fields());
        form.push(form_field("response_type", RESPONSE_TYPE));

        let request =
            iam_form_request(&self.url, &self.options, "iam-assume-authenticator").form(form);

        let response = transport::send(transport, request.build()?).await?;
        let mut token = TokenResponse::from_json(&response.body, TOKEN_FIELD)?;
        token.discard_refresh_token();
        Ok(token)
    }
}

/// A token manager for trusted profiles assumed through IAM
pub type IamAssumeTokenManager = TokenManager<IamAssumeTokenSource>;

impl TokenManager<IamAssumeTokenSource> {
    /// Validates `config` and constructs a manager using the default transport
    #[cfg(feature = "reqwest")]
    pub fn new(config: IamAssumeConfig) -> Result<Self, ValidationError> {
        Self::new_with_options(config, ManagerOptions::default())
    }

    /// Validates `config` and constructs a manager with the given collaborators
    ///
    /// The delegate IAM manager shares the same collaborators.
    pub fn new_with_options(
        config: IamAssumeConfig,
        options: ManagerOptions,
    ) -> Result<Self, ValidationError> {
        let source = IamAssumeTokenSource::new(config, options.clone())?;
        Ok(Self::with_options(source, options))
    }
}

//! IAM tokens obtained with a compute resource token read from the local filesystem

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{form_field, iam::client_credentials, iam_form_request, iam_token_url};
use crate::{
    manager::{ManagerOptions, TokenManager, TokenSource},
    tokens::TokenResponse,
    transport::{self, HttpTransport, RequestOptions},
    validate, ClientId, ClientSecret, Error, ValidationError,
};

const GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:cr-token";
const TOKEN_FIELD: &str = "access_token";

/// Locations searched, in order, when no CR token file is configured
pub const DEFAULT_CR_TOKEN_FILENAMES: [&str; 3] = [
    "/var/run/secrets/tokens/vault-token",
    "/var/run/secrets/tokens/sa-token",
    "/var/run/secrets/codeengine.cloud.ibm.com/compute-resource-token/token",
];

/// Configuration for a [`ContainerTokenManager`]
#[derive(Clone, Debug, Default)]
pub struct ContainerConfig {
    /// The file holding the compute resource token
    pub cr_token_filename: Option<PathBuf>,
    /// The name of the trusted profile to assume
    pub iam_profile_name: Option<String>,
    /// The ID of the trusted profile to assume
    pub iam_profile_id: Option<String>,
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

impl ContainerConfig {
    /// Sets the file holding the compute resource token
    pub fn with_cr_token_filename(mut self, path: impl Into<PathBuf>) -> Self {
        self.cr_token_filename = Some(path.into());
        self
    }

    /// Sets the name of the trusted profile
    pub fn with_iam_profile_name(mut self, name: impl Into<String>) -> Self {
        self.iam_profile_name = Some(name.into());
        self
    }

    /// Sets the ID of the trusted profile
    pub fn with_iam_profile_id(mut self, id: impl Into<String>) -> Self {
        self.iam_profile_id = Some(id.into());
        self
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

/// Exchanges the compute resource token for IAM tokens
#[derive(Debug)]
pub struct ContainerTokenSource {
    cr_token_filename: Option<PathBuf>,
    iam_profile_name: Option<String>,
    iam_profile_id: Option<String>,
    url: String,
    client: Option<(ClientId, ClientSecret)>,
    scope: Option<String>,
    options: RequestOptions,
}

impl ContainerTokenSource {
    /// Validates `config` and constructs the source
    pub fn new(config: ContainerConfig) -> Result<Self, ValidationError> {
        let iam_profile_name = config.iam_profile_name.filter(|s| !s.is_empty());
        let iam_profile_id = config.iam_profile_id.filter(|s| !s.is_empty());
        let profile_name = iam_profile_name.as_deref();
        let profile_id = iam_profile_id.as_deref();
        if validate::count_present(&[profile_name, profile_id]) == 0 {
            return Err(ValidationError::new(
                "At least one of iam_profile_name or iam_profile_id must be specified.",
            ));
        }
        validate::optional("iam_profile_name", profile_name)?;
        validate::optional("iam_profile_id", profile_id)?;
        validate::optional("url", config.url.as_deref())?;
        config.options.validate()?;
        let client = client_credentials(config.client_id, config.client_secret)?;

        Ok(Self {
            cr_token_filename: config.cr_token_filename,
            iam_profile_name,
            iam_profile_id,
            url: iam_token_url(config.url.as_deref()),
            client,
            scope: config.scope,
            options: config.options,
        })
    }

    /// Reads the compute resource token
    ///
    /// A configured filename is used as-is; otherwise the default locations are
    /// tried in order and the first readable one wins.
    pub async fn retrieve_cr_token(&self) -> Result<String, Error> {
        match &self.cr_token_filename {
            Some(path) => read_cr_token(path).await,
            None => {
                let mut last = None;
                for candidate in DEFAULT_CR_TOKEN_FILENAMES {
                    match read_cr_token(Path::new(candidate)).await {
                        Ok(token) => return Ok(token),
                        Err(e) => last = Some(e),
                    }
                }
                Err(last.unwrap_or_else(|| Error::CrToken {
                    path: PathBuf::new(),
                    source: std::io::ErrorKind::NotFound.into(),
                }))
            }
        }
    }
}

async fn read_cr_token(path: &Path) -> Result<String, Error> {
    tracing::debug!(path = %path.display(), "attempting to read CR token");

    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| Error::CrToken {
            path: path.to_owned(),
            source,
        })?;

    Ok(contents.trim().to_owned())
}

#[async_trait]
impl TokenSource for ContainerTokenSource {
    fn name(&self) -> &'static str {
        "container"
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.url))]
    async fn request_token(&self, transport: &dyn HttpTransport) -> Result<TokenResponse, Error> {
        let cr_token = self.retrieve_cr_token().await?;

        let mut form = vec![
            form_field("grant_type", GRANT_TYPE),
            form_field("cr_token", &cr_token),
        ];
        if let Some(id) = &self.iam_profile_id {
            form.push(form_field("profile_id", id));
        }
        if let Some(name) = &self.iam_profile_name {
            form.push(form_field("profile_name", name));
        }
        if let Some(scope) = &self.scope {
            form.push(form_field("scope", scope));
        }

        let mut request =
            iam_form_request(&self.url, &self.options, "container-authenticator").form(form);
        if let Some((id, secret)) = &self.client {
            request = request.basic_auth(id.as_str(), secret.as_str());
        }

        let response = transport::send(transport, request.build()?).await?;
        TokenResponse::from_json(&response.body, TOKEN_FIELD)
    }
}

/// A token manager for compute resource token exchanges
pub type ContainerTokenManager = TokenManager<ContainerTokenSource>;

impl TokenManager<ContainerTokenSource> {
    /// Validates `config` and constructs a manager using the default transport
    #[cfg(feature = "reqwest")]
    pub fn new(config: ContainerConfig) -> Result<Self, ValidationError> {
        Self::new_with_options(config, ManagerOptions::default())
    }

    /// Validates `config` and constructs a manager with the given collaborators
    pub fn new_with_options(
        config: ContainerConfig,
        options: ManagerOptions,
    ) -> Result<Self, ValidationError> {
        Ok(Self::with_options(ContainerTokenSource::new(config)?, options))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use cloudcore_clock::{ManualClock, UnixTime};

    use super::*;
    use crate::mock::{MockResponse, MockTransport};

    fn token_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn manager(config: ContainerConfig, mock: &MockTransport) -> ContainerTokenManager {
        let options =
            ManagerOptions::new(mock.shared()).with_clock(ManualClock::new(UnixTime(1_000)));
        ContainerTokenManager::new_with_options(config, options).unwrap()
    }

    #[test]
    fn a_profile_is_required() {
        let err = ContainerTokenSource::new(ContainerConfig::default()).unwrap_err();
        assert_eq!(
            err.message(),
            "At least one of iam_profile_name or iam_profile_id must be specified."
        );
    }

    #[tokio::test]
    async fn exchanges_the_trimmed_cr_token() {
        let file = token_file("  cr-token-value\n");
        let mock = MockTransport::new();
        mock.push(MockResponse::token("access_token", 1_000, 4_600));
        let config = ContainerConfig::default()
            .with_cr_token_filename(file.path())
            .with_iam_profile_id("iam-id-123")
            .with_scope("scope1");
        let manager = manager(config, &mock);

        manager.get_token().await.unwrap();

        let req = mock.last_request().unwrap();
        assert_eq!(
            req.body.form_field("grant_type"),
            Some("urn:ibm:params:oauth:grant-type:cr-token")
        );
        assert_eq!(req.body.form_field("cr_token"), Some("cr-token-value"));
        assert_eq!(req.body.form_field("profile_id"), Some("iam-id-123"));
        assert_eq!(req.body.form_field("profile_name"), None);
        assert_eq!(req.body.form_field("scope"), Some("scope1"));
        assert!(req
            .header_str(http::header::USER_AGENT)
            .unwrap()
            .starts_with("cloudcore-rust/container-authenticator-"));
    }

    #[tokio::test]
    async fn empty_profile_selectors_are_not_sent() {
        let file = token_file("cr");
        let mock = MockTransport::new();
        mock.push(MockResponse::token("access_token", 1_000, 4_600));
        let config = ContainerConfig::default()
            .with_cr_token_filename(file.path())
            .with_iam_profile_name("profile")
            .with_iam_profile_id("");
        let manager = manager(config, &mock);

        manager.get_token().await.unwrap();

        let req = mock.last_request().unwrap();
        assert_eq!(req.body.form_field("profile_name"), Some("profile"));
        assert_eq!(req.body.form_field("profile_id"), None);
    }

    #[test]
    fn empty_profile_selectors_do_not_count() {
        let config = ContainerConfig::default()
            .with_iam_profile_name("")
            .with_iam_profile_id("");
        assert!(ContainerTokenSource::new(config).is_err());
    }

    #[tokio::test]
    async fn client_credentials_become_basic_auth() {
        let file = token_file("cr");
        let mock = MockTransport::new();
        mock.push(MockResponse::token("access_token", 1_000, 4_600));
        let config = ContainerConfig::default()
            .with_cr_token_filename(file.path())
            .with_iam_profile_name("profile")
            .with_client_credentials("id", "secret");
        let manager = manager(config, &mock);

        manager.get_token().await.unwrap();

        let auth = mock.last_request().unwrap().basic_auth.unwrap();
        assert_eq!(auth.username, "id");
        assert_eq!(auth.password.as_str(), "secret");
    }

    #[tokio::test]
    async fn unreadable_cr_token_files_fail_without_a_request() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing-token");
        let mock = MockTransport::new();
        let config = ContainerConfig::default()
            .with_cr_token_filename(&missing)
            .with_iam_profile_id("iam-id-123");
        let manager = manager(config, &mock);

        let err = manager.get_token().await.unwrap_err();

        match err {
            Error::CrToken { path, .. } => assert_eq!(path, missing),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(mock.calls(), 0);
    }
}

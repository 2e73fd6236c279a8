//! IAM tokens for a trusted profile, obtained through the VPC instance metadata service

use async_trait::async_trait;
use http::{header::AUTHORIZATION, HeaderName, Method};

use super::{join_url, json_request};
use crate::{
    manager::{ManagerOptions, TokenManager, TokenSource},
    tokens::TokenResponse,
    transport::{self, HttpTransport, RequestOptions},
    validate, AccessToken, Error, ValidationError,
};

/// The default address of the instance metadata service
pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254";

const METADATA_SERVICE_VERSION: &str = "2022-03-01";
const INSTANCE_IDENTITY_TOKEN_PATH: &str = "/instance_identity/v1/token";
const IAM_TOKEN_PATH: &str = "/instance_identity/v1/iam_token";
const INSTANCE_IDENTITY_TOKEN_LIFETIME: u64 = 300;
const COMPONENT: &str = "vpc-instance-authenticator";

/// Configuration for a [`VpcInstanceTokenManager`]
#[derive(Clone, Debug, Default)]
pub struct VpcInstanceConfig {
    /// The CRN of the trusted profile
    pub iam_profile_crn: Option<String>,
    /// The ID of the trusted profile
    pub iam_profile_id: Option<String>,
    /// The base URL of the instance metadata service
    pub url: Option<String>,
    /// How the metadata service is reached
    pub options: RequestOptions,
}

impl VpcInstanceConfig {
    /// Selects the trusted profile by CRN
    pub fn with_iam_profile_crn(mut self, crn: impl Into<String>) -> Self {
        self.iam_profile_crn = Some(crn.into());
        self
    }

    /// Selects the trusted profile by ID
    pub fn with_iam_profile_id(mut self, id: impl Into<String>) -> Self {
        self.iam_profile_id = Some(id.into());
        self
    }

    /// Sets the base URL of the metadata service
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the request options
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug)]
enum TrustedProfile {
    Crn(String),
    Id(String),
}

impl TrustedProfile {
    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Crn(crn) => serde_json::json!({ "trusted_profile": { "crn": crn } }),
            Self::Id(id) => serde_json::json!({ "trusted_profile": { "id": id } }),
        }
    }
}

/// Exchanges the instance identity for IAM tokens of a trusted profile
#[derive(Debug)]
pub struct VpcInstanceTokenSource {
    profile: TrustedProfile,
    url: String,
    options: RequestOptions,
}

impl VpcInstanceTokenSource {
    /// Validates `config` and constructs the source
    pub fn new(config: VpcInstanceConfig) -> Result<Self, ValidationError> {
        let crn = config.iam_profile_crn.filter(|s| !s.is_empty());
        let id = config.iam_profile_id.filter(|s| !s.is_empty());
        let profile = match (crn, id) {
            (Some(crn), None) => {
                validate::not_placeholder("iam_profile_crn", &crn)?;
                TrustedProfile::Crn(crn)
            }
            (None, Some(id)) => {
                validate::not_placeholder("iam_profile_id", &id)?;
                TrustedProfile::Id(id)
            }
            _ => {
                return Err(ValidationError::new(
                    "Exactly one of `iam_profile_crn` or `iam_profile_id` must be specified.",
                ))
            }
        };
        validate::optional("url", config.url.as_deref())?;
        config.options.validate()?;

        Ok(Self {
            profile,
            url: config.url.unwrap_or_else(|| DEFAULT_METADATA_URL.to_owned()),
            options: config.options,
        })
    }

    /// Obtains an instance identity token from the metadata service
    async fn retrieve_instance_identity_token(
        &self,
        transport: &dyn HttpTransport,
    ) -> Result<AccessToken, Error> {
        let request = json_request(
            Method::PUT,
            &join_url(&self.url, INSTANCE_IDENTITY_TOKEN_PATH),
            &self.options,
            COMPONENT,
        )
        .header(HeaderName::from_static("metadata-flavor"), "ibm")
        .query("version", METADATA_SERVICE_VERSION)
        .json(serde_json::json!({ "expires_in": INSTANCE_IDENTITY_TOKEN_LIFETIME }))
        .build()?;

        let response = transport::send(transport, request).await?;
        let token = TokenResponse::from_json(&response.body, "access_token")?;
        Ok(token.access_token().to_owned())
    }
}

#[async_trait]
impl TokenSource for VpcInstanceTokenSource {
    fn name(&self) -> &'static str {
        "vpc-instance"
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.url))]
    async fn request_token(&self, transport: &dyn HttpTransport) -> Result<TokenResponse, Error> {
        let identity = self.retrieve_instance_identity_token(transport).await?;

        let request = json_request(
            Method::POST,
            &join_url(&self.url, IAM_TOKEN_PATH),
            &self.options,
            COMPONENT,
        )
        .header(AUTHORIZATION, &format!("Bearer {}", identity.as_str()))
        .query("version", METADATA_SERVICE_VERSION)
        .json(self.profile.to_json())
        .build()?;

        let response = transport::send(transport, request).await?;
        TokenResponse::from_json(&response.body, "access_token")
    }
}

/// A token manager for VPC compute instances
pub type VpcInstanceTokenManager = TokenManager<VpcInstanceTokenSource>;

impl TokenManager<VpcInstanceTokenSource> {
    /// Validates `config` and constructs a manager using the default transport
    #[cfg(feature = "reqwest")]
    pub fn new(config: VpcInstanceConfig) -> Result<Self, ValidationError> {
        Self::new_with_options(config, ManagerOptions::default())
    }

    /// Validates `config` and constructs a manager with the given collaborators
    pub fn new_with_options(
        config: VpcInstanceConfig,
        options: ManagerOptions,
    ) -> Result<Self, ValidationError> {
        Ok(Self::with_options(VpcInstanceTokenSource::new(config)?, options))
    }
}

#[cfg(test)]
mod tests {
    use cloudcore_clock::{ManualClock, UnixTime};

    use super::*;
    use crate::mock::{jwt_with, MockResponse, MockTransport};

    fn manager(config: VpcInstanceConfig, mock: &MockTransport) -> VpcInstanceTokenManager {
        let options =
            ManagerOptions::new(mock.shared()).with_clock(ManualClock::new(UnixTime(1_000)));
        VpcInstanceTokenManager::new_with_options(config, options).unwrap()
    }

    #[test]
    fn exactly_one_profile_selector_is_required() {
        assert!(VpcInstanceTokenSource::new(VpcInstanceConfig::default()).is_err());
        let both = VpcInstanceConfig::default()
            .with_iam_profile_crn("crn")
            .with_iam_profile_id("id");
        assert!(VpcInstanceTokenSource::new(both).is_err());
    }

    #[tokio::test]
    async fn exchanges_the_instance_identity_token() {
        let mock = MockTransport::new();
        mock.push(MockResponse::json(
            200,
            serde_json::json!({ "access_token": "identity-token", "expires_in": 300 }),
        ));
        mock.push(MockResponse::token("access_token", 1_000, 4_600));
        let manager = manager(
            VpcInstanceConfig::default().with_iam_profile_crn("crn:iam-profile:123"),
            &mock,
        );

        let token = manager.get_token().await.unwrap();
        assert_eq!(token.as_str(), jwt_with(1_000, 4_600));

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);

        let identity = &requests[0];
        assert_eq!(identity.method, Method::PUT);
        assert_eq!(
            identity.url,
            "http://169.254.169.254/instance_identity/v1/token"
        );
        assert_eq!(identity.header_str("metadata-flavor"), Some("ibm"));
        assert_eq!(
            identity.query,
            [("version".to_owned(), "2022-03-01".to_owned())]
        );
        assert_eq!(
            identity.body.json(),
            Some(&serde_json::json!({ "expires_in": 300 }))
        );

        let exchange = &requests[1];
        assert_eq!(exchange.method, Method::POST);
        assert_eq!(
            exchange.url,
            "http://169.254.169.254/instance_identity/v1/iam_token"
        );
        assert_eq!(
            exchange.header_str(AUTHORIZATION),
            Some("Bearer identity-token")
        );
        assert_eq!(
            exchange.body.json(),
            Some(&serde_json::json!({ "trusted_profile": { "crn": "crn:iam-profile:123" } }))
        );
    }

    #[tokio::test]
    async fn profile_ids_are_sent_by_id() {
        let mock = MockTransport::new();
        mock.push(MockResponse::json(
            200,
            serde_json::json!({ "access_token": "identity-token" }),
        ));
        mock.push(MockResponse::token("access_token", 1_000, 4_600));
        let manager = manager(
            VpcInstanceConfig::default()
                .with_iam_profile_id("iam-id-123")
                .with_url("http://metadata.local/"),
            &mock,
        );

        manager.get_token().await.unwrap();

        let exchange = mock.last_request().unwrap();
        assert_eq!(
            exchange.url,
            "http://metadata.local/instance_identity/v1/iam_token"
        );
        assert_eq!(
            exchange.body.json(),
            Some(&serde_json::json!({ "trusted_profile": { "id": "iam-id-123" } }))
        );
    }

    #[tokio::test]
    async fn metadata_failures_stop_the_exchange() {
        let mock = MockTransport::new();
        mock.push(MockResponse::json(
            503,
            serde_json::json!({ "message": "unavailable" }),
        ));
        let manager = manager(VpcInstanceConfig::default().with_iam_profile_id("id"), &mock);

        let err = manager.get_token().await.unwrap_err();

        assert_eq!(err.status_code(), Some(503));
        assert_eq!(mock.calls(), 1);
    }
}

//! Authenticators backed by a token manager
//!
//! Each authenticator asks its [`TokenManager`] for a token on every request
//! and sends it as a `Bearer` credential. Caching, refreshing and concurrency
//! are handled by the manager.

use async_trait::async_trait;
use cloudcore_tokens::{
    sources::{
        container::{ContainerConfig, ContainerTokenSource},
        cp4d::{Cp4dConfig, Cp4dTokenSource},
        iam::{IamConfig, IamTokenSource},
        iam_assume::{IamAssumeConfig, IamAssumeTokenSource},
        mcsp::{McspConfig, McspTokenSource},
        mcspv2::{McspV2Config, McspV2TokenSource},
        vpc::{VpcInstanceConfig, VpcInstanceTokenSource},
    },
    Error, ManagerOptions, TokenManager, TokenSource, TransportError, ValidationError,
};
use http::{header::AUTHORIZATION, HeaderMap};

use crate::{bearer::bearer_header, AuthType, Authenticator};

/// A token source with a corresponding kind of authentication
pub trait AuthenticatedSource: TokenSource {
    /// The kind of authentication performed with tokens from this source
    const AUTH_TYPE: AuthType;
}

/// Sends tokens obtained by a [`TokenManager`] as bearer credentials
#[derive(Debug)]
pub struct TokenAuthenticator<S> {
    manager: TokenManager<S>,
}

impl<S> Clone for TokenAuthenticator<S> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

impl<S: AuthenticatedSource> TokenAuthenticator<S> {
    /// Wraps an existing token manager
    pub fn from_manager(manager: TokenManager<S>) -> Self {
        Self { manager }
    }

    /// The underlying token manager
    pub fn token_manager(&self) -> &TokenManager<S> {
        &self.manager
    }
}

#[async_trait]
impl<S: AuthenticatedSource> Authenticator for TokenAuthenticator<S> {
    fn authentication_type(&self) -> AuthType {
        S::AUTH_TYPE
    }

    async fn authenticate(&self, headers: &mut HeaderMap) -> Result<(), Error> {
        let token = self.manager.get_token().await?;
        let value = bearer_header(token.as_str()).ok_or_else(|| {
            TransportError::InvalidRequest("access token is not a valid header value".to_owned())
        })?;
        headers.insert(AUTHORIZATION, value);
        tracing::debug!(authentication_type = %S::AUTH_TYPE, "authenticated request");
        Ok(())
    }
}

macro_rules! token_authenticator {
    ($(#[$meta:meta])* $alias:ident($source:ty, $config:ty) => $auth_type:expr) => {
        $(#[$meta])*
        pub type $alias = TokenAuthenticator<$source>;

        impl AuthenticatedSource for $source {
            const AUTH_TYPE: AuthType = $auth_type;
        }

        impl TokenAuthenticator<$source> {
            /// Validates `config` and constructs an authenticator using the default transport
            #[cfg(feature = "reqwest")]
            #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
            pub fn new(config: $config) -> Result<Self, ValidationError> {
                Self::new_with_options(config, ManagerOptions::default())
            }

            /// Validates `config` and constructs an authenticator with the given collaborators
            pub fn new_with_options(
                config: $config,
                options: ManagerOptions,
            ) -> Result<Self, ValidationError> {
                Ok(Self::from_manager(TokenManager::<$source>::new_with_options(
                    config, options,
                )?))
            }
        }
    };
}

token_authenticator! {
    /// Authenticates with IAM tokens obtained by exchanging an API key
    IamAuthenticator(IamTokenSource, IamConfig) => AuthType::Iam
}

token_authenticator! {
    /// Authenticates with IAM tokens obtained by exchanging a compute resource token
    ContainerAuthenticator(ContainerTokenSource, ContainerConfig) => AuthType::Container
}

token_authenticator! {
    /// Authenticates as a trusted profile assumed through IAM
    IamAssumeAuthenticator(IamAssumeTokenSource, IamAssumeConfig) => AuthType::IamAssume
}

token_authenticator! {
    /// Authenticates with Multi-Cloud SaaS Platform tokens
    McspAuthenticator(McspTokenSource, McspConfig) => AuthType::Mcsp
}

token_authenticator! {
    /// Authenticates with scoped Multi-Cloud SaaS Platform tokens
    McspV2Authenticator(McspV2TokenSource, McspV2Config) => AuthType::McspV2
}

token_authenticator! {
    /// Authenticates with Cloud Pak for Data tokens
    Cp4dAuthenticator(Cp4dTokenSource, Cp4dConfig) => AuthType::Cp4d
}

token_authenticator! {
    /// Authenticates as a trusted profile from a VPC compute instance
    VpcInstanceAuthenticator(VpcInstanceTokenSource, VpcInstanceConfig) => AuthType::Vpc
}

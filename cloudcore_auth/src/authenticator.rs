use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use cloudcore_tokens::Error;
use http::HeaderMap;

use crate::{
    basic::BasicAuthenticator,
    bearer::BearerTokenAuthenticator,
    managed::{
        ContainerAuthenticator, Cp4dAuthenticator, IamAssumeAuthenticator, IamAuthenticator,
        McspAuthenticator, McspV2Authenticator, VpcInstanceAuthenticator,
    },
    no_auth::NoAuthAuthenticator,
};

/// Decorates outgoing requests with credentials
///
/// Implementations only ever write the `Authorization` header. Other headers
/// in the map are left untouched.
#[async_trait]
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// The kind of authentication performed
    fn authentication_type(&self) -> AuthType;

    /// Adds credentials to the headers of an outgoing request
    ///
    /// Token-based authenticators may contact their token service first.
    async fn authenticate(&self, headers: &mut HeaderMap) -> Result<(), Error>;
}

#[async_trait]
impl<T: Authenticator + ?Sized> Authenticator for Arc<T> {
    fn authentication_type(&self) -> AuthType {
        (**self).authentication_type()
    }

    async fn authenticate(&self, headers: &mut HeaderMap) -> Result<(), Error> {
        (**self).authenticate(headers).await
    }
}

#[async_trait]
impl<T: Authenticator + ?Sized> Authenticator for Box<T> {
    fn authentication_type(&self) -> AuthType {
        (**self).authentication_type()
    }

    async fn authenticate(&self, headers: &mut HeaderMap) -> Result<(), Error> {
        (**self).authenticate(headers).await
    }
}

/// The kinds of authentication supported
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthType {
    /// HTTP basic authentication with a username and password
    Basic,
    /// A bearer token supplied and managed by the caller
    BearerToken,
    /// No authentication
    NoAuth,
    /// IAM tokens obtained with an API key
    Iam,
    /// IAM tokens obtained with a compute resource token
    Container,
    /// IAM tokens for an assumed trusted profile
    IamAssume,
    /// Multi-Cloud SaaS Platform tokens
    Mcsp,
    /// Scoped Multi-Cloud SaaS Platform tokens
    McspV2,
    /// Cloud Pak for Data tokens
    Cp4d,
    /// IAM tokens obtained through the VPC instance metadata service
    Vpc,
}

impl AuthType {
    /// Every supported kind
    pub const ALL: [AuthType; 10] = [
        Self::Basic,
        Self::BearerToken,
        Self::NoAuth,
        Self::Iam,
        Self::Container,
        Self::IamAssume,
        Self::Mcsp,
        Self::McspV2,
        Self::Cp4d,
        Self::Vpc,
    ];

    /// The tag identifying this kind in configuration
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::BearerToken => "bearerToken",
            Self::NoAuth => "noAuth",
            Self::Iam => "iam",
            Self::Container => "container",
            Self::IamAssume => "iamAssume",
            Self::Mcsp => "mcsp",
            Self::McspV2 => "mcspv2",
            Self::Cp4d => "cp4d",
            Self::Vpc => "vpc",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tag did not name a supported kind of authentication
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownAuthType(String);

impl UnknownAuthType {
    /// The unrecognized tag
    pub fn tag(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnknownAuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized authentication type `{}`", self.0)
    }
}

impl std::error::Error for UnknownAuthType {}

impl FromStr for AuthType {
    type Err = UnknownAuthType;

    /// Parses a tag, ignoring case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownAuthType(s.to_owned()))
    }
}

/// Any of the supported authenticators
#[derive(Clone, Debug)]
pub enum AnyAuthenticator {
    /// See [`BasicAuthenticator`]
    Basic(BasicAuthenticator),
    /// See [`BearerTokenAuthenticator`]
    BearerToken(BearerTokenAuthenticator),
    /// See [`NoAuthAuthenticator`]
    NoAuth(NoAuthAuthenticator),
    /// See [`IamAuthenticator`]
    Iam(IamAuthenticator),
    /// See [`ContainerAuthenticator`]
    Container(ContainerAuthenticator),
    /// See [`IamAssumeAuthenticator`]
    IamAssume(IamAssumeAuthenticator),
    /// See [`McspAuthenticator`]
    Mcsp(McspAuthenticator),
    /// See [`McspV2Authenticator`]
    McspV2(McspV2Authenticator),
    /// See [`Cp4dAuthenticator`]
    Cp4d(Cp4dAuthenticator),
    /// See [`VpcInstanceAuthenticator`]
    VpcInstance(VpcInstanceAuthenticator),
}

macro_rules! dispatch {
    ($self:ident, $a:ident => $body:expr) => {
        match $self {
            Self::Basic($a) => $body,
            Self::BearerToken($a) => $body,
            Self::NoAuth($a) => $body,
            Self::Iam($a) => $body,
            Self::Container($a) => $body,
            Self::IamAssume($a) => $body,
            Self::Mcsp($a) => $body,
            Self::McspV2($a) => $body,
            Self::Cp4d($a) => $body,
            Self::VpcInstance($a) => $body,
        }
    };
}

#[async_trait]
impl Authenticator for AnyAuthenticator {
    fn authentication_type(&self) -> AuthType {
        dispatch!(self, a => a.authentication_type())
    }

    async fn authenticate(&self, headers: &mut HeaderMap) -> Result<(), Error> {
        dispatch!(self, a => a.authenticate(headers).await)
    }
}

macro_rules! any_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for AnyAuthenticator {
                fn from(a: $ty) -> Self {
                    Self::$variant(a)
                }
            }
        )*
    };
}

any_from! {
    Basic(BasicAuthenticator),
    BearerToken(BearerTokenAuthenticator),
    NoAuth(NoAuthAuthenticator),
    Iam(IamAuthenticator),
    Container(ContainerAuthenticator),
    IamAssume(IamAssumeAuthenticator),
    Mcsp(McspAuthenticator),
    McspV2(McspV2Authenticator),
    Cp4d(Cp4dAuthenticator),
    VpcInstance(VpcInstanceAuthenticator),
}

//! Authenticators for cloud SDK service clients
//!
//! An [`Authenticator`] decorates each outgoing request with credentials by
//! writing its `Authorization` header. Static credentials are handled
//! directly, while token-based authenticators delegate to a
//! [`TokenManager`][cloudcore_tokens::TokenManager] that fetches, caches and
//! refreshes bearer tokens.
//!
//! | Kind          | Authenticator                 | Header               |
//! |---------------|-------------------------------|----------------------|
//! | `basic`       | [`BasicAuthenticator`]        | `Basic <user:pass>`  |
//! | `bearerToken` | [`BearerTokenAuthenticator`]  | `Bearer <token>`     |
//! | `noAuth`      | [`NoAuthAuthenticator`]       | none                 |
//! | `iam`         | [`IamAuthenticator`]          | `Bearer <iam token>` |
//! | `container`   | [`ContainerAuthenticator`]    | `Bearer <iam token>` |
//! | `iamAssume`   | [`IamAssumeAuthenticator`]    | `Bearer <iam token>` |
//! | `mcsp`        | [`McspAuthenticator`]         | `Bearer <token>`     |
//! | `mcspv2`      | [`McspV2Authenticator`]       | `Bearer <token>`     |
//! | `cp4d`        | [`Cp4dAuthenticator`]         | `Bearer <token>`     |
//! | `vpc`         | [`VpcInstanceAuthenticator`]  | `Bearer <iam token>` |
//!
//! ```no_run
//! use cloudcore_auth::{Authenticator, IamAuthenticator};
//! use cloudcore_tokens::sources::iam::IamConfig;
//! use http::HeaderMap;
//!
//! # async fn run() -> Result<(), cloudcore_tokens::Error> {
//! let authenticator = IamAuthenticator::new(IamConfig::new("my-apikey"))?;
//!
//! let mut headers = HeaderMap::new();
//! authenticator.authenticate(&mut headers).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Authenticators can also be described by a flat set of properties, usually
//! taken from the environment:
//!
//! ```no_run
//! # fn run() -> Result<(), cloudcore_tokens::Error> {
//! // Reads MY_SERVICE_AUTH_TYPE, MY_SERVICE_APIKEY, and so on
//! if let Some(authenticator) = cloudcore_auth::get_authenticator_from_environment("my-service")? {
//!     tracing::info!(?authenticator, "configured authenticator");
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod authenticator;
mod basic;
mod bearer;
mod config;
pub mod factory;
pub mod managed;
mod no_auth;

pub use authenticator::{AnyAuthenticator, AuthType, Authenticator, UnknownAuthType};
pub use basic::BasicAuthenticator;
pub use bearer::BearerTokenAuthenticator;
pub use config::AuthConfig;
#[cfg(feature = "reqwest")]
pub use factory::{get_authenticator, get_authenticator_from_environment};
pub use factory::{auth_type, get_authenticator_with_options};
pub use managed::{
    AuthenticatedSource, ContainerAuthenticator, Cp4dAuthenticator, IamAssumeAuthenticator,
    IamAuthenticator, McspAuthenticator, McspV2Authenticator, TokenAuthenticator,
    VpcInstanceAuthenticator,
};
pub use no_auth::NoAuthAuthenticator;

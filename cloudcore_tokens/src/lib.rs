//! Bearer token lifecycle management for cloud SDK authentication
//!
//! Services authenticate API calls with short-lived bearer tokens obtained by
//! exchanging some longer-lived credential (an API key, a compute resource
//! token, a password) at a token service. This crate fetches those tokens,
//! caches them, and refreshes them before they expire, so that callers can
//! simply ask for a valid token on every request.
//!
//! A [`TokenManager`] pairs the lifecycle engine with a [`TokenSource`] that
//! knows how to talk to one particular token service. The [`sources`] module
//! provides sources, configurations and manager aliases for each supported
//! service:
//!
//! * [IAM][sources::iam] API key exchange
//! * [Container][sources::container] compute resource token exchange
//! * [IAM assume][sources::iam_assume] trusted profile exchange
//! * [MCSP][sources::mcsp] and [MCSP v2][sources::mcspv2] API key exchange
//! * [Cloud Pak for Data][sources::cp4d] username with password or API key
//! * [VPC instance][sources::vpc] metadata service exchange
//!
//! ```no_run
//! use cloudcore_tokens::sources::iam::{IamConfig, IamTokenManager};
//!
//! # async fn run() -> Result<(), cloudcore_tokens::Error> {
//! let manager = IamTokenManager::new(IamConfig::new("my-apikey"))?;
//!
//! let token = manager.get_token().await?;
//! tracing::info!(token = format_args!("{:#?}", token), "obtained access token");
//! # Ok(())
//! # }
//! ```
//!
//! # Lifecycle
//!
//! A token's lifetime is read from the `iat` and `exp` claims of the JWT the
//! token service returns. Once only a fifth of that lifetime remains, the token
//! _needs refreshing_: it is still handed out, while a single background task
//! fetches a replacement. Only when a token has expired do callers wait on the
//! network, and even then only one of them performs the fetch. See the
//! [`manager`] module for details.
//!
//! # Features
//!
//! * `reqwest` (default): provides [`ReqwestTransport`][transport::ReqwestTransport]
//!   and the `new()` constructors that use it.
//! * `test-util`: provides a scripted [`MockTransport`][mock::MockTransport] for
//!   exercising token managers without a network.

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

mod braids;
mod error;
pub mod jwt;
pub mod manager;
#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod mock;
mod pacing;
pub mod sources;
mod tokens;
pub mod transport;
pub mod validate;

pub use braids::*;
pub use cloudcore_clock::{Clock, DurationSecs, UnixTime};
pub use error::{ApiError, BoxError, Error, TransportError, ValidationError};
pub use manager::{ManagerOptions, TokenManager, TokenSource};
pub use pacing::FetchPacingConfig;
pub use tokens::{CachedToken, TokenLifetimeConfig, TokenResponse, TokenStatus, TokenWindow};

//! Middleware to automatically attach credentials to outgoing requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AuthenticatorMiddleware`] in the middleware stack to have an
//! [`Authenticator`] decorate each outbound request.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required.
//!
//! ```
//! use cloudcore_auth::BearerTokenAuthenticator;
//! use cloudcore_reqwest::AuthenticatorMiddleware;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let authenticator = BearerTokenAuthenticator::new("token").unwrap();
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AuthenticatorMiddleware::new(authenticator))
//!     .build();
//!
//! let req = client
//!     .get("https://example.com");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! The middleware can also be configured to authenticate requests only
//! conditionally. This can be useful in the event that you want to use a
//! single common middleware stack with multiple potential backends and want
//! to ensure that specific credentials are used for specific backends.
//!
//! These predicates can be composed together to evaluate more complex
//! requirements prior to authenticating a request.
//!
//! ```
//! use cloudcore_auth::NoAuthAuthenticator;
//! use cloudcore_reqwest::{
//!     AuthenticatorMiddleware, ExactHostMatch, HttpsOnly
//! };
//! use predicates::prelude::PredicateBooleanExt;
//!
//! AuthenticatorMiddleware::new(NoAuthAuthenticator)
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("example.com")));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use cloudcore_auth::Authenticator;
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

/// A middleware that authenticates outgoing requests
#[derive(Clone, Debug)]
pub struct AuthenticatorMiddleware<A, P> {
    authenticator: A,
    predicate: P,
}

impl<A> AuthenticatorMiddleware<A, HttpsOnly> {
    /// Construct a new middleware from an authenticator
    ///
    /// By default, this middleware will only authenticate a request if it
    /// is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(authenticator: A) -> Self {
        Self {
            authenticator,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AuthenticatorMiddleware<A, P> {
        AuthenticatorMiddleware {
            authenticator: self.authenticator,
            predicate,
        }
    }
}

impl<A, P> AuthenticatorMiddleware<A, P> {
    /// The authenticator
    pub fn authenticator(&self) -> &A {
        &self.authenticator
    }
}

#[async_trait::async_trait]
impl<A, P> Middleware for AuthenticatorMiddleware<A, P>
where
    A: Authenticator + 'static,
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION) {
            self.authenticator
                .authenticate(req.headers_mut())
                .await
                .map_err(reqwest_middleware::Error::middleware)?;

            tracing::trace!(
                authentication_type = %self.authenticator.authentication_type(),
                "authenticated request"
            );
        }

        next.run(req, extensions).await
    }
}

/// Reports a case when a predicate did not produce the expected result
fn mismatch<'a, P>(
    predicate: &'a P,
    expected: bool,
    result: bool,
    name: &'static str,
    observed: impl FnOnce() -> String,
) -> Option<reflection::Case<'a>>
where
    P: reflection::PredicateReflection,
{
    (result != expected).then(|| {
        reflection::Case::new(Some(predicate), result)
            .add_product(reflection::Product::new(name, observed()))
    })
}

/// Only authenticate a request if it is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        mismatch(self, expected, self.eval(req), "scheme", || {
            req.url().scheme().to_owned()
        })
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only authenticate a request if it is being sent to the exact host specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
    pub fn new<S>(host: S) -> Self
    where
        S: ToString,
    {
        Self {
            host: host.to_string(),
        }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(self.host.as_str())
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        mismatch(self, expected, self.eval(req), "host", || {
            req.url().host_str().unwrap_or("<no host>").to_owned()
        })
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host == {}", self.host)
    }
}

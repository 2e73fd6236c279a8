//! Token services that a [`TokenManager`][crate::TokenManager] can draw tokens from
//!
//! Each submodule pairs a configuration struct with a [`TokenSource`][crate::TokenSource]
//! implementation and a type alias for the corresponding manager. Configuration is
//! validated when the source is constructed, so a manager never holds a source that
//! cannot at least attempt a request.

use http::{header, Method};

use crate::transport::{RequestOptions, TokenRequest, TokenRequestBuilder};

pub mod container;
pub mod cp4d;
pub mod iam;
pub mod iam_assume;
pub mod mcsp;
pub mod mcspv2;
pub mod vpc;

/// The default IAM base URL
pub const DEFAULT_IAM_URL: &str = "https://iam.cloud.ibm.com";

const IAM_TOKEN_PATH: &str = "/identity/token";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Builds the `User-Agent` sent on token requests made on behalf of `component`
pub fn user_agent(component: &str) -> String {
    format!(
        "cloudcore-rust/{}-{} os.name={} os.arch={}",
        component,
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}

/// Resolves the IAM token endpoint from an optional base URL
///
/// A trailing `/` is dropped and `/identity/token` appended unless already present.
pub(crate) fn iam_token_url(url: Option<&str>) -> String {
    let base = url.unwrap_or(DEFAULT_IAM_URL).trim_end_matches('/');
    if base.ends_with(IAM_TOKEN_PATH) {
        base.to_owned()
    } else {
        format!("{base}{IAM_TOKEN_PATH}")
    }
}

/// Joins a base URL and a path without doubling the `/`
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Starts a form-encoded POST to an IAM token endpoint
///
/// User-supplied headers win over the defaults set here.
pub(crate) fn iam_form_request(
    url: &str,
    options: &RequestOptions,
    component: &str,
) -> TokenRequestBuilder {
    TokenRequest::builder(Method::POST, url, options)
        .default_header(header::CONTENT_TYPE, FORM_CONTENT_TYPE)
        .default_header(header::ACCEPT, JSON_CONTENT_TYPE)
        .default_header(header::USER_AGENT, &user_agent(component))
}

/// Starts a JSON request, with user-supplied headers winning over the defaults
pub(crate) fn json_request(
    method: Method,
    url: &str,
    options: &RequestOptions,
    component: &str,
) -> TokenRequestBuilder {
    TokenRequest::builder(method, url, options)
        .default_header(header::CONTENT_TYPE, JSON_CONTENT_TYPE)
        .default_header(header::ACCEPT, JSON_CONTENT_TYPE)
        .default_header(header::USER_AGENT, &user_agent(component))
}

fn form_field(name: &str, value: &str) -> (String, String) {
    (name.to_owned(), value.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iam_url_defaults_and_normalizes() {
        assert_eq!(
            iam_token_url(None),
            "https://iam.cloud.ibm.com/identity/token"
        );
        assert_eq!(
            iam_token_url(Some("https://iam.test.cloud.ibm.com/")),
            "https://iam.test.cloud.ibm.com/identity/token"
        );
        assert_eq!(
            iam_token_url(Some("https://iam.test.cloud.ibm.com/identity/token")),
            "https://iam.test.cloud.ibm.com/identity/token"
        );
    }

    #[test]
    fn user_agent_names_the_component() {
        let ua = user_agent("iam-authenticator");
        assert!(ua.starts_with("cloudcore-rust/iam-authenticator-"));
        assert!(ua.contains(" os.name="));
        assert!(ua.contains(" os.arch="));
    }
}

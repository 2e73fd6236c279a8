//! Constructs authenticators from configuration properties
//!
//! | Property                  | Used by                                         |
//! |---------------------------|-------------------------------------------------|
//! | `AUTH_TYPE` / `AUTHTYPE`  | all; selects the kind, case-insensitively        |
//! | `APIKEY`                  | iam, iamAssume, mcsp, mcspv2, cp4d              |
//! | `AUTH_URL`                | every token-based kind                          |
//! | `AUTH_DISABLE_SSL`        | every token-based kind                          |
//! | `USERNAME`, `PASSWORD`    | basic, cp4d                                     |
//! | `BEARER_TOKEN`            | bearerToken                                     |
//! | `CLIENT_ID`, `CLIENT_SECRET`, `SCOPE` | iam, iamAssume, container           |
//! | `CR_TOKEN_FILENAME`       | container                                       |
//! | `IAM_PROFILE_ID`, `IAM_PROFILE_NAME` | container, iamAssume                 |
//! | `IAM_PROFILE_CRN`         | iamAssume, vpc                                  |
//! | `IAM_ACCOUNT_ID`          | iamAssume                                       |
//! | `SCOPE_COLLECTION_TYPE`, `SCOPE_ID`, `INCLUDE_BUILTIN_ACTIONS`, `INCLUDE_CUSTOM_ACTIONS`, `INCLUDE_ROLES`, `PREFIX_ROLES`, `CALLER_EXT_CLAIM` | mcspv2 |
//!
//! Without an explicit type, `iam` is assumed when `APIKEY` is set and
//! `container` otherwise.

use cloudcore_tokens::{
    sources::{
        container::ContainerConfig, cp4d::Cp4dConfig, iam::IamConfig,
        iam_assume::IamAssumeConfig, mcsp::McspConfig, mcspv2::McspV2Config,
        vpc::VpcInstanceConfig,
    },
    transport::RequestOptions,
    ApiKey, ClientId, ClientSecret, Error, ManagerOptions, Password,
};

use crate::{
    AnyAuthenticator, AuthConfig, AuthType, BasicAuthenticator, BearerTokenAuthenticator,
    ContainerAuthenticator, Cp4dAuthenticator, IamAssumeAuthenticator, IamAuthenticator,
    McspAuthenticator, McspV2Authenticator, NoAuthAuthenticator, VpcInstanceAuthenticator,
};

/// Constructs the authenticator described by `config` using the default transport
#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
pub fn get_authenticator(config: &AuthConfig) -> Result<AnyAuthenticator, Error> {
    get_authenticator_with_options(config, ManagerOptions::default())
}

/// Constructs the authenticator described by the environment variables of
/// `service_name`
///
/// Returns `None` if no variable belongs to the service. See
/// [`AuthConfig::from_env()`].
#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
pub fn get_authenticator_from_environment(
    service_name: &str,
) -> Result<Option<AnyAuthenticator>, Error> {
    let config = AuthConfig::from_env(service_name);
    if config.is_empty() {
        tracing::debug!(service_name, "no authentication properties found in environment");
        return Ok(None);
    }
    get_authenticator(&config).map(Some)
}

/// Determines the kind of authenticator `config` describes
pub fn auth_type(config: &AuthConfig) -> Result<AuthType, Error> {
    match config.get("AUTH_TYPE").or_else(|| config.get("AUTHTYPE")) {
        Some(tag) => tag.parse::<AuthType>().map_err(|e| Error::Config {
            key: "AUTH_TYPE".to_owned(),
            message: e.to_string(),
        }),
        None if config.get("APIKEY").is_some() => Ok(AuthType::Iam),
        None => Ok(AuthType::Container),
    }
}

/// Constructs the authenticator described by `config`, with token managers
/// using the given collaborators
///
/// Missing or invalid credentials are reported by the authenticator being
/// constructed.
#[tracing::instrument(err, skip_all)]
pub fn get_authenticator_with_options(
    config: &AuthConfig,
    options: ManagerOptions,
) -> Result<AnyAuthenticator, Error> {
    let auth_type = auth_type(config)?;
    tracing::debug!(%auth_type, "constructing authenticator");

    let authenticator = match auth_type {
        AuthType::Basic => {
            BasicAuthenticator::from_parts(config.get("USERNAME"), config.get("PASSWORD"))?.into()
        }
        AuthType::BearerToken => {
            BearerTokenAuthenticator::from_parts(config.get("BEARER_TOKEN"))?.into()
        }
        AuthType::NoAuth => NoAuthAuthenticator.into(),
        AuthType::Iam => IamAuthenticator::new_with_options(iam(config)?, options)?.into(),
        AuthType::Container => {
            ContainerAuthenticator::new_with_options(container(config)?, options)?.into()
        }
        AuthType::IamAssume => {
            IamAssumeAuthenticator::new_with_options(iam_assume(config)?, options)?.into()
        }
        AuthType::Mcsp => McspAuthenticator::new_with_options(mcsp(config)?, options)?.into(),
        AuthType::McspV2 => {
            McspV2Authenticator::new_with_options(mcspv2(config)?, options)?.into()
        }
        AuthType::Cp4d => Cp4dAuthenticator::new_with_options(cp4d(config)?, options)?.into(),
        AuthType::Vpc => VpcInstanceAuthenticator::new_with_options(vpc(config)?, options)?.into(),
    };

    Ok(authenticator)
}

fn owned(config: &AuthConfig, key: &str) -> Option<String> {
    config.get(key).map(str::to_owned)
}

fn request_options(config: &AuthConfig) -> Result<RequestOptions, Error> {
    Ok(RequestOptions::default()
        .with_disable_ssl_verification(config.get_bool("AUTH_DISABLE_SSL", false)?))
}

fn apikey(config: &AuthConfig) -> Option<ApiKey> {
    owned(config, "APIKEY").map(ApiKey::new)
}

fn client_id(config: &AuthConfig) -> Option<ClientId> {
    owned(config, "CLIENT_ID").map(ClientId::new)
}

fn client_secret(config: &AuthConfig) -> Option<ClientSecret> {
    owned(config, "CLIENT_SECRET").map(ClientSecret::new)
}

fn iam(config: &AuthConfig) -> Result<IamConfig, Error> {
    Ok(IamConfig {
        apikey: apikey(config),
        url: owned(config, "AUTH_URL"),
        client_id: client_id(config),
        client_secret: client_secret(config),
        scope: owned(config, "SCOPE"),
        options: request_options(config)?,
    })
}

fn container(config: &AuthConfig) -> Result<ContainerConfig, Error> {
    Ok(ContainerConfig {
        cr_token_filename: owned(config, "CR_TOKEN_FILENAME").map(Into::into),
        iam_profile_name: owned(config, "IAM_PROFILE_NAME"),
        iam_profile_id: owned(config, "IAM_PROFILE_ID"),
        url: owned(config, "AUTH_URL"),
        client_id: client_id(config),
        client_secret: client_secret(config),
        scope: owned(config, "SCOPE"),
        options: request_options(config)?,
    })
}

fn iam_assume(config: &AuthConfig) -> Result<IamAssumeConfig, Error> {
    Ok(IamAssumeConfig {
        apikey: apikey(config),
        iam_profile_id: owned(config, "IAM_PROFILE_ID"),
        iam_profile_crn: owned(config, "IAM_PROFILE_CRN"),
        iam_profile_name: owned(config, "IAM_PROFILE_NAME"),
        iam_account_id: owned(config, "IAM_ACCOUNT_ID"),
        url: owned(config, "AUTH_URL"),
        client_id: client_id(config),
        client_secret: client_secret(config),
        scope: owned(config, "SCOPE"),
        options: request_options(config)?,
    })
}

fn mcsp(config: &AuthConfig) -> Result<McspConfig, Error> {
    Ok(McspConfig {
        apikey: apikey(config),
        url: owned(config, "AUTH_URL"),
        options: request_options(config)?,
    })
}

fn mcspv2(config: &AuthConfig) -> Result<McspV2Config, Error> {
    let defaults = McspV2Config::default();
    Ok(McspV2Config {
        apikey: apikey(config),
        url: owned(config, "AUTH_URL"),
        scope_collection_type: owned(config, "SCOPE_COLLECTION_TYPE"),
        scope_id: owned(config, "SCOPE_ID"),
        include_builtin_actions: config
            .get_bool("INCLUDE_BUILTIN_ACTIONS", defaults.include_builtin_actions)?,
        include_custom_actions: config
            .get_bool("INCLUDE_CUSTOM_ACTIONS", defaults.include_custom_actions)?,
        include_roles: config.get_bool("INCLUDE_ROLES", defaults.include_roles)?,
        prefix_roles: config.get_bool("PREFIX_ROLES", defaults.prefix_roles)?,
        caller_ext_claim: config.get_string_map("CALLER_EXT_CLAIM")?,
        options: request_options(config)?,
    })
}

fn cp4d(config: &AuthConfig) -> Result<Cp4dConfig, Error> {
    Ok(Cp4dConfig {
        username: owned(config, "USERNAME"),
        password: owned(config, "PASSWORD").map(Password::new),
        apikey: apikey(config),
        url: owned(config, "AUTH_URL"),
        options: request_options(config)?,
    })
}

fn vpc(config: &AuthConfig) -> Result<VpcInstanceConfig, Error> {
    Ok(VpcInstanceConfig {
        iam_profile_crn: owned(config, "IAM_PROFILE_CRN"),
        iam_profile_id: owned(config, "IAM_PROFILE_ID"),
        url: owned(config, "AUTH_URL"),
        options: request_options(config)?,
    })
}

#[cfg(test)]
mod tests {
    use cloudcore_clock::{ManualClock, UnixTime};
    use cloudcore_tokens::mock::{MockResponse, MockTransport};
    use http::{header::AUTHORIZATION, HeaderMap};

    use super::*;
    use crate::Authenticator;

    fn build(config: &AuthConfig, mock: &MockTransport) -> Result<AnyAuthenticator, Error> {
        let options =
            ManagerOptions::new(mock.shared()).with_clock(ManualClock::new(UnixTime(1_000)));
        get_authenticator_with_options(config, options)
    }

    mod when_the_type_is_inferred {
        use super::*;

        #[test]
        fn an_apikey_implies_iam() {
            let config = AuthConfig::new().with("APIKEY", "abc");
            assert_eq!(auth_type(&config).unwrap(), AuthType::Iam);
        }

        #[test]
        fn no_apikey_implies_container() {
            let config = AuthConfig::new().with("IAM_PROFILE_ID", "iam-id");
            assert_eq!(auth_type(&config).unwrap(), AuthType::Container);
        }

        #[test]
        fn the_legacy_key_is_honoured() {
            let config = AuthConfig::new()
                .with("AUTHTYPE", "BASIC")
                .with("APIKEY", "abc");
            assert_eq!(auth_type(&config).unwrap(), AuthType::Basic);
        }

        #[test]
        fn unknown_types_are_config_errors() {
            let config = AuthConfig::new().with("AUTH_TYPE", "kerberos");
            let err = auth_type(&config).unwrap_err();
            assert!(matches!(err, Error::Config { ref key, .. } if key == "AUTH_TYPE"));
        }
    }

    mod when_building {
        use super::*;

        #[tokio::test]
        async fn basic_credentials_are_read() {
            let config = AuthConfig::new()
                .with("AUTH_TYPE", "basic")
                .with("USERNAME", "user")
                .with("PASSWORD", "pass");
            let auth = build(&config, &MockTransport::new()).unwrap();
            let mut headers = HeaderMap::new();

            auth.authenticate(&mut headers).await.unwrap();

            assert_eq!(headers[AUTHORIZATION], "Basic dXNlcjpwYXNz");
        }

        #[test]
        fn missing_credentials_come_from_the_authenticator() {
            let config = AuthConfig::new().with("AUTH_TYPE", "bearerToken");
            let err = build(&config, &MockTransport::new()).unwrap_err();
            assert_eq!(err.to_string(), "The bearer token shouldn't be None.");
        }

        #[test]
        fn iam_without_an_apikey_is_rejected() {
            let config = AuthConfig::new().with("AUTH_TYPE", "iam");
            let err = build(&config, &MockTransport::new()).unwrap_err();
            assert_eq!(err.to_string(), "The apikey shouldn't be None.");
        }

        #[test]
        fn no_auth_needs_nothing() {
            let config = AuthConfig::new().with("AUTH_TYPE", "noauth");
            let auth = build(&config, &MockTransport::new()).unwrap();
            assert!(matches!(auth, AnyAuthenticator::NoAuth(_)));
        }

        #[tokio::test]
        async fn iam_properties_reach_the_token_request() {
            let mock = MockTransport::new();
            mock.push(MockResponse::token("access_token", 1_000, 4_600));
            let config = AuthConfig::new()
                .with("APIKEY", "abc123")
                .with("AUTH_URL", "https://iam.test.example.com/")
                .with("CLIENT_ID", "bx")
                .with("CLIENT_SECRET", "bx")
                .with("SCOPE", "A B")
                .with("AUTH_DISABLE_SSL", "TRUE");
            let auth = build(&config, &mock).unwrap();

            auth.authenticate(&mut HeaderMap::new()).await.unwrap();

            let req = mock.last_request().unwrap();
            assert_eq!(req.url, "https://iam.test.example.com/identity/token");
            assert_eq!(req.body.form_field("apikey"), Some("abc123"));
            assert_eq!(req.body.form_field("scope"), Some("A B"));
            assert_eq!(req.basic_auth.unwrap().username, "bx");
            assert!(!req.verify_tls);
        }

        #[tokio::test]
        async fn mcspv2_flags_and_claims_are_read() {
            let mock = MockTransport::new();
            mock.push(MockResponse::token("token", 1_000, 4_600));
            let config = AuthConfig::new()
                .with("AUTH_TYPE", "MCSPV2")
                .with("APIKEY", "key")
                .with("AUTH_URL", "https://mcsp.example.com")
                .with("SCOPE_COLLECTION_TYPE", "accounts")
                .with("SCOPE_ID", "123")
                .with("INCLUDE_ROLES", "false")
                .with("CALLER_EXT_CLAIM", r#"{"productID":"p1"}"#);
            let auth = build(&config, &mock).unwrap();
            assert_eq!(auth.authentication_type(), AuthType::McspV2);

            auth.authenticate(&mut HeaderMap::new()).await.unwrap();

            let req = mock.last_request().unwrap();
            assert!(req
                .query
                .contains(&("includeRoles".to_owned(), "false".to_owned())));
            assert_eq!(
                req.body.json(),
                Some(&serde_json::json!({
                    "apikey": "key",
                    "callerExtClaim": { "productID": "p1" },
                }))
            );
        }

        #[test]
        fn malformed_booleans_are_config_errors() {
            let config = AuthConfig::new()
                .with("APIKEY", "abc")
                .with("AUTH_DISABLE_SSL", "sometimes");
            let err = build(&config, &MockTransport::new()).unwrap_err();
            assert!(matches!(err, Error::Config { ref key, .. } if key == "AUTH_DISABLE_SSL"));
        }

        #[test]
        fn vpc_reads_the_profile_selector() {
            let config = AuthConfig::new()
                .with("AUTH_TYPE", "vpc")
                .with("IAM_PROFILE_CRN", "crn:v1:profile");
            let auth = build(&config, &MockTransport::new()).unwrap();
            assert_eq!(auth.authentication_type(), AuthType::Vpc);
        }
    }
}

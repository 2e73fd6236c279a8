//! Unverified decoding of JWT claims for expiry bookkeeping
//!
//! Tokens handed out by the token services are JWTs whose `iat` and `exp`
//! claims tell us when to refresh them. The signature is **not** checked here:
//! the claims are only used to schedule refreshes of a token we obtained
//! ourselves, never to decide whether a caller is authenticated.

use base64::{
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use cloudcore_clock::UnixTime;
use serde::Deserialize;
use thiserror::Error;

const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The claims of a decoded token payload
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct UntrustedClaims {
    /// The `iat` claim
    #[serde(default)]
    pub iat: Option<UnixTime>,
    /// The `exp` claim
    #[serde(default)]
    pub exp: Option<UnixTime>,
    /// Every other claim in the payload
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The token does not have the shape of a JWT
#[derive(Debug, Error)]
pub enum MalformedJwt {
    /// The token is not made of three `.`-separated sections
    #[error("malformed JWT")]
    Sections,
    /// The payload section is not valid base64url
    #[error("malformed JWT payload encoding")]
    Encoding(#[from] base64::DecodeError),
    /// The payload section is not a JSON object with numeric `iat`/`exp`
    #[error("malformed JWT payload")]
    Payload(#[from] serde_json::Error),
}

/// Decodes the payload of `token` without verifying its signature
pub fn decode_untrusted(token: &str) -> Result<UntrustedClaims, MalformedJwt> {
    let mut sections = token.split('.');
    let payload = match (sections.next(), sections.next(), sections.next(), sections.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(MalformedJwt::Sections),
    };

    let raw = LENIENT_URL_SAFE.decode(payload)?;
    Ok(serde_json::from_slice(&raw)?)
}

use cloudcore_clock::{Clock, DurationSecs, System, UnixTime};
use serde_json::{Map, Value};

use crate::{jwt, AccessToken, AccessTokenRef, Error, RefreshToken, RefreshTokenRef};

/// A token as returned by a token service, before its lifetime is known
#[derive(Clone, Debug)]
pub struct TokenResponse {
    access_token: AccessToken,
    refresh_token: Option<RefreshToken>,
}

impl TokenResponse {
    /// Constructs a response from an access token
    pub fn new(access_token: AccessToken) -> Self {
        Self {
            access_token,
            refresh_token: None,
        }
    }

    /// Attaches a refresh token to the response
    pub fn with_refresh_token(mut self, refresh_token: Option<RefreshToken>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    /// Parses a JSON response body, taking the token from `field`
    ///
    /// A `refresh_token` string is retained when present.
    pub fn from_json(body: &[u8], field: &'static str) -> Result<Self, Error> {
        let mut json: Map<String, Value> = serde_json::from_slice(body)?;

        let access_token = match json.remove(field) {
            Some(Value::String(token)) => AccessToken::new(token),
            _ => return Err(Error::MissingToken { field }),
        };

        let refresh_token = match json.remove("refresh_token") {
            Some(Value::String(token)) => Some(RefreshToken::new(token)),
            _ => None,
        };

        Ok(Self {
            access_token,
            refresh_token,
        })
    }

    /// The access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// The refresh token, if the service provided one
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// Drops any refresh token carried by the response
    pub fn discard_refresh_token(&mut self) {
        self.refresh_token = None;
    }
}

/// The instants that govern a managed token's lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenWindow {
    issued: UnixTime,
    refresh_at: UnixTime,
    expiry: UnixTime,
}

impl TokenWindow {
    /// The time the token was issued (`iat`)
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// The time after which a refresh should be started
    #[inline]
    pub fn refresh_at(&self) -> UnixTime {
        self.refresh_at
    }

    /// The time the token expires (`exp`)
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// The token's total time to live
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.expiry - self.issued
    }
}

/// A token held by a token manager
///
/// Replaced wholesale on every successful fetch and never mutated in place.
#[derive(Clone, Debug)]
pub struct CachedToken {
    access_token: AccessToken,
    refresh_token: Option<RefreshToken>,
    window: Option<TokenWindow>,
    extra_claims: Map<String, Value>,
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and not yet due for a refresh
    Fresh,
    /// The token is valid, but a refresh should be started
    NeedsRefresh,
    /// The token is no longer valid and must not be used
    Expired,
}

impl CachedToken {
    /// A token whose lifetime is not tracked
    ///
    /// Unmanaged tokens are always considered fresh; whoever supplied the token
    /// is responsible for replacing it before it expires.
    pub fn unmanaged(access_token: AccessToken) -> Self {
        Self {
            access_token,
            refresh_token: None,
            window: None,
            extra_claims: Map::new(),
        }
    }

    /// Gets the current access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the refresh token, if one was retained
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// Gets the lifecycle window, or `None` for unmanaged tokens
    #[inline]
    pub fn window(&self) -> Option<TokenWindow> {
        self.window
    }

    /// Whether the token's lifetime is tracked
    #[inline]
    pub fn is_managed(&self) -> bool {
        self.window.is_some()
    }

    /// Claims from the token payload other than `iat` and `exp`
    #[inline]
    pub fn extra_claims(&self) -> &Map<String, Value> {
        &self.extra_claims
    }

    /// Gets the token's current lifecycle status
    #[inline]
    pub fn token_status(&self) -> TokenStatus {
        self.token_status_with_clock(&System)
    }

    /// Gets the token's lifecycle status based on the current time
    /// as reported by the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock + ?Sized>(&self, clock: &C) -> TokenStatus {
        self.token_status_at(clock.now())
    }

    /// Gets the token's lifecycle status as of the provided time
    #[inline]
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        match self.window {
            None => TokenStatus::Fresh,
            Some(w) => status_at(time, w.refresh_at, w.expiry),
        }
    }
}

pub(crate) fn status_at(time: UnixTime, refresh_at: UnixTime, expiry: UnixTime) -> TokenStatus {
    if time >= expiry {
        TokenStatus::Expired
    } else if time >= refresh_at {
        TokenStatus::NeedsRefresh
    } else {
        TokenStatus::Fresh
    }
}

/// Configuration for deciding when a token should be refreshed
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TokenLifetimeConfig {
    refresh_fraction: f64,
}

impl Default for TokenLifetimeConfig {
    /// Refreshes once 80% of the token's lifetime has elapsed
    fn default() -> Self {
        Self {
            refresh_fraction: 0.2,
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration
    ///
    /// A token will need refreshing once only `refresh_fraction` of its
    /// lifetime remains. The fraction is clamped into `[0, 1]`.
    pub fn new(refresh_fraction: f64) -> Self {
        Self {
            refresh_fraction: refresh_fraction.clamp(0.0, 1.0),
        }
    }

    /// The fraction of the lifetime remaining when a refresh is due
    #[inline]
    pub fn refresh_fraction(&self) -> f64 {
        self.refresh_fraction
    }

    /// Computes the lifecycle window from a token's `iat` and `exp` claims
    ///
    /// The remaining lifetime at which a refresh is due is rounded up to a
    /// whole second, so `refresh_at` may fall up to one second before
    /// `exp - refresh_fraction * (exp - iat)`.
    pub fn window(&self, issued: UnixTime, expiry: UnixTime) -> TokenWindow {
        let lifetime = expiry - issued;
        TokenWindow {
            issued,
            refresh_at: expiry - lifetime * self.refresh_fraction,
            expiry,
        }
    }

    /// Builds a cached token, deriving its lifetime from the JWT claims
    ///
    /// Tokens that are not JWTs, or that lack `iat`/`exp`, become unmanaged
    /// tokens that are always considered fresh.
    pub fn create_token(&self, response: TokenResponse) -> CachedToken {
        let TokenResponse {
            access_token,
            refresh_token,
        } = response;

        let (window, extra_claims) = match jwt::decode_untrusted(access_token.as_str()) {
            Ok(jwt::UntrustedClaims {
                iat: Some(iat),
                exp: Some(exp),
                extra,
            }) => (Some(self.window(iat, exp)), extra),
            Ok(claims) => {
                tracing::warn!(
                    has_iat = claims.iat.is_some(),
                    has_exp = claims.exp.is_some(),
                    "token lacks timing claims, its lifetime will not be tracked"
                );
                (None, claims.extra)
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn std::error::Error),
                    "unable to decode token, its lifetime will not be tracked"
                );
                (None, Map::new())
            }
        };

        CachedToken {
            access_token,
            refresh_token,
            window,
            extra_claims,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::jwt_with;

    #[test]
    fn refresh_is_due_with_a_fifth_of_the_lifetime_left() {
        let w = TokenLifetimeConfig::default().window(UnixTime(1_000), UnixTime(4_600));
        assert_eq!(w.refresh_at(), UnixTime(4_600 - 720));
        assert_eq!(w.lifetime(), DurationSecs(3_600));
    }

    #[test]
    fn fractional_refresh_margins_round_up() {
        let w = TokenLifetimeConfig::default().window(UnixTime(1_000), UnixTime(2_001));
        assert_eq!(w.refresh_at(), UnixTime(2_001 - 201));
    }

    #[test]
    fn refresh_precedes_expiry_for_short_lifetimes() {
        let config = TokenLifetimeConfig::default();
        for ttl in 1..50 {
            let w = config.window(UnixTime(100), UnixTime(100 + ttl));
            assert!(w.refresh_at() < w.expiry(), "ttl {ttl}");
        }
    }

    #[test]
    fn status_transitions_follow_the_window() {
        let token = TokenLifetimeConfig::default().create_token(TokenResponse::new(
            AccessToken::new(jwt_with(1_000, 2_000)),
        ));

        assert_eq!(token.token_status_at(UnixTime(1_000)), TokenStatus::Fresh);
        assert_eq!(token.token_status_at(UnixTime(1_799)), TokenStatus::Fresh);
        assert_eq!(
            token.token_status_at(UnixTime(1_800)),
            TokenStatus::NeedsRefresh
        );
        assert_eq!(
            token.token_status_at(UnixTime(1_999)),
            TokenStatus::NeedsRefresh
        );
        assert_eq!(token.token_status_at(UnixTime(2_000)), TokenStatus::Expired);
    }

    #[test]
    fn opaque_tokens_are_unmanaged() {
        let token = TokenLifetimeConfig::default()
            .create_token(TokenResponse::new(AccessToken::from_static("opaque")));
        assert!(!token.is_managed());
        assert_eq!(token.token_status_at(UnixTime::MAX), TokenStatus::Fresh);
    }

    #[test]
    fn response_parsing_keeps_refresh_token() {
        let body = br#"{"access_token":"abc","refresh_token":"def","expires_in":3600}"#;
        let response = TokenResponse::from_json(body, "access_token").unwrap();
        assert_eq!(response.access_token().as_str(), "abc");
        assert_eq!(response.refresh_token().map(|r| r.as_str()), Some("def"));
    }

    #[test]
    fn response_without_token_field_is_an_error() {
        let body = br#"{"accessToken":"abc"}"#;
        let err = TokenResponse::from_json(body, "token").unwrap_err();
        assert!(matches!(err, Error::MissingToken { field: "token" }));
    }
}

use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// An API key used to obtain tokens from IAM or MCSP
#[braid(serde, debug = "owned", display = "owned")]
pub struct ApiKey;

limited_reveal!(ApiKeyRef: "API KEY", 5);

/// A client ID used for HTTP basic authentication against the token service
#[braid(serde)]
pub struct ClientId;

/// A client secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

limited_reveal!(ClientSecretRef: "CLIENT SECRET", 5);

/// A password
#[braid(serde, debug = "owned", display = "owned")]
pub struct Password;

limited_reveal!(PasswordRef: "PASSWORD", 0);

/// An access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_hidden_by_default() {
        let key = ApiKey::from_static("abc123-very-secret");
        assert_eq!(format!("{}", key), "***API KEY***");
        assert_eq!(format!("{:?}", key), "***API KEY***");
    }

    #[test]
    fn alternate_debug_reveals_a_prefix() {
        let token = AccessToken::from_static("eyJhbGciOiJub25lIn0.payload.sig");
        assert_eq!(format!("{:#?}", token), "\"eyJhbGciOiJub2…\"");
    }

    #[test]
    fn alternate_display_reveals_everything() {
        let secret = ClientSecret::from_static("hunter2");
        assert_eq!(format!("{:#}", secret), "hunter2");
    }

    #[test]
    fn client_id_is_not_secret() {
        let id = ClientId::from_static("my-client");
        assert_eq!(id.to_string(), "my-client");
    }
}

//! Construction-time checks shared by every token manager and authenticator

use crate::error::ValidationError;

/// Whether a credential string looks like an unresolved template placeholder
///
/// Values must not start or end with `{`, `}` or `"`.
pub fn has_bad_first_or_last_char(value: &str) -> bool {
    value.starts_with(['{', '"']) || value.ends_with(['}', '"'])
}

/// Requires that `value` is present and is not a placeholder
pub fn required<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str, ValidationError> {
    let value = value.ok_or_else(|| ValidationError::new(format!("The {name} shouldn't be None.")))?;
    not_placeholder(name, value)?;
    Ok(value)
}

/// Rejects `value` if it looks like a placeholder
pub fn not_placeholder(name: &str, value: &str) -> Result<(), ValidationError> {
    if has_bad_first_or_last_char(value) {
        Err(ValidationError::new(format!(
            "The {name} shouldn't start or end with curly brackets or quotes. \
             Please remove any surrounding {{, }}, or \" characters."
        )))
    } else {
        Ok(())
    }
}

/// Rejects an optional value only when it is present and looks like a placeholder
pub fn optional(name: &str, value: Option<&str>) -> Result<(), ValidationError> {
    value.map_or(Ok(()), |v| not_placeholder(name, v))
}

/// Requires that a client id and secret are either both set or both absent
pub fn client_credentials_pair(
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Result<(), ValidationError> {
    match (client_id, client_secret) {
        (Some(_), None) | (None, Some(_)) => Err(ValidationError::new(
            "Both client_id and client_secret should be initialized.",
        )),
        _ => Ok(()),
    }
}

/// Counts how many of the given values are present and non-empty
pub fn count_present(values: &[Option<&str>]) -> usize {
    values
        .iter()
        .filter(|v| v.is_some_and(|s| !s.is_empty()))
        .count()
}

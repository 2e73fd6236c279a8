//! A flat bag of configuration properties describing an authenticator

use std::collections::{btree_map, BTreeMap};

use cloudcore_tokens::Error;

/// Configuration properties keyed by uppercase names such as `AUTH_TYPE` or
/// `APIKEY`
///
/// Empty values are treated as absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthConfig {
    properties: BTreeMap<String, String>,
}

impl AuthConfig {
    /// An empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the properties of a service from the process environment
    ///
    /// See [`from_vars()`][Self::from_vars()].
    pub fn from_env(service_name: &str) -> Self {
        Self::from_vars(service_name, std::env::vars())
    }

    /// Collects the properties of a service from `NAME=value` pairs
    ///
    /// A variable belongs to the service if its name starts with the service
    /// name, uppercased with `-` replaced by `_`, followed by `_`. The prefix is
    /// stripped, so `MY_SERVICE_APIKEY` becomes the `APIKEY` property of
    /// `my-service`.
    pub fn from_vars<I, K, V>(service_name: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let prefix = format!("{}_", service_name.to_uppercase().replace('-', "_"));
        vars.into_iter()
            .filter_map(|(name, value)| {
                name.as_ref()
                    .strip_prefix(&prefix)
                    .filter(|key| !key.is_empty())
                    .map(|key| (key.to_owned(), value.into()))
            })
            .collect()
    }

    /// Adds a property, replacing any previous value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets a property, replacing any previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Whether no property has a value
    pub fn is_empty(&self) -> bool {
        self.properties.values().all(String::is_empty)
    }

    /// The value of a property, if set and not empty
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Interprets a property as a case-insensitive `true` or `false`
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, Error> {
        match self.get(key) {
            None => Ok(default),
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
            Some(v) => Err(Error::Config {
                key: key.to_owned(),
                message: format!("expected `true` or `false`, found `{v}`"),
            }),
        }
    }

    /// Interprets a property as a JSON object of string values
    pub fn get_string_map(&self, key: &str) -> Result<Option<BTreeMap<String, String>>, Error> {
        self.get(key)
            .map(|v| {
                serde_json::from_str(v).map_err(|e| Error::Config {
                    key: key.to_owned(),
                    message: format!("expected a JSON object of strings: {e}"),
                })
            })
            .transpose()
    }

    /// Iterates over every property
    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.properties.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AuthConfig {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            properties: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for AuthConfig {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        self.properties
            .extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}

impl<'a> IntoIterator for &'a AuthConfig {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

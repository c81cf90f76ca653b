//! Declared configuration surface and option resolution.
//!
//! A driver publishes the options it understands as [`Flag`]s; the host
//! framework hands the user's values back as [`DriverOptions`]. Resolution
//! order for a flag is: explicit value, then its environment variable,
//! then the declared default.

use std::collections::HashMap;

/// One configuration option a driver declares to the host framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    /// Option name as the framework's CLI exposes it (e.g. `hcloud-token`).
    pub name: &'static str,
    /// Environment variable consulted when no explicit value is given.
    pub env_var: &'static str,
    /// Help text.
    pub usage: &'static str,
    /// Default applied when neither an explicit value nor the environment
    /// provides one. `None` means the option stays unset.
    pub default: Option<&'static str>,
}

/// Named string options supplied by the host framework for `configure`.
#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    values: HashMap<String, String>,
}

impl DriverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Builder-style `set`, convenient in tests and embedding code.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Raw explicit value, without env or default fallback.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Resolve a flag to its effective value.
    pub fn resolve(&self, flag: &Flag) -> Option<String> {
        if let Some(value) = self.get(flag.name) {
            return Some(value.to_string());
        }
        if let Ok(value) = std::env::var(flag.env_var) {
            return Some(value);
        }
        flag.default.map(str::to_string)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DriverOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

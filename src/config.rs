//! Runtime configuration
//!
//! Defaults match the built-in limit policy; every value can be overridden through
//! `CHATBI_*` environment variables (a `.env` file is loaded first when present).

use crate::error::{ChatBiError, Result};
use crate::intent_validator::{LimitPolicy, DEFAULT_LIMIT, MAX_LIMIT};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const ENV_DEFAULT_LIMIT: &str = "CHATBI_DEFAULT_LIMIT";
pub const ENV_MAX_LIMIT: &str = "CHATBI_MAX_LIMIT";
pub const ENV_EXPOSE_DEBUG: &str = "CHATBI_EXPOSE_DEBUG";
pub const ENV_MAX_ROWS: &str = "CHATBI_MAX_ROWS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatBiConfig {
    /// Limit used when a plan has none
    pub default_limit: u32,
    /// Hard cap on any plan's limit
    pub max_limit: u32,
    /// Show compiled SQL and guarded plan to admins
    pub expose_debug_to_admin: bool,
    /// Rows kept in an answer
    pub max_rows_rendered: usize,
}

impl Default for ChatBiConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
            expose_debug_to_admin: true,
            max_rows_rendered: 1000,
        }
    }
}

impl ChatBiConfig {
    /// Load `.env`, then read overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; missing keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            default_limit: parse_var(&lookup, ENV_DEFAULT_LIMIT)?.unwrap_or(defaults.default_limit),
            max_limit: parse_var(&lookup, ENV_MAX_LIMIT)?.unwrap_or(defaults.max_limit),
            expose_debug_to_admin: match lookup(ENV_EXPOSE_DEBUG) {
                Some(raw) => parse_bool(ENV_EXPOSE_DEBUG, &raw)?,
                None => defaults.expose_debug_to_admin,
            },
            max_rows_rendered: parse_var(&lookup, ENV_MAX_ROWS)?.unwrap_or(defaults.max_rows_rendered),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_limit == 0 {
            return Err(ChatBiError::Config(format!("{} must be positive", ENV_MAX_LIMIT)));
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(ChatBiError::Config(format!(
                "{} must be between 1 and {} ({}), got {}",
                ENV_DEFAULT_LIMIT, ENV_MAX_LIMIT, self.max_limit, self.default_limit
            )));
        }
        Ok(())
    }

    pub fn limit_policy(&self) -> LimitPolicy {
        LimitPolicy {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ChatBiError::Config(format!("{} is not a valid number: '{}'", key, raw))),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ChatBiError::Config(format!("{} is not a valid boolean: '{}'", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ChatBiConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ChatBiConfig::default());
        assert_eq!(config.limit_policy(), LimitPolicy::default());
    }

    #[test]
    fn test_overrides() {
        let config = ChatBiConfig::from_lookup(lookup(&[
            (ENV_DEFAULT_LIMIT, "20"),
            (ENV_MAX_LIMIT, " 100 "),
            (ENV_EXPOSE_DEBUG, "off"),
            (ENV_MAX_ROWS, "5"),
        ]))
        .unwrap();
        assert_eq!(config.default_limit, 20);
        assert_eq!(config.max_limit, 100);
        assert!(!config.expose_debug_to_admin);
        assert_eq!(config.max_rows_rendered, 5);
    }

    #[test]
    fn test_malformed_values() {
        for pairs in [
            vec![(ENV_DEFAULT_LIMIT, "lots")],
            vec![(ENV_EXPOSE_DEBUG, "maybe")],
            vec![(ENV_DEFAULT_LIMIT, "300")],
            vec![(ENV_DEFAULT_LIMIT, "0")],
            vec![(ENV_MAX_LIMIT, "-1")],
        ] {
            let err = ChatBiConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(matches!(err, ChatBiError::Config(_)), "{:?}", pairs);
        }
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ChatBiConfig = serde_json::from_str(r#"{"max_limit": 500}"#).unwrap();
        assert_eq!(config.max_limit, 500);
        assert_eq!(config.default_limit, 50);
    }
}

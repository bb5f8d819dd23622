use crate::error::{MongoliteError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What happens when a hook callback fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookFailurePolicy {
    /// Record the failure as a warning and carry on with the operation.
    #[default]
    Warn,
    /// Fail the operation.
    Abort,
}

impl FromStr for HookFailurePolicy {
    type Err = MongoliteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(HookFailurePolicy::Warn),
            "abort" => Ok(HookFailurePolicy::Abort),
            other => Err(MongoliteError::Config(format!(
                "Unknown hook failure policy '{other}' (expected 'warn' or 'abort')"
            ))),
        }
    }
}

impl fmt::Display for HookFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookFailurePolicy::Warn => f.write_str("warn"),
            HookFailurePolicy::Abort => f.write_str("abort"),
        }
    }
}

/// Settings for a `Database` handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub name: String,
    pub hook_failure: HookFailurePolicy,
    /// Validate `$set` payloads of updates against the collection schema.
    pub validate_updates: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            name: "default".to_string(),
            hook_failure: HookFailurePolicy::Warn,
            validate_updates: true,
        }
    }
}

impl DatabaseConfig {
    pub const ENV_DATABASE: &'static str = "MONGOLITE_DATABASE";
    pub const ENV_HOOK_FAILURE: &'static str = "MONGOLITE_HOOK_FAILURE";
    pub const ENV_VALIDATE_UPDATES: &'static str = "MONGOLITE_VALIDATE_UPDATES";

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: DatabaseConfig = serde_yaml::from_str(yaml)?;
        if config.name.trim().is_empty() {
            return Err(MongoliteError::Config("Database name cannot be empty".into()));
        }
        Ok(config)
    }

    /// Defaults overridden by whichever `MONGOLITE_*` variables are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = DatabaseConfig::default();

        if let Some(name) = lookup(Self::ENV_DATABASE) {
            if !name.trim().is_empty() {
                config.name = name;
            }
        }
        if let Some(policy) = lookup(Self::ENV_HOOK_FAILURE) {
            config.hook_failure = policy.parse()?;
        }
        if let Some(flag) = lookup(Self::ENV_VALIDATE_UPDATES) {
            config.validate_updates = parse_bool(Self::ENV_VALIDATE_UPDATES, &flag)?;
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(MongoliteError::Config(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}

//! Retainer Configuration Module
//!
//! This module provides the configuration shared by the object registry and
//! every thread context created from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Environment variable consulted by [`LifetimeConfig::load_default`].
pub const CONFIG_PATH_ENV: &str = "RETAINER_CONFIG";

/// Default file name used when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "retainer.toml";

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading a [`LifetimeConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML or has unknown keys.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value was syntactically valid but not accepted.
    #[error("Invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },
}

/// What happens when a caller breaks the ownership discipline
/// (double release, use after release, missing or dangling pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MisusePolicy {
    /// Log the violation and panic. Release builds abort on panic.
    #[default]
    Abort,
    /// Log the violation and hand it back to the caller as an error.
    Report,
}

impl MisusePolicy {
    /// Returns `true` when violations terminate the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MisusePolicy::Abort)
    }
}

impl fmt::Display for MisusePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MisusePolicy::Abort => write!(f, "abort"),
            MisusePolicy::Report => write!(f, "report"),
        }
    }
}

impl FromStr for MisusePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" | "fatal" | "panic" => Ok(MisusePolicy::Abort),
            "report" | "error" => Ok(MisusePolicy::Report),
            _ => Err(ConfigError::InvalidValue {
                key: "misuse_policy".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Lifetime manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifetimeConfig {
    /// Policy applied to ownership violations.
    pub misuse_policy: MisusePolicy,
    /// Warn when a destroy call also sweeps pools pushed above the target.
    pub warn_on_cascade: bool,
    /// Sweep pools still pushed when a thread context is dropped.
    pub drain_on_drop: bool,
    /// Emit a trace record for every finalized object.
    pub trace_finalization: bool,
}

impl Default for LifetimeConfig {
    fn default() -> Self {
        Self {
            misuse_policy: MisusePolicy::Abort,
            warn_on_cascade: true,
            drain_on_drop: true,
            trace_finalization: false,
        }
    }
}

impl LifetimeConfig {
    /// Configuration that reports violations as errors instead of aborting.
    pub fn reporting() -> Self {
        Self {
            misuse_policy: MisusePolicy::Report,
            ..Self::default()
        }
    }

    /// Parses a configuration from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads a configuration file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Loads from `$RETAINER_CONFIG`, then `./retainer.toml`, falling back to defaults.
    pub fn load_default() -> ConfigResult<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::load(path);
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load(local);
        }

        Ok(Self::default())
    }

    /// Renders the configuration back to TOML.
    pub fn to_toml_string(&self) -> String {
        // Every field is a plain scalar, serialization cannot fail.
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

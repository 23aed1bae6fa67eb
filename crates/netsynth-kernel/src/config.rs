//! Resolver configuration
//!
//! Loaded from TOML or JSON depending on the file extension; every field has
//! a default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// TOML syntax or schema error
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON syntax or schema error
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// Value out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Knobs of a resolution batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Run the merge solver after instantiation
    pub merge_after_resolution: bool,
    /// Upper bound on merge solver passes
    pub max_merge_passes: usize,
    /// Maximum composite nesting depth
    pub max_depth: usize,
    /// Run the plan invariant checker before committing
    pub check_invariants: bool,
    /// Keep the concrete connection cache enabled after the batch
    pub authoritative_concrete_cache: bool,
}

impl ResolverConfig {
    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With merging on or off
    #[inline]
    #[must_use]
    pub fn with_merge(mut self, merge: bool) -> Self {
        self.merge_after_resolution = merge;
        self
    }

    /// With a merge pass bound
    #[inline]
    #[must_use]
    pub fn with_max_merge_passes(mut self, passes: usize) -> Self {
        self.max_merge_passes = passes;
        self
    }

    /// With a nesting bound
    #[inline]
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// With invariant checking on or off
    #[inline]
    #[must_use]
    pub fn with_invariant_checks(mut self, check: bool) -> Self {
        self.check_invariants = check;
        self
    }

    /// With the concrete cache left authoritative after the batch
    #[inline]
    #[must_use]
    pub fn with_authoritative_cache(mut self, authoritative: bool) -> Self {
        self.authoritative_concrete_cache = authoritative;
        self
    }

    /// Load from a `.toml` or `.json` file
    ///
    /// # Errors
    /// I/O, parse and range errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text)?,
            _ => Self::from_toml(&text)?,
        };
        Ok(config)
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// Parse and range errors.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse JSON text
    ///
    /// # Errors
    /// Parse and range errors.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] when a bound is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid("max_depth must be at least 1".to_string()));
        }
        if self.merge_after_resolution && self.max_merge_passes == 0 {
            return Err(ConfigError::Invalid(
                "max_merge_passes must be at least 1 when merging".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            merge_after_resolution: true,
            max_merge_passes: 16,
            max_depth: 32,
            check_invariants: true,
            authoritative_concrete_cache: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ResolverConfig::from_toml("max_depth = 4\n").unwrap();
        assert_eq!(config.max_depth, 4);
        assert!(config.merge_after_resolution);
        assert_eq!(config.max_merge_passes, 16);
    }

    #[test]
    fn json_is_accepted() {
        let config =
            ResolverConfig::from_json(r#"{"merge_after_resolution": false, "max_depth": 8}"#).unwrap();
        assert!(!config.merge_after_resolution);
        assert_eq!(config.max_depth, 8);
    }

    #[test]
    fn zero_depth_is_rejected() {
        assert!(matches!(
            ResolverConfig::from_toml("max_depth = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn toml_round_trips_through_serialize() {
        let config = ResolverConfig::new().with_max_merge_passes(3).with_authoritative_cache(true);
        let text = toml::to_string(&config).unwrap();
        assert_eq!(ResolverConfig::from_toml(&text).unwrap(), config);
    }
}

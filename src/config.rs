use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{DbError, Result};

/// Upgrade tuning knobs
///
/// Every field has a default, so a JSON config only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Minimum shared/new field ratio for an unmatched type pair to count as a rename candidate
    pub rename_overlap_threshold: f64,

    /// Minimum number of identical fields a rename candidate must share
    pub rename_min_shared_fields: usize,

    /// Break rename cycles (A <-> B) through temporary names
    pub allow_intermediate_renames: bool,

    /// Rows copied per chunk by data-copy operations
    pub copy_chunk_size: usize,

    /// Worker threads for independent data-copy operations
    pub copy_workers: usize,

    /// Relative tolerance for float32 comparisons during verification
    pub float32_epsilon: f64,

    /// Relative tolerance for float64 comparisons during verification
    pub float64_epsilon: f64,

    /// Rows sampled per tracked type for verification
    pub verify_sample_size: usize,
}

impl UpgradeConfig {
    pub fn new() -> Self {
        Self {
            rename_overlap_threshold: 0.75,
            rename_min_shared_fields: 2,
            allow_intermediate_renames: false,
            copy_chunk_size: 1024,
            copy_workers: 4,
            float32_epsilon: 1e-6,
            float64_epsilon: 1e-12,
            verify_sample_size: 1,
        }
    }

    /// Set the rename overlap threshold
    pub fn rename_overlap_threshold(mut self, threshold: f64) -> Self {
        self.rename_overlap_threshold = threshold;
        self
    }

    pub fn rename_min_shared_fields(mut self, fields: usize) -> Self {
        self.rename_min_shared_fields = fields;
        self
    }

    /// Allow temporary names to break rename cycles
    pub fn allow_intermediate_renames(mut self, allow: bool) -> Self {
        self.allow_intermediate_renames = allow;
        self
    }

    pub fn copy_chunk_size(mut self, rows: usize) -> Self {
        self.copy_chunk_size = rows;
        self
    }

    pub fn copy_workers(mut self, workers: usize) -> Self {
        self.copy_workers = workers;
        self
    }

    pub fn float_epsilons(mut self, float32: f64, float64: f64) -> Self {
        self.float32_epsilon = float32;
        self.float64_epsilon = float64;
        self
    }

    pub fn verify_sample_size(mut self, rows: usize) -> Self {
        self.verify_sample_size = rows;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.rename_overlap_threshold > 0.0 && self.rename_overlap_threshold <= 1.0) {
            return Err(DbError::InvalidConfig(
                "rename_overlap_threshold must be in (0, 1]".to_string(),
            ));
        }

        if self.rename_min_shared_fields == 0 {
            return Err(DbError::InvalidConfig(
                "rename_min_shared_fields must be > 0".to_string(),
            ));
        }

        if self.copy_chunk_size == 0 {
            return Err(DbError::InvalidConfig("copy_chunk_size must be > 0".to_string()));
        }

        if self.copy_workers == 0 {
            return Err(DbError::InvalidConfig("copy_workers must be > 0".to_string()));
        }

        for (name, epsilon) in [
            ("float32_epsilon", self.float32_epsilon),
            ("float64_epsilon", self.float64_epsilon),
        ] {
            if !(epsilon.is_finite() && epsilon >= 0.0) {
                return Err(DbError::InvalidConfig(format!("{} must be a non-negative number", name)));
            }
        }

        Ok(())
    }
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UpgradeConfig::default();
        assert_eq!(config.rename_overlap_threshold, 0.75);
        assert_eq!(config.rename_min_shared_fields, 2);
        assert!(!config.allow_intermediate_renames);
        assert_eq!(config.verify_sample_size, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = UpgradeConfig::new()
            .allow_intermediate_renames(true)
            .copy_chunk_size(16)
            .copy_workers(2)
            .verify_sample_size(10);

        assert!(config.allow_intermediate_renames);
        assert_eq!(config.copy_chunk_size, 16);
        assert_eq!(config.copy_workers, 2);
        assert_eq!(config.verify_sample_size, 10);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = UpgradeConfig::from_json(r#"{ "copy_workers": 8 }"#).unwrap();
        assert_eq!(config.copy_workers, 8);
        assert_eq!(config.copy_chunk_size, 1024);
    }

    #[test]
    fn test_validate() {
        assert!(UpgradeConfig::new().copy_workers(0).validate().is_err());
        assert!(UpgradeConfig::new().rename_overlap_threshold(1.5).validate().is_err());
        assert!(UpgradeConfig::new().float_epsilons(-1.0, 0.0).validate().is_err());
        assert!(matches!(
            UpgradeConfig::from_json(r#"{ "copy_chunk_size": 0 }"#),
            Err(DbError::InvalidConfig(_))
        ));
    }
}

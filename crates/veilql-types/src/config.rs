//! The anonymization parameter bundle.

use serde::{Deserialize, Serialize};
use veilql_error::{Result, VeilError};

/// Validated anonymization parameters.
///
/// Constructed by the host (typically deserialized from its own
/// configuration layer) and checked once via [`AnonConfig::validate`];
/// engine handles refuse to exist around an invalid bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonConfig {
    /// Operator-provided secret mixed into every noise seed. Required.
    pub salt: String,
    /// Standard deviation factor of the per-layer aggregate noise.
    pub noise_layer_sd: f64,
    /// Hard minimum of distinct AID values a reported bucket may carry.
    pub low_count_min_threshold: i64,
    /// Mean gap, in units of `low_count_layer_sd`, between the hard minimum
    /// and the noisy suppression threshold.
    pub low_count_mean_gap: f64,
    /// Standard deviation of the suppression threshold noise.
    pub low_count_layer_sd: f64,
    /// Minimum outlier band size (inclusive).
    pub outlier_count_min: i64,
    /// Maximum outlier band size (inclusive).
    pub outlier_count_max: i64,
    /// Minimum top band size (inclusive).
    pub top_count_min: i64,
    /// Maximum top band size (inclusive).
    pub top_count_max: i64,
    /// When false, the post-processor skips the suppress bucket entirely.
    pub compute_suppress_bin: bool,
    /// Marker placed in text-typed label columns of the suppress bucket;
    /// `None` leaves them NULL.
    pub text_label_for_suppress_bin: Option<String>,
}

impl Default for AnonConfig {
    fn default() -> Self {
        Self {
            salt: String::new(),
            noise_layer_sd: 1.0,
            low_count_min_threshold: 2,
            low_count_mean_gap: 2.0,
            low_count_layer_sd: 1.0,
            outlier_count_min: 1,
            outlier_count_max: 2,
            top_count_min: 4,
            top_count_max: 6,
            compute_suppress_bin: true,
            text_label_for_suppress_bin: Some("*".into()),
        }
    }
}

impl AnonConfig {
    /// Default parameters with the given salt.
    #[must_use]
    pub fn with_salt(salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            ..Self::default()
        }
    }

    /// Checks every range and cross-parameter constraint.
    pub fn validate(&self) -> Result<()> {
        if self.salt.is_empty() {
            return Err(VeilError::config("salt", "must not be empty"));
        }
        if !(self.noise_layer_sd >= 0.0) {
            return Err(VeilError::config("noise_layer_sd", "must be >= 0"));
        }
        if self.low_count_min_threshold < 2 {
            return Err(VeilError::config("low_count_min_threshold", "must be >= 2"));
        }
        if !(self.low_count_mean_gap >= 0.0) {
            return Err(VeilError::config("low_count_mean_gap", "must be >= 0"));
        }
        if !(self.low_count_layer_sd >= 0.0) {
            return Err(VeilError::config("low_count_layer_sd", "must be >= 0"));
        }
        if self.outlier_count_min < 0 {
            return Err(VeilError::config("outlier_count_min", "must be >= 0"));
        }
        if self.outlier_count_max < self.outlier_count_min {
            return Err(VeilError::config(
                "outlier_count_max",
                "must be >= outlier_count_min",
            ));
        }
        if self.top_count_min < 1 {
            return Err(VeilError::config("top_count_min", "must be >= 1"));
        }
        if self.top_count_max < self.top_count_min {
            return Err(VeilError::config("top_count_max", "must be >= top_count_min"));
        }
        if self.top_count_max - self.top_count_min
            < self.outlier_count_max - self.outlier_count_min
        {
            return Err(VeilError::config(
                "top_count_max",
                "top interval must be at least as wide as the outlier interval",
            ));
        }
        Ok(())
    }

    /// Capacity of a top-contributors list under this configuration.
    #[must_use]
    pub fn top_contributors_capacity(&self) -> usize {
        (self.outlier_count_max + self.top_count_max) as usize
    }

    /// Smallest contributor population the flattening bands can be drawn
    /// from; below it an aggregator reports "not enough AID values".
    #[must_use]
    pub fn minimum_contributors(&self) -> u64 {
        (self.outlier_count_min + self.top_count_min) as u64
    }
}

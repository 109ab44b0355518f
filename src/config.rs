//! Analysis configuration, loaded from JSON.
//!
//! Every field has a default so a config file only needs the keys it changes:
//!
//! ```json
//! { "relax_factor": 0.715, "k": 4.0 }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Widest interval accepted for counting spectra over time (one year).
pub const MAX_BUCKET_MINUTES: i64 = 366 * 24 * 60;

/// Tunable parameters of the three engines and the temporal pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Multiplier on the Otsu threshold, in (0, 1]. Lower widens the strong set.
    pub relax_factor: f64,
    /// Multiplier on the IQR for the upper outlier bound.
    pub k: f64,
    /// Multiplier on the IQR for the lower outlier bound; `None` disables it.
    pub lower_k: Option<f64>,
    /// Per-channel tolerance for waveform matching; 0 means exact equality.
    pub match_tolerance: f64,
    /// Histogram resolution for Otsu's method.
    pub otsu_bins: usize,
    /// Width of the intervals used when counting spectra over time.
    pub bucket_minutes: i64,
    /// Metadata column holding acquisition timestamps.
    pub timestamp_column: String,
    /// Field separator of delimited input files.
    pub separator: char,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            relax_factor: 1.0,
            k: 5.0,
            lower_k: None,
            match_tolerance: 0.0,
            otsu_bins: 256,
            bucket_minutes: 10,
            timestamp_column: "DateTime".to_string(),
            separator: ';',
        }
    }
}

impl AnalysisConfig {
    /// Read and validate a JSON config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AnalysisConfig = serde_json::from_str(&text).context("parsing config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        let invalid = |msg: String| Err(AnalysisError::InvalidConfig(msg));

        if !(self.relax_factor > 0.0 && self.relax_factor <= 1.0) {
            return invalid(format!("relax_factor must be in (0, 1], got {}", self.relax_factor));
        }
        if !(self.k.is_finite() && self.k >= 0.0) {
            return invalid(format!("k must be a non-negative number, got {}", self.k));
        }
        if let Some(lk) = self.lower_k {
            if !(lk.is_finite() && lk >= 0.0) {
                return invalid(format!("lower_k must be a non-negative number, got {lk}"));
            }
        }
        if !(self.match_tolerance.is_finite() && self.match_tolerance >= 0.0) {
            return invalid(format!(
                "match_tolerance must be >= 0, got {}",
                self.match_tolerance
            ));
        }
        if self.otsu_bins < 2 {
            return invalid(format!("otsu_bins must be at least 2, got {}", self.otsu_bins));
        }
        if !(1..=MAX_BUCKET_MINUTES).contains(&self.bucket_minutes) {
            return invalid(format!(
                "bucket_minutes must be in 1..={MAX_BUCKET_MINUTES}, got {}",
                self.bucket_minutes
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let c = AnalysisConfig::default();
        assert_eq!(c.relax_factor, 1.0);
        assert_eq!(c.k, 5.0);
        assert_eq!(c.match_tolerance, 0.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let c: AnalysisConfig = serde_json::from_str(r#"{ "relax_factor": 0.715 }"#).unwrap();
        assert_eq!(c.relax_factor, 0.715);
        assert_eq!(c.k, 5.0);
        assert_eq!(c.separator, ';');
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(serde_json::from_str::<AnalysisConfig>(r#"{ "relax": 0.5 }"#).is_err());
    }

    #[test]
    fn test_validation_bounds() {
        let bad = [
            AnalysisConfig { relax_factor: 0.0, ..Default::default() },
            AnalysisConfig { relax_factor: 1.5, ..Default::default() },
            AnalysisConfig { k: -1.0, ..Default::default() },
            AnalysisConfig { lower_k: Some(f64::NAN), ..Default::default() },
            AnalysisConfig { match_tolerance: -0.1, ..Default::default() },
            AnalysisConfig { otsu_bins: 1, ..Default::default() },
            AnalysisConfig { bucket_minutes: 0, ..Default::default() },
            AnalysisConfig { bucket_minutes: MAX_BUCKET_MINUTES + 1, ..Default::default() },
            AnalysisConfig { bucket_minutes: i64::MAX / 2, ..Default::default() },
        ];
        for c in bad {
            assert!(
                matches!(c.validate(), Err(AnalysisError::InvalidConfig(_))),
                "{c:?} should be rejected"
            );
        }
    }
}

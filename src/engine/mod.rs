//! Threshold engines: three interchangeable ways to label spectra.
//!
//! ```text
//!   SpectrumMatrix ──► Engine::classify ──► ClassificationResult
//!                        │
//!                        ├─ Otsu      peak intensity vs. bi-level threshold
//!                        ├─ Iqr       any channel above Q3 + k·IQR
//!                        └─ Waveform  equality with a media reference
//! ```
//!
//! A result comes from exactly one engine; results are never merged.

pub mod iqr;
pub mod otsu;
pub mod waveform;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::config::AnalysisConfig;
use crate::data::model::{ReferenceSet, RowId, SpectrumMatrix};
use crate::error::{AnalysisError, Condition};

pub use iqr::{IqrDetail, IqrEngine};
pub use otsu::{OtsuDetail, OtsuEngine};
pub use waveform::{WaveformDetail, WaveformEngine};

// ---------------------------------------------------------------------------
// Labels and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    /// Signal of interest above background.
    Strong,
    /// Background / media only.
    Weak,
}

impl Label {
    pub fn from_strong(strong: bool) -> Self {
        if strong {
            Label::Strong
        } else {
            Label::Weak
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Strong => write!(f, "strong"),
            Label::Weak => write!(f, "weak"),
        }
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strong" => Ok(Label::Strong),
            "weak" => Ok(Label::Weak),
            other => Err(format!("unknown label '{other}' (expected strong or weak)")),
        }
    }
}

/// Engine-specific numbers behind a classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "engine", rename_all = "lowercase")]
pub enum EngineDetail {
    Otsu(OtsuDetail),
    Iqr(IqrDetail),
    Waveform(WaveformDetail),
}

/// One label per spectrum, parallel to the matrix's row order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub engine: EngineKind,
    pub rows: Vec<RowId>,
    pub labels: Vec<Label>,
    /// Non-fatal conditions raised while classifying.
    pub conditions: Vec<Condition>,
    pub detail: EngineDetail,
}

impl ClassificationResult {
    pub(crate) fn new(
        engine: EngineKind,
        rows: Vec<RowId>,
        labels: Vec<Label>,
        detail: EngineDetail,
    ) -> Self {
        debug_assert_eq!(rows.len(), labels.len());
        ClassificationResult {
            engine,
            rows,
            labels,
            conditions: Vec::new(),
            detail,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// `(row, label)` pairs in matrix order.
    pub fn iter(&self) -> impl Iterator<Item = (RowId, Label)> + '_ {
        self.rows.iter().copied().zip(self.labels.iter().copied())
    }

    pub fn label_of(&self, id: RowId) -> Option<Label> {
        self.iter().find(|(r, _)| *r == id).map(|(_, l)| l)
    }

    /// Ids carrying `label`, in matrix order.
    pub fn ids_with(&self, label: Label) -> Vec<RowId> {
        self.iter()
            .filter(|(_, l)| *l == label)
            .map(|(r, _)| r)
            .collect()
    }

    pub fn strong_ids(&self) -> Vec<RowId> {
        self.ids_with(Label::Strong)
    }

    pub fn weak_ids(&self) -> Vec<RowId> {
        self.ids_with(Label::Weak)
    }

    pub fn count(&self, label: Label) -> usize {
        self.labels.iter().filter(|l| **l == label).count()
    }
}

// ---------------------------------------------------------------------------
// Engine selection
// ---------------------------------------------------------------------------

/// The capability every engine provides.
pub trait Classifier {
    fn classify(&self, matrix: &SpectrumMatrix) -> Result<ClassificationResult, AnalysisError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Otsu,
    Iqr,
    Waveform,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Otsu => write!(f, "otsu"),
            EngineKind::Iqr => write!(f, "iqr"),
            EngineKind::Waveform => write!(f, "waveform"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "otsu" | "peak" => Ok(EngineKind::Otsu),
            "iqr" => Ok(EngineKind::Iqr),
            "waveform" | "match" => Ok(EngineKind::Waveform),
            other => Err(format!(
                "unknown engine '{other}' (expected otsu, iqr or waveform)"
            )),
        }
    }
}

/// A configured engine.
#[derive(Debug, Clone)]
pub enum Engine {
    Otsu(OtsuEngine),
    Iqr(IqrEngine),
    Waveform(WaveformEngine),
}

impl Engine {
    /// Build the engine of `kind` from the analysis config. The waveform
    /// engine needs a reference set; the others ignore it.
    pub fn from_config(
        kind: EngineKind,
        config: &AnalysisConfig,
        reference: Option<ReferenceSet>,
    ) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(match kind {
            EngineKind::Otsu => Engine::Otsu(OtsuEngine::new(config.relax_factor, config.otsu_bins)?),
            EngineKind::Iqr => Engine::Iqr(IqrEngine::new(config.k, config.lower_k)?),
            EngineKind::Waveform => {
                let reference = reference.ok_or(AnalysisError::MissingReference)?;
                Engine::Waveform(WaveformEngine::new(reference, config.match_tolerance)?)
            }
        })
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            Engine::Otsu(_) => EngineKind::Otsu,
            Engine::Iqr(_) => EngineKind::Iqr,
            Engine::Waveform(_) => EngineKind::Waveform,
        }
    }
}

impl Classifier for Engine {
    fn classify(&self, matrix: &SpectrumMatrix) -> Result<ClassificationResult, AnalysisError> {
        let result = match self {
            Engine::Otsu(e) => e.classify(matrix),
            Engine::Iqr(e) => e.classify(matrix),
            Engine::Waveform(e) => e.classify(matrix),
        }?;
        log::info!(
            "{} engine: {} strong, {} weak",
            result.engine,
            result.count(Label::Strong),
            result.count(Label::Weak)
        );
        for condition in &result.conditions {
            log::warn!("{condition}");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> SpectrumMatrix {
        SpectrumMatrix::from_rows(
            vec![400.0, 500.0],
            vec![vec![1.0, 10.0], vec![1.0, 12.0], vec![1.0, 95.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("OTSU".parse::<EngineKind>().unwrap(), EngineKind::Otsu);
        assert_eq!("iqr".parse::<EngineKind>().unwrap(), EngineKind::Iqr);
        assert_eq!("waveform".parse::<EngineKind>().unwrap(), EngineKind::Waveform);
        assert!("kmeans".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_label_parse() {
        assert_eq!("Strong".parse::<Label>().unwrap(), Label::Strong);
        assert_eq!("weak".parse::<Label>().unwrap(), Label::Weak);
        assert!("medium".parse::<Label>().is_err());
    }

    #[test]
    fn test_waveform_requires_reference() {
        let err = Engine::from_config(EngineKind::Waveform, &AnalysisConfig::default(), None)
            .unwrap_err();
        assert_eq!(err, AnalysisError::MissingReference);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AnalysisConfig {
            relax_factor: 2.0,
            ..Default::default()
        };
        assert!(matches!(
            Engine::from_config(EngineKind::Otsu, &config, None),
            Err(AnalysisError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_dispatch_through_enum() {
        let m = matrix();
        let engine = Engine::from_config(EngineKind::Otsu, &AnalysisConfig::default(), None).unwrap();
        assert_eq!(engine.kind(), EngineKind::Otsu);
        let result = engine.classify(&m).unwrap();
        assert_eq!(result.engine, EngineKind::Otsu);
        assert_eq!(result.labels, vec![Label::Weak, Label::Weak, Label::Strong]);
        assert_eq!(result.strong_ids(), vec![RowId(2)]);
        assert_eq!(result.weak_ids(), vec![RowId(0), RowId(1)]);
        assert_eq!(result.label_of(RowId(1)), Some(Label::Weak));
        assert_eq!(result.label_of(RowId(9)), None);
    }
}

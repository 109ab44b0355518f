use log::debug;
use serde::Serialize;

use crate::data::model::{ReferenceSet, RowId, SpectrumMatrix};
use crate::error::AnalysisError;

use super::{ClassificationResult, Classifier, EngineDetail, EngineKind, Label};

/// A measurement row that matched a reference row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaMatch {
    pub row: RowId,
    pub reference: RowId,
}

/// Diagnostics of a waveform match; not used for classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveformDetail {
    pub tolerance: f64,
    pub references: usize,
    pub matched: Vec<MediaMatch>,
    /// Measurement ids that did not match any reference.
    pub absent_from_matched: Vec<RowId>,
}

/// Labels a spectrum weak when it equals a media reference on every channel
/// (within `tolerance`), strong otherwise.
#[derive(Debug, Clone)]
pub struct WaveformEngine {
    reference: ReferenceSet,
    tolerance: f64,
}

impl WaveformEngine {
    pub fn new(reference: ReferenceSet, tolerance: f64) -> Result<Self, AnalysisError> {
        if !(tolerance.is_finite() && tolerance >= 0.0) {
            return Err(AnalysisError::InvalidConfig(format!(
                "match_tolerance must be >= 0, got {tolerance}"
            )));
        }
        Ok(WaveformEngine { reference, tolerance })
    }

    fn matches(&self, row: &[f64], reference: &[f64]) -> bool {
        row.iter()
            .zip(reference)
            .all(|(a, b)| (a - b).abs() <= self.tolerance)
    }
}

impl Classifier for WaveformEngine {
    fn classify(&self, matrix: &SpectrumMatrix) -> Result<ClassificationResult, AnalysisError> {
        self.reference.ensure_aligned(matrix)?;

        let mut matched = Vec::new();
        let mut absent_from_matched = Vec::new();
        let mut labels = Vec::with_capacity(matrix.len());

        for sp in matrix.spectra() {
            let hit = self
                .reference
                .spectra()
                .iter()
                .find(|r| self.matches(&sp.intensities, &r.intensities));
            match hit {
                Some(r) => {
                    matched.push(MediaMatch {
                        row: sp.id,
                        reference: r.id,
                    });
                    labels.push(Label::Weak);
                }
                None => {
                    absent_from_matched.push(sp.id);
                    labels.push(Label::Strong);
                }
            }
        }
        debug!(
            "waveform match against {} references: {} matched, {} absent",
            self.reference.len(),
            matched.len(),
            absent_from_matched.len()
        );

        Ok(ClassificationResult::new(
            EngineKind::Waveform,
            matrix.row_ids(),
            labels,
            EngineDetail::Waveform(WaveformDetail {
                tolerance: self.tolerance,
                references: self.reference.len(),
                matched,
                absent_from_matched,
            }),
        ))
    }
}

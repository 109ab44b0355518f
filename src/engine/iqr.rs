use std::collections::BTreeSet;

use log::debug;
use serde::Serialize;

use crate::data::model::{RowId, SpectrumMatrix};
use crate::error::AnalysisError;
use crate::stats::{channel_quartiles, ChannelQuartiles};

use super::{ClassificationResult, Classifier, EngineDetail, EngineKind, Label};

/// First channel that pushed a spectrum over its bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OutlierHit {
    pub row: RowId,
    pub channel: usize,
    pub wavenumber: f64,
    pub value: f64,
}

/// Numbers behind an IQR classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IqrDetail {
    pub k: f64,
    pub lower_k: Option<f64>,
    pub quartiles: Vec<ChannelQuartiles>,
    /// Channels where at least one spectrum fell outside the bounds.
    pub outlier_channels: Vec<usize>,
    /// One entry per strong spectrum.
    pub hits: Vec<OutlierHit>,
}

/// Labels a spectrum strong when **any** channel lies above
/// `Q3 + k * IQR` of that channel (or below `Q1 - lower_k * IQR` when a lower
/// multiplier is set).
#[derive(Debug, Clone)]
pub struct IqrEngine {
    k: f64,
    lower_k: Option<f64>,
}

impl IqrEngine {
    pub fn new(k: f64, lower_k: Option<f64>) -> Result<Self, AnalysisError> {
        for (name, v) in [("k", Some(k)), ("lower_k", lower_k)] {
            if let Some(v) = v {
                if !(v.is_finite() && v >= 0.0) {
                    return Err(AnalysisError::InvalidConfig(format!(
                        "{name} must be a non-negative number, got {v}"
                    )));
                }
            }
        }
        Ok(IqrEngine { k, lower_k })
    }

    fn outside(&self, q: &ChannelQuartiles, v: f64) -> bool {
        let iqr = q.iqr();
        if v > q.q3 + self.k * iqr {
            return true;
        }
        match self.lower_k {
            Some(lk) => v < q.q1 - lk * iqr,
            None => false,
        }
    }
}

impl Default for IqrEngine {
    fn default() -> Self {
        IqrEngine {
            k: 5.0,
            lower_k: None,
        }
    }
}

impl Classifier for IqrEngine {
    fn classify(&self, matrix: &SpectrumMatrix) -> Result<ClassificationResult, AnalysisError> {
        let quartiles = channel_quartiles(matrix);
        let wavenumbers = matrix.wavenumbers();

        let mut outlier_channels = BTreeSet::new();
        let mut hits = Vec::new();
        let mut labels = Vec::with_capacity(matrix.len());

        for sp in matrix.spectra() {
            let mut first: Option<usize> = None;
            for (c, (&v, q)) in sp.intensities.iter().zip(&quartiles).enumerate() {
                if self.outside(q, v) {
                    outlier_channels.insert(c);
                    first.get_or_insert(c);
                }
            }
            if let Some(c) = first {
                hits.push(OutlierHit {
                    row: sp.id,
                    channel: c,
                    wavenumber: wavenumbers[c],
                    value: sp.intensities[c],
                });
            }
            labels.push(Label::from_strong(first.is_some()));
        }
        debug!(
            "iqr k={}: {} outlier channels of {}",
            self.k,
            outlier_channels.len(),
            matrix.channel_count()
        );

        Ok(ClassificationResult::new(
            EngineKind::Iqr,
            matrix.row_ids(),
            labels,
            EngineDetail::Iqr(IqrDetail {
                k: self.k,
                lower_k: self.lower_k,
                quartiles,
                outlier_channels: outlier_channels.into_iter().collect(),
                hits,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_iqr_channel_flags_any_excess() {
        let m = SpectrumMatrix::from_rows(
            vec![1600.0],
            vec![vec![1.0], vec![1.0], vec![1.0], vec![1.0], vec![100.0]],
        )
        .unwrap();
        let result = IqrEngine::default().classify(&m).unwrap();
        use Label::*;
        assert_eq!(result.labels, vec![Weak, Weak, Weak, Weak, Strong]);

        let EngineDetail::Iqr(detail) = &result.detail else {
            panic!("wrong detail variant");
        };
        assert_eq!(detail.quartiles[0].iqr(), 0.0);
        assert_eq!(detail.outlier_channels, vec![0]);
        assert_eq!(detail.hits.len(), 1);
        assert_eq!(detail.hits[0].row, RowId(4));
        assert_eq!(detail.hits[0].wavenumber, 1600.0);
    }

    #[test]
    fn test_any_single_channel_is_enough() {
        // Row 5 is unremarkable except for one channel.
        let mut rows: Vec<Vec<f64>> = (0..8)
            .map(|i| vec![10.0 + i as f64, 20.0 + i as f64, 30.0 + i as f64])
            .collect();
        rows[5][1] = 500.0;
        let m = SpectrumMatrix::from_rows(vec![1.0, 2.0, 3.0], rows).unwrap();
        let result = IqrEngine::default().classify(&m).unwrap();
        assert_eq!(result.strong_ids(), vec![RowId(5)]);
    }

    #[test]
    fn test_larger_k_never_grows_strong_set() {
        let rows: Vec<Vec<f64>> = [1.0, 2.0, 2.5, 3.0, 3.5, 4.0, 9.0, 15.0, 30.0, 80.0]
            .iter()
            .map(|&v| vec![v, v * 2.0])
            .collect();
        let m = SpectrumMatrix::from_rows(vec![1.0, 2.0], rows).unwrap();
        let mut previous: Option<Vec<RowId>> = None;
        for k in [0.0, 0.5, 1.5, 3.0, 5.0, 10.0, 50.0] {
            let strong = IqrEngine::new(k, None).unwrap().classify(&m).unwrap().strong_ids();
            if let Some(prev) = &previous {
                assert!(strong.iter().all(|id| prev.contains(id)), "k={k} added rows");
            }
            previous = Some(strong);
        }
    }

    #[test]
    fn test_lower_bound_is_optional() {
        let m = SpectrumMatrix::from_rows(
            vec![1.0],
            vec![vec![10.0], vec![11.0], vec![12.0], vec![13.0], vec![-50.0]],
        )
        .unwrap();
        assert!(IqrEngine::default().classify(&m).unwrap().strong_ids().is_empty());
        let with_lower = IqrEngine::new(5.0, Some(5.0)).unwrap().classify(&m).unwrap();
        assert_eq!(with_lower.strong_ids(), vec![RowId(4)]);
    }

    #[test]
    fn test_negative_k_rejected() {
        assert!(IqrEngine::new(-1.0, None).is_err());
        assert!(IqrEngine::new(1.0, Some(f64::INFINITY)).is_err());
    }
}

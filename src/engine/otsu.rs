use log::debug;
use serde::Serialize;

use crate::data::model::SpectrumMatrix;
use crate::error::{AnalysisError, Condition};
use crate::stats::{peak_intensities, Histogram};

use super::{ClassificationResult, Classifier, EngineDetail, EngineKind, Label};

// ---------------------------------------------------------------------------
// Otsu split over a value histogram
// ---------------------------------------------------------------------------

/// Where Otsu's criterion split a set of values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OtsuSplit {
    /// Largest value in the low class; values above it form the high class.
    pub threshold: f64,
    /// Last histogram bin belonging to the low class.
    pub split_bin: usize,
    pub histogram: Histogram,
}

/// Bi-level Otsu threshold of `values` over a `bins`-bin histogram.
///
/// Maximizes `w0 * w1 * (mu0 - mu1)^2` over every split between adjacent
/// bins, using bin centers for the class means; the first maximum wins.
/// The threshold is the largest value that fell into the low class, so
/// relaxing it moves the cut down into the low cluster. Returns `None` if the
/// values do not span a usable range.
pub fn otsu_threshold(values: &[f64], bins: usize) -> Option<OtsuSplit> {
    if degenerate_reason(values).is_some() || bins < 2 {
        return None;
    }
    let histogram = Histogram::new(values, bins)?;

    let total_w: f64 = histogram.counts.iter().sum::<usize>() as f64;
    let total_m: f64 = histogram
        .counts
        .iter()
        .enumerate()
        .map(|(i, &n)| n as f64 * histogram.center(i))
        .sum();

    let mut best: Option<(usize, f64)> = None;
    let mut w0 = 0.0;
    let mut m0 = 0.0;
    for i in 0..histogram.bins() - 1 {
        w0 += histogram.counts[i] as f64;
        m0 += histogram.counts[i] as f64 * histogram.center(i);
        let w1 = total_w - w0;
        if w0 == 0.0 || w1 == 0.0 {
            continue;
        }
        let mu0 = m0 / w0;
        let mu1 = (total_m - m0) / w1;
        let between = w0 * w1 * (mu0 - mu1).powi(2);
        if best.map_or(true, |(_, b)| between > b) {
            best = Some((i, between));
        }
    }
    let (split_bin, _) = best?;

    let max_low = values
        .iter()
        .copied()
        .filter(|&v| histogram.bin_of(v) <= split_bin)
        .fold(f64::NEG_INFINITY, f64::max);

    Some(OtsuSplit {
        threshold: max_low,
        split_bin,
        histogram,
    })
}

/// Spread below which peak intensities count as constant, relative to their
/// magnitude.
const MIN_RELATIVE_SPREAD: f64 = 1e-6;

/// Why a value set cannot be split, if it cannot.
fn degenerate_reason(values: &[f64]) -> Option<String> {
    if values.is_empty() {
        return Some("no spectra".to_string());
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let scale = max.abs().max(min.abs()).max(1.0);
    if max - min <= MIN_RELATIVE_SPREAD * scale {
        return Some(format!("peak intensities are constant at {max}"));
    }
    None
}

// ---------------------------------------------------------------------------
// Peak-intensity engine
// ---------------------------------------------------------------------------

/// Numbers behind an Otsu classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OtsuDetail {
    /// Max intensity of every spectrum, in matrix order.
    pub peak_intensities: Vec<f64>,
    pub relax_factor: f64,
    /// `None` when the input was degenerate.
    pub threshold: Option<f64>,
    pub relaxed_threshold: Option<f64>,
    pub histogram: Option<Histogram>,
}

/// Labels a spectrum strong when its peak intensity exceeds the (relaxed)
/// Otsu threshold of all peak intensities.
#[derive(Debug, Clone)]
pub struct OtsuEngine {
    relax_factor: f64,
    bins: usize,
}

impl OtsuEngine {
    pub fn new(relax_factor: f64, bins: usize) -> Result<Self, AnalysisError> {
        if !(relax_factor > 0.0 && relax_factor <= 1.0) {
            return Err(AnalysisError::InvalidConfig(format!(
                "relax_factor must be in (0, 1], got {relax_factor}"
            )));
        }
        if bins < 2 {
            return Err(AnalysisError::InvalidConfig(format!(
                "otsu_bins must be at least 2, got {bins}"
            )));
        }
        Ok(OtsuEngine { relax_factor, bins })
    }
}

impl Default for OtsuEngine {
    fn default() -> Self {
        OtsuEngine {
            relax_factor: 1.0,
            bins: 256,
        }
    }
}

impl Classifier for OtsuEngine {
    fn classify(&self, matrix: &SpectrumMatrix) -> Result<ClassificationResult, AnalysisError> {
        let peaks = peak_intensities(matrix);
        let split = otsu_threshold(&peaks, self.bins);

        let (labels, threshold, relaxed, histogram) = match split {
            Some(split) => {
                let relaxed = split.threshold * self.relax_factor;
                debug!(
                    "otsu threshold {:.4} (bin {}), relaxed to {:.4}",
                    split.threshold, split.split_bin, relaxed
                );
                let labels: Vec<Label> =
                    peaks.iter().map(|&p| Label::from_strong(p > relaxed)).collect();
                (labels, Some(split.threshold), Some(relaxed), Some(split.histogram))
            }
            None => (vec![Label::Weak; peaks.len()], None, None, None),
        };

        let mut result = ClassificationResult::new(
            EngineKind::Otsu,
            matrix.row_ids(),
            labels,
            EngineDetail::Otsu(OtsuDetail {
                peak_intensities: peaks.clone(),
                relax_factor: self.relax_factor,
                threshold,
                relaxed_threshold: relaxed,
                histogram,
            }),
        );
        if threshold.is_none() {
            let reason = degenerate_reason(&peaks)
                .unwrap_or_else(|| "peak intensities cannot be split".to_string());
            result.conditions.push(Condition::DegenerateInput {
                reason,
                rows: peaks.len(),
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::RowId;

    fn peaks_matrix(peaks: &[f64]) -> SpectrumMatrix {
        // Two channels; the peak sits in the second one.
        let rows = peaks.iter().map(|&p| vec![p * 0.1, p]).collect();
        SpectrumMatrix::from_rows(vec![1000.0, 1001.0], rows).unwrap()
    }

    #[test]
    fn test_two_clusters_split() {
        let m = peaks_matrix(&[10.0, 12.0, 11.0, 90.0, 95.0]);
        let result = OtsuEngine::default().classify(&m).unwrap();
        use Label::*;
        assert_eq!(result.labels, vec![Weak, Weak, Weak, Strong, Strong]);
        assert!(result.conditions.is_empty());

        let EngineDetail::Otsu(detail) = &result.detail else {
            panic!("wrong detail variant");
        };
        assert_eq!(detail.threshold, Some(12.0));
        assert_eq!(detail.relaxed_threshold, Some(12.0));
    }

    #[test]
    fn test_relaxed_cut_moves_into_low_cluster() {
        let m = peaks_matrix(&[10.0, 12.0, 11.0, 90.0, 95.0]);
        let result = OtsuEngine::new(0.715, 256).unwrap().classify(&m).unwrap();
        assert_eq!(result.labels, vec![Label::Strong; 5]);

        let EngineDetail::Otsu(detail) = &result.detail else {
            panic!("wrong detail variant");
        };
        let relaxed = detail.relaxed_threshold.unwrap();
        assert!((relaxed - 12.0 * 0.715).abs() < 1e-12, "relaxed {relaxed}");

        let mild = OtsuEngine::new(0.95, 256).unwrap().classify(&m).unwrap();
        assert_eq!(mild.strong_ids(), vec![RowId(1), RowId(3), RowId(4)]);
    }

    #[test]
    fn test_deterministic() {
        let m = peaks_matrix(&[3.0, 7.5, 2.0, 40.0, 41.0, 8.0, 39.0, 1.0]);
        let engine = OtsuEngine::new(0.8, 256).unwrap();
        let a = engine.classify(&m).unwrap();
        let b = engine.classify(&m).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_relaxation_only_grows_strong_set() {
        let m = peaks_matrix(&[5.0, 14.0, 22.0, 30.0, 41.0, 47.0, 60.0, 75.0, 80.0, 99.0]);
        let mut previous: Vec<RowId> = Vec::new();
        for relax in [1.0, 0.9, 0.715, 0.5, 0.3, 0.1] {
            let strong = OtsuEngine::new(relax, 256).unwrap().classify(&m).unwrap().strong_ids();
            for id in &previous {
                assert!(strong.contains(id), "row {id} dropped out at relax {relax}");
            }
            assert!(strong.len() >= previous.len());
            previous = strong;
        }
    }

    #[test]
    fn test_constant_peaks_fall_back_to_weak() {
        let m = peaks_matrix(&[4.0, 4.0, 4.0]);
        let result = OtsuEngine::default().classify(&m).unwrap();
        assert_eq!(result.labels, vec![Label::Weak; 3]);
        assert!(matches!(
            result.conditions.as_slice(),
            [Condition::DegenerateInput { rows: 3, .. }]
        ));
    }

    #[test]
    fn test_near_constant_peaks_fall_back_to_weak() {
        let m = peaks_matrix(&[100.0, 100.0, 100.0 + 1e-9]);
        let result = OtsuEngine::default().classify(&m).unwrap();
        assert_eq!(result.labels, vec![Label::Weak; 3]);
        assert!(matches!(
            result.conditions.as_slice(),
            [Condition::DegenerateInput { rows: 3, .. }]
        ));
    }

    #[test]
    fn test_empty_matrix_is_degenerate() {
        let m = SpectrumMatrix::from_rows(vec![1.0], Vec::new()).unwrap();
        let result = OtsuEngine::default().classify(&m).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.conditions.len(), 1);
    }

    #[test]
    fn test_single_spectrum_is_degenerate() {
        let m = peaks_matrix(&[17.0]);
        let result = OtsuEngine::default().classify(&m).unwrap();
        assert_eq!(result.labels, vec![Label::Weak]);
        assert_eq!(result.conditions.len(), 1);
    }

    #[test]
    fn test_invalid_relax_factor() {
        assert!(OtsuEngine::new(0.0, 256).is_err());
        assert!(OtsuEngine::new(1.01, 256).is_err());
        assert!(OtsuEngine::new(1.0, 1).is_err());
    }
}

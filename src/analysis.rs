use serde::Serialize;

use crate::config::AnalysisConfig;
use crate::data::model::SpectrumMatrix;
use crate::engine::{ClassificationResult, Classifier, Engine, Label};
use crate::error::AnalysisError;
use crate::temporal::{
    align, bucket_counts, intensity_trend, Alignment, IntervalCount, TemporalIndex, TrendPoint,
};

// ---------------------------------------------------------------------------
// One analysis run
// ---------------------------------------------------------------------------

/// Time-axis view of a classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalSummary {
    pub alignment: Alignment,
    /// Weak spectra counted per interval.
    pub weak_intervals: Vec<IntervalCount>,
    /// Mean intensity of each weak spectrum over time.
    pub weak_trend: Vec<TrendPoint>,
}

/// Everything a report sink needs from one run. Built fresh for every run and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub spectra: usize,
    pub channels: usize,
    pub classification: ClassificationResult,
    pub temporal: Option<TemporalSummary>,
}

impl Analysis {
    /// Classify `matrix` with `engine`, then place the result on the time
    /// axis when an index is given.
    pub fn run(
        matrix: &SpectrumMatrix,
        engine: &Engine,
        index: Option<&TemporalIndex>,
        config: &AnalysisConfig,
    ) -> Result<Self, AnalysisError> {
        let classification = engine.classify(matrix)?;

        let temporal = match index {
            Some(index) => {
                let alignment = align(index, &classification);
                Some(TemporalSummary {
                    weak_intervals: bucket_counts(&alignment, Label::Weak, config.bucket_minutes)?,
                    weak_trend: intensity_trend(&alignment, matrix, Label::Weak),
                    alignment,
                })
            }
            None => None,
        };

        Ok(Analysis {
            spectra: matrix.len(),
            channels: matrix.channel_count(),
            classification,
            temporal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::RowId;
    use crate::engine::EngineKind;
    use crate::temporal::parse_timestamp;

    #[test]
    fn test_run_with_timestamps() {
        let m = SpectrumMatrix::from_rows(
            vec![1.0, 2.0],
            vec![
                vec![1.0, 10.0],
                vec![1.0, 95.0],
                vec![1.0, 12.0],
                vec![1.0, 11.0],
                vec![1.0, 13.0],
            ],
        )
        .unwrap();
        let config = AnalysisConfig::default();
        let engine = Engine::from_config(EngineKind::Iqr, &config, None).unwrap();
        let index = TemporalIndex::new(vec![
            (RowId(0), parse_timestamp("2023-05-17 10:02:00").unwrap()),
            (RowId(1), parse_timestamp("2023-05-17 10:03:00").unwrap()),
            (RowId(2), parse_timestamp("2023-05-17 10:12:00").unwrap()),
        ]);

        let a = Analysis::run(&m, &engine, Some(&index), &config).unwrap();
        assert_eq!(a.spectra, 5);
        assert_eq!(a.channels, 2);
        assert_eq!(a.classification.strong_ids(), vec![RowId(1)]);

        let t = a.temporal.unwrap();
        assert_eq!(t.alignment.len(), 3);
        assert_eq!(t.weak_intervals.len(), 2);
        assert_eq!(t.weak_trend.len(), 2);
        assert!(t.alignment.unmatched.is_some());
    }

    #[test]
    fn test_run_without_timestamps() {
        let m = SpectrumMatrix::from_rows(vec![1.0], vec![vec![3.0], vec![3.0]]).unwrap();
        let config = AnalysisConfig::default();
        let engine = Engine::from_config(EngineKind::Otsu, &config, None).unwrap();
        let a = Analysis::run(&m, &engine, None, &config).unwrap();
        assert!(a.temporal.is_none());
        assert_eq!(a.classification.conditions.len(), 1);
    }
}

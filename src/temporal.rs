//! Places classified spectra on a time axis.
//!
//! The aligner is a pure inner join of a [`TemporalIndex`] with a
//! [`ClassificationResult`]; it never interpolates or resamples. Interval
//! counts and intensity trends are derived from the joined rows.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, warn};
use serde::Serialize;

use crate::config::MAX_BUCKET_MINUTES;
use crate::data::model::{RowId, SpectrumMatrix};
use crate::engine::{ClassificationResult, Label};
use crate::error::{AnalysisError, Condition};
use crate::stats::mean_intensity;

// ---------------------------------------------------------------------------
// Timestamp parsing
// ---------------------------------------------------------------------------

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
];

/// Parse the timestamp layouts seen in instrument exports. Offsets are
/// dropped; the wall-clock time is kept.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_matches('\'');
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

// ---------------------------------------------------------------------------
// TemporalIndex
// ---------------------------------------------------------------------------

/// `(row, timestamp)` pairs. May mention rows the matrix does not have.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemporalIndex {
    entries: Vec<(RowId, NaiveDateTime)>,
}

impl TemporalIndex {
    pub fn new(entries: Vec<(RowId, NaiveDateTime)>) -> Self {
        TemporalIndex { entries }
    }

    /// Build the index from a metadata column of the matrix. Returns the
    /// index and the rows whose cell was missing or unparseable.
    pub fn from_metadata(matrix: &SpectrumMatrix, column: &str) -> (Self, Vec<RowId>) {
        let mut entries = Vec::with_capacity(matrix.len());
        let mut skipped = Vec::new();
        for sp in matrix.spectra() {
            match sp
                .metadata
                .get(column)
                .and_then(|v| v.as_text())
                .and_then(parse_timestamp)
            {
                Some(ts) => entries.push((sp.id, ts)),
                None => skipped.push(sp.id),
            }
        }
        if !skipped.is_empty() {
            warn!(
                "{} spectra have no usable '{column}' timestamp",
                skipped.len()
            );
        }
        (TemporalIndex { entries }, skipped)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(RowId, NaiveDateTime)] {
        &self.entries
    }
}

// ---------------------------------------------------------------------------
// Alignment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlignedRow {
    pub timestamp: NaiveDateTime,
    pub row: RowId,
    pub label: Label,
}

/// Classified rows ordered by acquisition time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alignment {
    pub rows: Vec<AlignedRow>,
    /// Set when rows or timestamps could not be joined.
    pub unmatched: Option<Condition>,
}

impl Alignment {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn with_label(&self, label: Label) -> impl Iterator<Item = &AlignedRow> + '_ {
        self.rows.iter().filter(move |r| r.label == label)
    }
}

/// Inner join of `index` and `result` on row id, sorted by timestamp.
///
/// Rows without a timestamp are dropped and listed in the returned
/// condition; timestamps for unknown rows, and repeated timestamps for a row
/// already placed, are ignored and counted. Equal timestamps keep the
/// classification's row order.
pub fn align(index: &TemporalIndex, result: &ClassificationResult) -> Alignment {
    let known: HashMap<RowId, Label> = result.iter().collect();

    let mut stamps: HashMap<RowId, NaiveDateTime> = HashMap::with_capacity(index.len());
    let mut ignored_timestamps = 0usize;
    for &(row, ts) in index.entries() {
        if !known.contains_key(&row) || stamps.contains_key(&row) {
            ignored_timestamps += 1;
            continue;
        }
        stamps.insert(row, ts);
    }

    let mut rows = Vec::with_capacity(stamps.len());
    let mut missing = Vec::new();
    for (row, label) in result.iter() {
        match stamps.get(&row) {
            Some(&timestamp) => rows.push(AlignedRow {
                timestamp,
                row,
                label,
            }),
            None => missing.push(row),
        }
    }
    rows.sort_by_key(|r| r.timestamp);

    let unmatched = if missing.is_empty() && ignored_timestamps == 0 {
        None
    } else {
        let condition = Condition::UnmatchedTemporalRows {
            rows: missing,
            ignored_timestamps,
        };
        warn!("{condition}");
        Some(condition)
    };
    debug!("aligned {} of {} classified rows", rows.len(), result.len());

    Alignment { rows, unmatched }
}

// ---------------------------------------------------------------------------
// Derived series
// ---------------------------------------------------------------------------

/// Number of rows of one label whose timestamp floors to `start`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntervalCount {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub count: usize,
}

/// Count rows carrying `label` per fixed interval, ascending. Timestamps are
/// floored to multiples of `minutes` since the Unix epoch; empty intervals
/// are not listed.
///
/// Fails if `minutes` is outside `1..=MAX_BUCKET_MINUTES` or a row's interval
/// does not fit the date range.
pub fn bucket_counts(
    alignment: &Alignment,
    label: Label,
    minutes: i64,
) -> Result<Vec<IntervalCount>, AnalysisError> {
    if !(1..=MAX_BUCKET_MINUTES).contains(&minutes) {
        return Err(AnalysisError::InvalidConfig(format!(
            "bucket_minutes must be in 1..={MAX_BUCKET_MINUTES}, got {minutes}"
        )));
    }
    let step = minutes * 60;
    let mut counts: Vec<IntervalCount> = Vec::new();
    for row in alignment.with_label(label) {
        let out_of_range = || AnalysisError::TimestampOutOfRange {
            row: row.row,
            timestamp: row.timestamp,
            minutes,
        };
        let secs = row.timestamp.and_utc().timestamp();
        let floored = secs
            .checked_sub(secs.rem_euclid(step))
            .ok_or_else(out_of_range)?;
        let start = DateTime::from_timestamp(floored, 0).ok_or_else(out_of_range)?;
        let end = floored
            .checked_add(step)
            .and_then(|e| DateTime::from_timestamp(e, 0))
            .ok_or_else(out_of_range)?;
        let start = start.naive_utc();
        // Rows arrive sorted, so a new interval is always the last one.
        match counts.last_mut() {
            Some(last) if last.start == start => last.count += 1,
            _ => counts.push(IntervalCount {
                start,
                end: end.naive_utc(),
                count: 1,
            }),
        }
    }
    Ok(counts)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendPoint {
    pub timestamp: NaiveDateTime,
    pub row: RowId,
    pub mean_intensity: f64,
}

/// Mean intensity over time for rows carrying `label`.
pub fn intensity_trend(
    alignment: &Alignment,
    matrix: &SpectrumMatrix,
    label: Label,
) -> Vec<TrendPoint> {
    alignment
        .with_label(label)
        .filter_map(|r| {
            let sp = matrix.get(r.row)?;
            Some(TrendPoint {
                timestamp: r.timestamp,
                row: r.row,
                mean_intensity: mean_intensity(sp),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{MetadataValue, Spectrum};
    use crate::engine::{Classifier, OtsuEngine};

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn classified() -> (SpectrumMatrix, ClassificationResult) {
        let m = SpectrumMatrix::from_rows(
            vec![1.0, 2.0],
            vec![
                vec![1.0, 10.0],
                vec![1.0, 12.0],
                vec![1.0, 90.0],
                vec![1.0, 11.0],
            ],
        )
        .unwrap();
        let result = OtsuEngine::default().classify(&m).unwrap();
        (m, result)
    }

    #[test]
    fn test_parse_timestamp_layouts() {
        let expected = NaiveDate::from_ymd_opt(2023, 5, 17)
            .unwrap()
            .and_hms_opt(14, 3, 0)
            .unwrap();
        assert_eq!(ts("2023-05-17 14:03:00"), expected);
        assert_eq!(ts("2023-05-17T14:03:00"), expected);
        assert_eq!(ts("'2023-05-17 14:03'"), expected);
        assert_eq!(ts("17.05.2023 14:03:00"), expected);
        assert_eq!(ts("2023-05-17T14:03:00+02:00"), expected);
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_inner_join_sorted_and_reported() {
        let (_, result) = classified();
        let index = TemporalIndex::new(vec![
            (RowId(2), ts("2023-05-17 10:20:00")),
            (RowId(0), ts("2023-05-17 10:05:00")),
            (RowId(7), ts("2023-05-17 09:00:00")),
            (RowId(1), ts("2023-05-17 10:05:00")),
        ]);
        let a = align(&index, &result);

        let order: Vec<RowId> = a.rows.iter().map(|r| r.row).collect();
        assert_eq!(order, vec![RowId(0), RowId(1), RowId(2)]);
        assert!(a.len() <= result.len().min(index.len()));
        assert!(a.rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(a.rows[2].label, Label::Strong);
        assert_eq!(
            a.unmatched,
            Some(Condition::UnmatchedTemporalRows {
                rows: vec![RowId(3)],
                ignored_timestamps: 1,
            })
        );
    }

    #[test]
    fn test_ties_keep_row_order() {
        let (_, result) = classified();
        let t = ts("2023-05-17 10:00:00");
        let index = TemporalIndex::new(vec![
            (RowId(3), t),
            (RowId(1), t),
            (RowId(2), t),
            (RowId(0), t),
        ]);
        let a = align(&index, &result);
        let order: Vec<RowId> = a.rows.iter().map(|r| r.row).collect();
        assert_eq!(order, vec![RowId(0), RowId(1), RowId(2), RowId(3)]);
        assert_eq!(a.unmatched, None);
    }

    #[test]
    fn test_duplicate_timestamps_count_as_ignored() {
        let (_, result) = classified();
        let index = TemporalIndex::new(vec![
            (RowId(0), ts("2023-05-17 10:00:00")),
            (RowId(0), ts("2023-05-17 11:00:00")),
        ]);
        let a = align(&index, &result);
        assert_eq!(a.len(), 1);
        assert_eq!(a.rows[0].timestamp, ts("2023-05-17 10:00:00"));
        match a.unmatched {
            Some(Condition::UnmatchedTemporalRows {
                rows,
                ignored_timestamps,
            }) => {
                assert_eq!(rows.len(), 3);
                assert_eq!(ignored_timestamps, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bucket_counts_floor_to_interval() {
        let (_, result) = classified();
        let index = TemporalIndex::new(vec![
            (RowId(0), ts("2023-05-17 10:01:00")),
            (RowId(1), ts("2023-05-17 10:09:59")),
            (RowId(2), ts("2023-05-17 10:05:00")),
            (RowId(3), ts("2023-05-17 10:31:00")),
        ]);
        let a = align(&index, &result);
        let weak = bucket_counts(&a, Label::Weak, 10).unwrap();
        assert_eq!(weak.len(), 2);
        assert_eq!(weak[0].start, ts("2023-05-17 10:00:00"));
        assert_eq!(weak[0].end, ts("2023-05-17 10:10:00"));
        assert_eq!(weak[0].count, 2);
        assert_eq!(weak[1].start, ts("2023-05-17 10:30:00"));
        assert_eq!(weak[1].count, 1);

        let strong = bucket_counts(&a, Label::Strong, 10).unwrap();
        assert_eq!(strong.len(), 1);
        assert_eq!(strong[0].count, 1);
    }

    #[test]
    fn test_bucket_width_out_of_bounds_is_rejected() {
        let (_, result) = classified();
        let index = TemporalIndex::new(vec![(RowId(0), ts("2023-05-17 10:01:00"))]);
        let a = align(&index, &result);
        for minutes in [0, -10, MAX_BUCKET_MINUTES + 1, i64::MAX / 2, i64::MAX / 120] {
            assert!(
                matches!(
                    bucket_counts(&a, Label::Weak, minutes),
                    Err(AnalysisError::InvalidConfig(_))
                ),
                "{minutes} minutes accepted"
            );
        }
        let widest = bucket_counts(&a, Label::Weak, MAX_BUCKET_MINUTES).unwrap();
        assert_eq!(widest.len(), 1);
        assert_eq!(widest[0].count, 1);
    }

    #[test]
    fn test_bucket_past_last_date_is_reported() {
        let (_, result) = classified();
        let last = NaiveDate::MAX.and_hms_opt(23, 59, 0).unwrap();
        let index = TemporalIndex::new(vec![(RowId(0), last)]);
        let a = align(&index, &result);
        assert_eq!(
            bucket_counts(&a, Label::Weak, 10),
            Err(AnalysisError::TimestampOutOfRange {
                row: RowId(0),
                timestamp: last,
                minutes: 10,
            })
        );
    }

    #[test]
    fn test_intensity_trend_follows_alignment() {
        let (m, result) = classified();
        let index = TemporalIndex::new(vec![
            (RowId(3), ts("2023-05-17 10:00:00")),
            (RowId(0), ts("2023-05-17 10:10:00")),
        ]);
        let a = align(&index, &result);
        let trend = intensity_trend(&a, &m, Label::Weak);
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].row, RowId(3));
        assert!((trend[0].mean_intensity - 6.0).abs() < 1e-12);
        assert!((trend[1].mean_intensity - 5.5).abs() < 1e-12);
    }

    #[test]
    fn test_index_from_metadata() {
        let spectra = vec![
            Spectrum::new(0, vec![1.0])
                .with_metadata("DateTime", MetadataValue::String("2023-05-17 10:00:00".into())),
            Spectrum::new(1, vec![1.0])
                .with_metadata("DateTime", MetadataValue::String("not a date".into())),
            Spectrum::new(2, vec![1.0]),
        ];
        let m = SpectrumMatrix::new(vec![1.0], spectra).unwrap();
        let (index, skipped) = TemporalIndex::from_metadata(&m, "DateTime");
        assert_eq!(index.len(), 1);
        assert_eq!(index.entries()[0].0, RowId(0));
        assert_eq!(skipped, vec![RowId(1), RowId(2)]);
    }
}

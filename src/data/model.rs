use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, SchemaMismatch};

// ---------------------------------------------------------------------------
// MetadataValue – a single cell in a metadata column
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value mirroring common Pandas dtypes.
/// Kept `Ord` so values can be grouped in `BTreeMap` / `BTreeSet`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// ISO-8601 date string kept as text; parsed on demand by the temporal layer.
    Date(String),
    Null,
}

impl Eq for MetadataValue {}

impl PartialOrd for MetadataValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetadataValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use MetadataValue::*;
        fn rank(v: &MetadataValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Date(_) => 5,
            }
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) | (Date(a), Date(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v:.4}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Date(d) => write!(f, "{d}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl MetadataValue {
    /// Raw text of the cell, if it holds one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) | MetadataValue::Date(s) => Some(s),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RowId – stable identity of a spectrum
// ---------------------------------------------------------------------------

/// Position of a spectrum in its source table. Survives subsetting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub usize);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Spectrum – one row of the measurement table
// ---------------------------------------------------------------------------

/// A single spectrum: intensities over the matrix's wavenumber axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub id: RowId,
    /// Intensity per channel, same length and order as the owning matrix's axis.
    pub intensities: Vec<f64>,
    /// Leading metadata columns: column_name → value.
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl Spectrum {
    pub fn new(id: usize, intensities: Vec<f64>) -> Self {
        Spectrum {
            id: RowId(id),
            intensities,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, column: &str, value: MetadataValue) -> Self {
        self.metadata.insert(column.to_string(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// SpectrumMatrix – the loaded measurement
// ---------------------------------------------------------------------------

/// Spectra sharing one wavenumber axis. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumMatrix {
    wavenumbers: Vec<f64>,
    spectra: Vec<Spectrum>,
    column_names: Vec<String>,
}

impl SpectrumMatrix {
    /// Validate and build a matrix.
    ///
    /// Every spectrum must have one finite intensity per wavenumber. Negative
    /// intensities are accepted (baseline-corrected exports contain them) but
    /// logged.
    pub fn new(wavenumbers: Vec<f64>, spectra: Vec<Spectrum>) -> Result<Self, AnalysisError> {
        if wavenumbers.is_empty() {
            return Err(AnalysisError::InvalidMatrix(
                "wavenumber axis is empty".into(),
            ));
        }
        if let Some(c) = wavenumbers.iter().position(|w| !w.is_finite()) {
            return Err(AnalysisError::InvalidMatrix(format!(
                "wavenumber at channel {c} is not finite"
            )));
        }

        let mut negative_rows = 0usize;
        for sp in &spectra {
            if sp.intensities.len() != wavenumbers.len() {
                return Err(AnalysisError::InvalidMatrix(format!(
                    "row {} has {} intensities but the axis has {} channels",
                    sp.id,
                    sp.intensities.len(),
                    wavenumbers.len()
                )));
            }
            if let Some(c) = sp.intensities.iter().position(|v| !v.is_finite()) {
                return Err(AnalysisError::InvalidMatrix(format!(
                    "row {}, channel {c}: intensity is not finite",
                    sp.id
                )));
            }
            if sp.intensities.iter().any(|&v| v < 0.0) {
                negative_rows += 1;
            }
        }
        if negative_rows > 0 {
            warn!("{negative_rows} spectra contain negative intensities");
        }

        let column_names: Vec<String> = spectra
            .iter()
            .flat_map(|sp| sp.metadata.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(SpectrumMatrix {
            wavenumbers,
            spectra,
            column_names,
        })
    }

    /// Build a matrix from bare rows; ids are the row positions.
    pub fn from_rows(wavenumbers: Vec<f64>, rows: Vec<Vec<f64>>) -> Result<Self, AnalysisError> {
        let spectra = rows
            .into_iter()
            .enumerate()
            .map(|(i, y)| Spectrum::new(i, y))
            .collect();
        Self::new(wavenumbers, spectra)
    }

    /// Number of spectra.
    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.wavenumbers.len()
    }

    pub fn wavenumbers(&self) -> &[f64] {
        &self.wavenumbers
    }

    pub fn spectra(&self) -> &[Spectrum] {
        &self.spectra
    }

    /// Ordered list of metadata column names.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.spectra.iter().map(|sp| sp.id).collect()
    }

    pub fn get(&self, id: RowId) -> Option<&Spectrum> {
        self.spectra.iter().find(|sp| sp.id == id)
    }

    /// Intensities of one channel down the rows.
    pub fn channel(&self, c: usize) -> impl Iterator<Item = f64> + '_ {
        self.spectra.iter().map(move |sp| sp.intensities[c])
    }

    /// Copy of the rows whose ids are listed, in matrix order.
    pub fn subset(&self, ids: &[RowId]) -> SpectrumMatrix {
        let wanted: BTreeSet<RowId> = ids.iter().copied().collect();
        SpectrumMatrix {
            wavenumbers: self.wavenumbers.clone(),
            spectra: self
                .spectra
                .iter()
                .filter(|sp| wanted.contains(&sp.id))
                .cloned()
                .collect(),
            column_names: self.column_names.clone(),
        }
    }

    /// Check that `other` uses the same channel count and wavenumber ordering.
    pub fn check_schema(&self, other: &SpectrumMatrix) -> Result<(), SchemaMismatch> {
        let mismatch = |first_differing_channel| SchemaMismatch {
            expected_channels: self.channel_count(),
            found_channels: other.channel_count(),
            first_differing_channel,
            reference_row: None,
        };
        if self.channel_count() != other.channel_count() {
            return Err(mismatch(None));
        }
        let differs = self
            .wavenumbers
            .iter()
            .zip(&other.wavenumbers)
            .position(|(a, b)| (a - b).abs() > AXIS_TOLERANCE * a.abs().max(1.0));
        match differs {
            Some(c) => Err(mismatch(Some(c))),
            None => Ok(()),
        }
    }
}

/// Relative tolerance when comparing two wavenumber axes.
const AXIS_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// ReferenceSet – media baseline(s)
// ---------------------------------------------------------------------------

/// One or more background-only spectra on the measurement's channel schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSet {
    matrix: SpectrumMatrix,
}

impl ReferenceSet {
    pub fn new(matrix: SpectrumMatrix) -> Result<Self, AnalysisError> {
        if matrix.is_empty() {
            return Err(AnalysisError::MissingReference);
        }
        Ok(ReferenceSet { matrix })
    }

    /// A single reference spectrum.
    pub fn single(wavenumbers: Vec<f64>, intensities: Vec<f64>) -> Result<Self, AnalysisError> {
        Self::new(SpectrumMatrix::from_rows(wavenumbers, vec![intensities])?)
    }

    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    pub fn spectra(&self) -> &[Spectrum] {
        self.matrix.spectra()
    }

    /// Fail with the offending reference row if the schemas disagree.
    pub fn ensure_aligned(&self, measurement: &SpectrumMatrix) -> Result<(), AnalysisError> {
        measurement.check_schema(&self.matrix).map_err(|mut m| {
            m.reference_row = self.matrix.spectra().first().map(|sp| sp.id);
            AnalysisError::SchemaMismatch(m)
        })
    }
}

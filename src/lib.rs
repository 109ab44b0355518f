//! Strong/weak triage of Raman spectra.
//!
//! A measurement table is loaded into a [`SpectrumMatrix`], labelled by one
//! of three threshold engines (peak-intensity Otsu, per-channel IQR outliers,
//! media waveform matching) and optionally aligned to acquisition times.
//! Output goes to a [`report::ReportSink`]; the library draws nothing itself.

pub mod analysis;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod report;
pub mod stats;
pub mod temporal;

pub use analysis::Analysis;
pub use config::AnalysisConfig;
pub use data::model::{ReferenceSet, RowId, Spectrum, SpectrumMatrix};
pub use engine::{ClassificationResult, Classifier, Engine, EngineKind, Label};
pub use error::{AnalysisError, Condition};
pub use temporal::TemporalIndex;

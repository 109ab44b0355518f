/// Data layer: core types, loading, and row selection.
///
/// Architecture:
/// ```text
///  .csv / .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → SpectrumMatrix (+ ReferenceSet, TemporalIndex)
///   └──────────┘
///        │
///        ▼
///   ┌────────────────┐
///   │ SpectrumMatrix  │  shared wavenumber axis, Vec<Spectrum>
///   └────────────────┘
///        │   engine::classify
///        ▼
///   ┌──────────┐
///   │  filter   │  labels (+ metadata) → strong / weak subsets
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;

//! Report sinks: the consumers of an [`Analysis`].
//!
//! The core never renders anything itself; a sink receives the finished
//! analysis plus the matrix it was computed from and turns them into output.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::analysis::Analysis;
use crate::data::model::SpectrumMatrix;
use crate::engine::{EngineDetail, Label};
use crate::stats::Histogram;

/// Something that consumes finished analyses.
pub trait ReportSink {
    fn consume(&mut self, matrix: &SpectrumMatrix, analysis: &Analysis) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Plain text
// ---------------------------------------------------------------------------

/// Bins used for the peak-intensity overview.
const OVERVIEW_BINS: usize = 20;
const BAR_WIDTH: usize = 40;

/// Human-readable summary written to any `Write`.
pub struct TextReport<W: Write> {
    out: W,
}

impl<W: Write> TextReport<W> {
    pub fn new(out: W) -> Self {
        TextReport { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_detail(&mut self, detail: &EngineDetail) -> std::io::Result<()> {
        match detail {
            EngineDetail::Otsu(d) => {
                if let (Some(t), Some(r)) = (d.threshold, d.relaxed_threshold) {
                    writeln!(
                        self.out,
                        "Otsu threshold {t:.4}, relaxed x{} to {r:.4}",
                        d.relax_factor
                    )?;
                }
                if let Some(h) = Histogram::new(&d.peak_intensities, OVERVIEW_BINS) {
                    writeln!(self.out, "Peak intensity distribution:")?;
                    let tallest = h.counts.iter().copied().max().unwrap_or(1).max(1);
                    for (i, &n) in h.counts.iter().enumerate() {
                        let bar = "#".repeat(n * BAR_WIDTH / tallest);
                        writeln!(self.out, "  {:>12.4} | {bar} {n}", h.center(i))?;
                    }
                }
            }
            EngineDetail::Iqr(d) => {
                writeln!(
                    self.out,
                    "IQR bounds: Q3 + {} x IQR{}; {} outlier channels",
                    d.k,
                    d.lower_k
                        .map(|lk| format!(", Q1 - {lk} x IQR"))
                        .unwrap_or_default(),
                    d.outlier_channels.len()
                )?;
                for hit in &d.hits {
                    writeln!(
                        self.out,
                        "  row {:>5}: channel {} ({:.2}) = {:.4}",
                        hit.row, hit.channel, hit.wavenumber, hit.value
                    )?;
                }
            }
            EngineDetail::Waveform(d) => {
                writeln!(
                    self.out,
                    "Matched {} rows against {} media spectra (tolerance {})",
                    d.matched.len(),
                    d.references,
                    d.tolerance
                )?;
                let absent: Vec<String> =
                    d.absent_from_matched.iter().map(|r| r.to_string()).collect();
                writeln!(self.out, "Not in media: [{}]", absent.join(", "))?;
            }
        }
        Ok(())
    }
}

impl<W: Write> ReportSink for TextReport<W> {
    fn consume(&mut self, matrix: &SpectrumMatrix, analysis: &Analysis) -> Result<()> {
        let c = &analysis.classification;
        writeln!(
            self.out,
            "{} spectra x {} channels ({:.1} to {:.1}), engine: {}",
            analysis.spectra,
            analysis.channels,
            matrix.wavenumbers().first().copied().unwrap_or_default(),
            matrix.wavenumbers().last().copied().unwrap_or_default(),
            c.engine
        )?;
        writeln!(self.out, "Number of strong spectra: {}", c.count(Label::Strong))?;
        writeln!(self.out, "Number of weak spectra: {}", c.count(Label::Weak))?;
        for condition in &c.conditions {
            writeln!(self.out, "note: {condition}")?;
        }
        self.write_detail(&c.detail)?;

        if let Some(t) = &analysis.temporal {
            if let Some(condition) = &t.alignment.unmatched {
                writeln!(self.out, "note: {condition}")?;
            }
            writeln!(self.out, "Weak spectra per interval:")?;
            for bucket in &t.weak_intervals {
                writeln!(
                    self.out,
                    "  {} - {}  {}",
                    bucket.start.format("%Y-%m-%d %H:%M"),
                    bucket.end.format("%H:%M"),
                    bucket.count
                )?;
            }
            writeln!(self.out, "Weak spectra mean intensity:")?;
            for point in &t.weak_trend {
                writeln!(
                    self.out,
                    "  {}  row {:>5}  {:.4}",
                    point.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    point.row,
                    point.mean_intensity
                )?;
            }
        }
        self.out.flush().context("flushing text report")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct JsonDocument<'a> {
    wavenumbers: &'a [f64],
    #[serde(flatten)]
    analysis: &'a Analysis,
}

/// Pretty-printed JSON document for downstream plotting.
pub struct JsonReport<W: Write> {
    out: W,
}

impl<W: Write> JsonReport<W> {
    pub fn new(out: W) -> Self {
        JsonReport { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for JsonReport<W> {
    fn consume(&mut self, matrix: &SpectrumMatrix, analysis: &Analysis) -> Result<()> {
        let doc = JsonDocument {
            wavenumbers: matrix.wavenumbers(),
            analysis,
        };
        serde_json::to_writer_pretty(&mut self.out, &doc).context("writing JSON report")?;
        writeln!(self.out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::engine::{Engine, EngineKind};

    fn analysis() -> (SpectrumMatrix, Analysis) {
        let m = SpectrumMatrix::from_rows(
            vec![400.0, 410.0],
            vec![vec![1.0, 10.0], vec![1.0, 12.0], vec![2.0, 90.0]],
        )
        .unwrap();
        let config = AnalysisConfig::default();
        let engine = Engine::from_config(EngineKind::Otsu, &config, None).unwrap();
        let a = Analysis::run(&m, &engine, None, &config).unwrap();
        (m, a)
    }

    #[test]
    fn test_text_report_counts() {
        let (m, a) = analysis();
        let mut sink = TextReport::new(Vec::new());
        sink.consume(&m, &a).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.contains("Number of strong spectra: 1"), "{text}");
        assert!(text.contains("Number of weak spectra: 2"), "{text}");
        assert!(text.contains("Otsu threshold"), "{text}");
    }

    #[test]
    fn test_json_report_shape() {
        let (m, a) = analysis();
        let mut sink = JsonReport::new(Vec::new());
        sink.consume(&m, &a).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&sink.into_inner()).unwrap();
        assert_eq!(v["spectra"], 3);
        assert_eq!(v["wavenumbers"][1], 410.0);
        assert_eq!(v["classification"]["engine"], "otsu");
        assert_eq!(v["classification"]["labels"][2], "strong");
        assert_eq!(v["classification"]["detail"]["engine"], "otsu");
    }
}

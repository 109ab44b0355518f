//! Per-spectrum and per-channel statistics used by the threshold engines.

use serde::Serialize;

use crate::data::model::{Spectrum, SpectrumMatrix};

// ---------------------------------------------------------------------------
// Per-spectrum
// ---------------------------------------------------------------------------

/// Highest intensity across a spectrum's channels.
pub fn max_intensity(spectrum: &Spectrum) -> f64 {
    spectrum
        .intensities
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Arithmetic mean across a spectrum's channels.
pub fn mean_intensity(spectrum: &Spectrum) -> f64 {
    let n = spectrum.intensities.len();
    if n == 0 {
        return 0.0;
    }
    spectrum.intensities.iter().sum::<f64>() / n as f64
}

/// `max_intensity` for every row, in matrix order.
pub fn peak_intensities(matrix: &SpectrumMatrix) -> Vec<f64> {
    matrix.spectra().iter().map(max_intensity).collect()
}

// ---------------------------------------------------------------------------
// Quantiles
// ---------------------------------------------------------------------------

/// Quantile with linear interpolation between the closest ranks
/// (`h = (n - 1) * q`). Returns `None` for an empty slice.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile_sorted(&sorted, q)
}

fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

/// Lower and upper quartile of one wavenumber channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelQuartiles {
    pub q1: f64,
    pub q3: f64,
}

impl ChannelQuartiles {
    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }
}

/// Q1 and Q3 of every channel, computed down the rows.
///
/// An empty matrix yields zero quartiles so callers never index past the axis.
pub fn channel_quartiles(matrix: &SpectrumMatrix) -> Vec<ChannelQuartiles> {
    let mut column = Vec::with_capacity(matrix.len());
    (0..matrix.channel_count())
        .map(|c| {
            column.clear();
            column.extend(matrix.channel(c));
            column.sort_by(f64::total_cmp);
            ChannelQuartiles {
                q1: quantile_sorted(&column, 0.25).unwrap_or(0.0),
                q3: quantile_sorted(&column, 0.75).unwrap_or(0.0),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// Equal-width histogram over `[min, max]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub counts: Vec<usize>,
}

impl Histogram {
    /// Bin `values` into `bins` equal-width bins. The last bin is closed so
    /// `max` lands in it. Returns `None` when there are no values, no bins,
    /// or the values do not span a positive range.
    pub fn new(values: &[f64], bins: usize) -> Option<Self> {
        if values.is_empty() || bins == 0 {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        if range <= 0.0 {
            return None;
        }
        let mut hist = Histogram {
            min,
            max,
            counts: vec![0usize; bins],
        };
        for &v in values {
            let idx = hist.bin_of(v);
            hist.counts[idx] += 1;
        }
        Some(hist)
    }

    /// Bin index a value falls into, clamped to the histogram's range.
    pub fn bin_of(&self, v: f64) -> usize {
        let bins = self.counts.len();
        let pos = (v - self.min) / (self.max - self.min) * bins as f64;
        if pos <= 0.0 {
            0
        } else {
            (pos as usize).min(bins - 1)
        }
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    pub fn bin_width(&self) -> f64 {
        (self.max - self.min) / self.counts.len() as f64
    }

    pub fn center(&self, i: usize) -> f64 {
        self.min + (i as f64 + 0.5) * self.bin_width()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_interpolates() {
        let v = [4.0, 1.0, 3.0, 2.0];
        assert!((quantile(&v, 0.25).unwrap() - 1.75).abs() < 1e-12);
        assert!((quantile(&v, 0.75).unwrap() - 3.25).abs() < 1e-12);
        assert!((quantile(&v, 0.5).unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(quantile(&[], 0.5), None);
        assert_eq!(quantile(&[7.0], 0.9), Some(7.0));
    }

    #[test]
    fn test_channel_quartiles_zero_variance() {
        let m = SpectrumMatrix::from_rows(
            vec![500.0, 600.0],
            vec![
                vec![1.0, 0.0],
                vec![1.0, 10.0],
                vec![1.0, 20.0],
                vec![1.0, 30.0],
                vec![100.0, 40.0],
            ],
        )
        .unwrap();
        let q = channel_quartiles(&m);
        assert_eq!(q.len(), 2);
        assert_eq!(q[0].q1, 1.0);
        assert_eq!(q[0].q3, 1.0);
        assert_eq!(q[0].iqr(), 0.0);
        assert!((q[1].q1 - 10.0).abs() < 1e-12);
        assert!((q[1].q3 - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_and_mean() {
        let sp = Spectrum::new(0, vec![2.0, 8.0, 5.0]);
        assert_eq!(max_intensity(&sp), 8.0);
        assert!((mean_intensity(&sp) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_histogram_puts_max_in_last_bin() {
        let h = Histogram::new(&[0.0, 1.0, 2.0, 10.0], 5).unwrap();
        assert_eq!(h.counts, vec![2, 1, 0, 0, 1]);
        assert!((h.bin_width() - 2.0).abs() < 1e-12);
        assert!((h.center(0) - 1.0).abs() < 1e-12);
        assert_eq!(h.bin_of(10.0), 4);
        assert_eq!(h.bin_of(-1.0), 0);
        assert!(Histogram::new(&[3.0, 3.0], 5).is_none());
    }
}

//! Writes a synthetic Raman experiment to the current directory:
//!
//! * `media.csv`            – background-only spectra
//! * `experimental.csv`     – a time series mixing exact media copies with
//!                            spectra carrying bacterial bands
//! * `experimental.parquet` – the same measurement in `x` / `y` list layout

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Builder, Int64Array, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{Duration, NaiveDate};
use parquet::arrow::ArrowWriter;

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

fn generate_spectrum(
    wavenumbers: &[f64],
    peaks: &[(f64, f64, f64)],
    noise_level: f64,
    rng: &mut SimpleRng,
) -> Vec<f64> {
    wavenumbers
        .iter()
        .map(|&wn| {
            let signal: f64 = peaks
                .iter()
                .map(|&(mu, sigma, amp)| gaussian(wn, mu, sigma, amp))
                .sum();
            (signal + rng.gauss(0.0, noise_level)).max(0.0)
        })
        .collect()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

struct Row {
    sample: String,
    datetime: String,
    y: Vec<f64>,
}

fn write_wide_csv(path: &str, wavenumbers: &[f64], rows: &[Row]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .with_context(|| format!("creating {path}"))?;

    let mut header = vec!["META:Sample".to_string(), "META:DateTime".to_string()];
    header.extend(wavenumbers.iter().map(|w| format!("{w:.2}")));
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![row.sample.clone(), row.datetime.clone()];
        record.extend(row.y.iter().map(|v| format!("{v}")));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_parquet(path: &str, wavenumbers: &[f64], rows: &[Row]) -> Result<()> {
    let mut x_builder = ListBuilder::new(Float64Builder::new());
    let mut y_builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        x_builder.values().append_slice(wavenumbers);
        x_builder.append(true);
        y_builder.values().append_slice(&row.y);
        y_builder.append(true);
    }

    let sample_array = StringArray::from(rows.iter().map(|r| r.sample.as_str()).collect::<Vec<_>>());
    let datetime_array =
        StringArray::from(rows.iter().map(|r| r.datetime.as_str()).collect::<Vec<_>>());
    let id_array = Int64Array::from((0..rows.len() as i64).collect::<Vec<_>>());

    let item = Arc::new(Field::new("item", DataType::Float64, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("x", DataType::List(item.clone()), false),
        Field::new("y", DataType::List(item), false),
        Field::new("Sample", DataType::Utf8, false),
        Field::new("DateTime", DataType::Utf8, false),
        Field::new("measurement_id", DataType::Int64, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(x_builder.finish()),
            Arc::new(y_builder.finish()),
            Arc::new(sample_array),
            Arc::new(datetime_array),
            Arc::new(id_array),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path).with_context(|| format!("creating {path}"))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let mut rng = SimpleRng::new(42);

    // Fingerprint region, 400 → 1798 cm⁻¹, step 2
    let wavenumbers: Vec<f64> = (0..700).map(|i| 400.0 + i as f64 * 2.0).collect();

    // Media: broad water/plastic background bands.
    let media_bands = [(520.0, 60.0, 40.0), (1100.0, 120.0, 25.0), (1640.0, 50.0, 35.0)];
    // Bacterial bands: nucleic acids, phenylalanine, amide I.
    let bacteria_bands = [(785.0, 8.0, 120.0), (1004.0, 5.0, 180.0), (1660.0, 15.0, 140.0)];

    let media: Vec<Vec<f64>> = (0..4)
        .map(|_| generate_spectrum(&wavenumbers, &media_bands, 1.5, &mut rng))
        .collect();

    let media_rows: Vec<Row> = media
        .iter()
        .enumerate()
        .map(|(i, y)| Row {
            sample: format!("Media_{}", i + 1),
            datetime: String::new(),
            y: y.clone(),
        })
        .collect();

    let start = NaiveDate::from_ymd_opt(2023, 5, 17)
        .and_then(|d| d.and_hms_opt(9, 0, 0))
        .context("building start time")?;

    let mut rows = Vec::new();
    for i in 0..60 {
        let datetime = (start + Duration::minutes(3 * i as i64))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        // Every third spectrum catches bacteria; the rest are verbatim media reads.
        let y = if i % 3 == 0 {
            let scale = 0.5 + rng.next_f64();
            let bands: Vec<(f64, f64, f64)> = media_bands
                .iter()
                .copied()
                .chain(bacteria_bands.iter().map(|&(mu, s, a)| (mu, s, a * scale)))
                .collect();
            generate_spectrum(&wavenumbers, &bands, 1.5, &mut rng)
        } else {
            media[i % media.len()].clone()
        };
        rows.push(Row {
            sample: format!("Well_{:02}", i % 12 + 1),
            datetime,
            y,
        });
    }

    write_wide_csv("media.csv", &wavenumbers, &media_rows)?;
    write_wide_csv("experimental.csv", &wavenumbers, &rows)?;
    write_parquet("experimental.parquet", &wavenumbers, &rows)?;

    println!(
        "Wrote {} measurement and {} media spectra ({} wavenumbers each)",
        rows.len(),
        media_rows.len(),
        wavenumbers.len()
    );
    Ok(())
}

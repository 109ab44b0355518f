use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use raman_triage::data::filter::Selection;
use raman_triage::data::loader::{load_file, load_reference, load_temporal_index};
use raman_triage::report::{JsonReport, ReportSink, TextReport};
use raman_triage::{Analysis, AnalysisConfig, Engine, EngineKind, Label, TemporalIndex};

#[derive(Parser)]
#[command(
    name = "raman-triage",
    version,
    about = "Classify Raman spectra as strong (signal) or weak (media background)"
)]
struct Cli {
    /// Measurement table (.csv, .json or .parquet)
    #[arg(short, long)]
    input: PathBuf,

    /// Engine: otsu, iqr or waveform
    #[arg(short, long, default_value = "otsu")]
    engine: EngineKind,

    /// Media spectra for the waveform engine
    #[arg(short, long)]
    reference: Option<PathBuf>,

    /// Row/timestamp table; without it timestamps come from the metadata column
    #[arg(short, long)]
    timestamps: Option<PathBuf>,

    /// Skip the temporal pass entirely
    #[arg(long, default_value_t = false)]
    no_temporal: bool,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Otsu relaxation factor override, in (0, 1]
    #[arg(long)]
    relax: Option<f64>,

    /// IQR multiplier override
    #[arg(short, long)]
    k: Option<f64>,

    /// Waveform match tolerance override
    #[arg(long)]
    tolerance: Option<f64>,

    /// Field separator override for delimited files
    #[arg(long)]
    separator: Option<char>,

    /// Emit JSON instead of text
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Print the ids of rows with this label (strong or weak) instead of a report
    #[arg(long)]
    list: Option<Label>,

    /// Restrict --list to rows whose metadata matches; repeatable for one column
    #[arg(long = "where", value_name = "COLUMN=VALUE", requires = "list")]
    selection: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::load_from_file(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(v) = cli.relax {
        config.relax_factor = v;
    }
    if let Some(v) = cli.k {
        config.k = v;
    }
    if let Some(v) = cli.tolerance {
        config.match_tolerance = v;
    }
    if let Some(v) = cli.separator {
        config.separator = v;
    }
    config.validate()?;

    let matrix = load_file(&cli.input, config.separator)?;
    let reference = match &cli.reference {
        Some(path) => Some(load_reference(path, config.separator)?),
        None => None,
    };
    let engine = Engine::from_config(cli.engine, &config, reference)
        .with_context(|| format!("configuring {} engine", cli.engine))?;

    let index: Option<TemporalIndex> = if cli.no_temporal {
        None
    } else if let Some(path) = &cli.timestamps {
        Some(load_temporal_index(path, config.separator)?)
    } else if matrix
        .column_names()
        .iter()
        .any(|c| *c == config.timestamp_column)
    {
        let (index, _skipped) = TemporalIndex::from_metadata(&matrix, &config.timestamp_column);
        Some(index)
    } else {
        info!(
            "no '{}' column and no timestamp table; skipping temporal pass",
            config.timestamp_column
        );
        None
    };

    let analysis = Analysis::run(&matrix, &engine, index.as_ref(), &config)?;

    if let Some(label) = cli.list {
        let selection = Selection::parse(&cli.selection)?;
        let mut out = BufWriter::new(io::stdout().lock());
        for id in selection.rows(&matrix, &analysis.classification, label) {
            writeln!(out, "{id}")?;
        }
        out.flush()?;
        return Ok(());
    }

    let stdout = BufWriter::new(io::stdout().lock());
    let mut sink: Box<dyn ReportSink> = if cli.json {
        Box::new(JsonReport::new(stdout))
    } else {
        Box::new(TextReport::new(stdout))
    };
    sink.consume(&matrix, &analysis)
}

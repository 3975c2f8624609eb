use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use csv::WriterBuilder;
use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use light_outlier::anomaly::half_space_tree::{HalfSpaceTree, HalfSpaceTreeConfig};
use light_outlier::anomaly::rs_hash::{RsHash, RsHashConfig};
use light_outlier::anomaly::AnomalyDetector;
use light_outlier::stream::iter_csv::IterCsv;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Model {
    /// Half-space trees
    Hst,
    /// RS-Hash
    RsHash,
}

#[derive(Debug, Parser)]
#[command(name = "light-outlier")]
#[command(about = "Score every row of a CSV stream with an online anomaly detector", long_about = None)]
struct Cli {
    /// Detector to run
    #[arg(short, long, value_enum, default_value = "hst")]
    model: Model,

    /// Input CSV file with a header row
    #[arg(short, long)]
    input: PathBuf,

    /// Output CSV file (standard output when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON file holding the detector parameters
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma separated columns left out of the observations
    #[arg(long, value_delimiter = ',')]
    skip: Vec<String>,

    /// Seed of the detector, overrides the configuration file
    #[arg(long)]
    seed: Option<u64>,
}

fn load_config<C: DeserializeOwned + Default>(path: Option<&Path>) -> Result<C> {
    let Some(path) = path else {
        return Ok(C::default());
    };
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

fn run<D: AnomalyDetector<f64>>(mut detector: D, cli: &Cli) -> Result<()> {
    let skip = cli.skip.iter().cloned().collect();
    let rows = IterCsv::<f64, BufReader<File>>::from_path(&cli.input, skip)
        .with_context(|| format!("cannot read {}", cli.input.display()))?;
    info!(features = ?rows.feature_names(), "reading stream");

    let output: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut csv_writer = WriterBuilder::new().has_headers(false).from_writer(output);
    csv_writer.write_record(["score"])?;

    let start = Instant::now();
    let mut flagged: u64 = 0;
    for row in rows {
        let x = row?;
        match detector.fit_score(&x)? {
            Some(score) => {
                if score != 0.0 {
                    flagged += 1;
                }
                csv_writer.write_record([score.to_string()])?;
            }
            // Still warming up.
            None => csv_writer.write_record([""])?,
        }
    }
    csv_writer.flush()?;

    info!(
        observations = detector.n_seen(),
        flagged,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "stream scored"
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.model {
        Model::Hst => {
            let mut config: HalfSpaceTreeConfig = load_config(cli.config.as_deref())?;
            if cli.seed.is_some() {
                config.seed = cli.seed;
            }
            info!(?config, "half-space trees");
            run(HalfSpaceTree::new(config)?, &cli)
        }
        Model::RsHash => {
            let mut config: RsHashConfig = load_config(cli.config.as_deref())?;
            if cli.seed.is_some() {
                config.seed = cli.seed;
            }
            info!(?config, "RS-Hash");
            run(RsHash::new(config)?, &cli)
        }
    }
}

use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use clap::{Parser, Subcommand};

use ocmap::config::PipelineConfig;
use ocmap::data::Raster;
use ocmap::forest::QuantileForest;
use ocmap::{io, pipeline, prediction};

#[derive(Parser, Debug)]
#[clap(
    name = "ocmap",
    version,
    about = "Spatial prediction of seafloor organic carbon with quantile regression forests."
)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Screen covariates, select a model with spatial cross-validation and map the prediction.
    Run {
        /// CSV of observations with x, y, the response and covariate columns.
        #[clap(long)]
        observations: PathBuf,

        /// XYZ CSV of covariate layers at grid cell centers.
        #[clap(long)]
        grid: PathBuf,

        /// TOML run configuration; defaults apply when omitted.
        #[clap(long)]
        config: Option<PathBuf>,

        /// Output directory.
        #[clap(long)]
        out: PathBuf,

        #[clap(long, default_value = "toc")]
        response: String,

        /// Sample depth column, needed for `depth_interval_bounds`.
        #[clap(long)]
        depth: Option<String>,
    },
    /// Apply a saved model to a new covariate grid.
    Predict {
        #[clap(long)]
        model: PathBuf,

        #[clap(long)]
        grid: PathBuf,

        /// Output CSV.
        #[clap(long)]
        out: PathBuf,

        #[clap(long, value_delimiter = ',', default_value = "0.05,0.5,0.95")]
        quantiles: Vec<f64>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let start = Instant::now();

    let args = Args::parse();
    let outcome = match args.command {
        Command::Run {
            observations,
            grid,
            config,
            out,
            response,
            depth,
        } => run(
            &observations,
            &grid,
            config.as_deref(),
            &out,
            &response,
            depth.as_deref(),
        ),
        Command::Predict {
            model,
            grid,
            out,
            quantiles,
        } => predict(&model, &grid, &out, &quantiles),
    };

    if let Err(e) = outcome {
        log::error!("{e}");
        process::exit(1);
    }
    log::info!("Finished in {:.1?}", start.elapsed());
}

fn quantile_layers(prediction: &prediction::GridPrediction) -> Vec<(String, &Raster)> {
    let mut layers: Vec<(String, &Raster)> = prediction
        .levels
        .iter()
        .zip(&prediction.quantiles)
        .map(|(q, r)| (format!("q{q}"), r))
        .collect();
    layers.push(("median".to_string(), &prediction.median));
    layers.push(("interval_width".to_string(), &prediction.interval_width));
    layers.push(("interval_ratio".to_string(), &prediction.interval_ratio));
    layers
}

fn write_layers(path: &Path, layers: &[(String, &Raster)]) -> ocmap::Result<()> {
    let named: Vec<(&str, &Raster)> = layers.iter().map(|(n, r)| (n.as_str(), *r)).collect();
    io::write_raster_table(path, &named)
}

fn run(
    observations: &Path,
    grid: &Path,
    config: Option<&Path>,
    out: &Path,
    response: &str,
    depth: Option<&str>,
) -> ocmap::Result<()> {
    let config = match config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let observations = io::read_observations(observations, response, depth)?;
    let grid = io::read_grid(grid)?;

    let output = pipeline::run(&observations, &grid, &config)?;

    std::fs::create_dir_all(out)?;
    let mut layers = quantile_layers(&output.prediction);
    layers.push((
        "dissimilarity".to_string(),
        &output.applicability.dissimilarity,
    ));
    layers.push(("in_domain".to_string(), &output.applicability.mask));
    write_layers(&out.join("prediction.csv"), &layers)?;
    io::write_summary(out.join("summary.toml"), &output.summary)?;
    output.model.save(out.join("model.toml"))?;
    std::fs::write(out.join("config.toml"), config.to_toml()?)?;

    log::info!(
        "Wrote prediction, summary and model for predictors {:?} to {}",
        output.predictors,
        out.display()
    );
    Ok(())
}

fn predict(model: &Path, grid: &Path, out: &Path, quantiles: &[f64]) -> ocmap::Result<()> {
    let model = QuantileForest::load(model)?;
    let grid = io::read_grid(grid)?;
    let prediction = prediction::predict_grid(&model, &grid, quantiles)?;
    write_layers(out, &quantile_layers(&prediction))
}

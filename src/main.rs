use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use olap_cube::{
    CubeBuilder, CubeConfig, CubeQuery, CubeSpec, DEFAULT_ID_FIELD, DimensionSpec, LoadOptions,
    MetricEntry, MetricSpec, load_cube, load_facts, write_cube_to_dir,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Debug, Parser)]
#[command(name = "olap-cube", version, about = "Build and query OLAP cubes over fact tables")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a fact CSV, build a cube and write it out
    Build(BuildArgs),
    /// Total a metric column per dimension value and report the least and most
    Report(ReportArgs),
}

#[derive(Debug, Args)]
struct BuildArgs {
    /// Cleaned fact table (CSV with header)
    #[arg(long)]
    input: PathBuf,

    /// Grouping dimension; repeat for multi-key cubes
    #[arg(long = "dimension", value_name = "FIELD")]
    dimensions: Vec<String>,

    /// Metric as field=op[,op...], ops from sum, mean, count, min, max
    #[arg(long = "metric", value_name = "FIELD=OPS")]
    metrics: Vec<MetricEntry>,

    /// JSON cube spec; used when no --dimension/--metric is given
    #[arg(long, conflicts_with_all = ["dimensions", "metrics"])]
    spec: Option<PathBuf>,

    /// Field holding the record id
    #[arg(long, default_value = DEFAULT_ID_FIELD)]
    id_field: String,

    #[arg(long, default_value = "data/olap_cubing_outputs")]
    output_dir: PathBuf,

    #[arg(long, default_value = "multidimensional_olap_cube.csv")]
    file_name: String,

    /// Aggregate groups on a single thread
    #[arg(long)]
    sequential: bool,
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Cube CSV written by `build`
    #[arg(long)]
    cube: PathBuf,

    /// Number of leading dimension columns in the cube file
    #[arg(long, default_value_t = 1)]
    dimension_count: usize,

    /// Dimension to total by
    #[arg(long)]
    dimension: String,

    /// Metric column to total, e.g. sale_amount_sum
    #[arg(long)]
    metric_column: String,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Build(args) => build(args),
        Command::Report(args) => report(args),
    }
}

fn build(args: BuildArgs) -> Result<()> {
    info!("Starting OLAP cubing process...");

    let spec = match &args.spec {
        Some(path) => CubeSpec::from_path(path)
            .with_context(|| format!("reading cube spec {}", path.display()))?,
        None => {
            let mut metrics = MetricSpec::new();
            for entry in args.metrics {
                metrics.push(entry);
            }
            CubeSpec {
                dimensions: DimensionSpec::new(args.dimensions),
                metrics,
            }
        }
    };
    if spec.dimensions.is_empty() {
        bail!("no dimensions given: pass --dimension or --spec");
    }

    let options = LoadOptions {
        id_field: args.id_field,
        ..LoadOptions::default()
    };
    let (batch, summary) = load_facts(&args.input, &options)
        .with_context(|| format!("loading facts from {}", args.input.display()))?;
    for error in summary.errors.iter().take(10) {
        warn!(row = error.row, column = %error.column, value = %error.value, "{}", error.error);
    }

    let builder = CubeBuilder::new(CubeConfig {
        parallel: !args.sequential,
    });
    let cube = builder
        .build(&batch, &spec.dimensions, &spec.metrics)
        .context("building OLAP cube")?;

    let path = write_cube_to_dir(&cube, &args.output_dir, &args.file_name)
        .context("writing OLAP cube")?;

    info!("OLAP cubing process completed successfully.");
    info!("Please see outputs in {}", path.display());
    Ok(())
}

fn report(args: ReportArgs) -> Result<()> {
    let cube = load_cube(&args.cube, args.dimension_count)
        .with_context(|| format!("loading cube {}", args.cube.display()))?;
    let query = CubeQuery::new(&cube);

    let totals = query.sum_by_dimension_value(&args.dimension, &args.metric_column)?;
    for (value, total) in &totals {
        println!("{value}\t{total:.2}");
    }

    let (least, least_total) = query.least(&args.dimension, &args.metric_column)?;
    let (most, most_total) = query.most(&args.dimension, &args.metric_column)?;
    info!(
        "Least {} by {}: {least} ({least_total:.2}); most: {most} ({most_total:.2})",
        args.metric_column, args.dimension
    );
    Ok(())
}

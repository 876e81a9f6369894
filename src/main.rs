use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use etl_reconcile::app::ports::RawSourcePort;
use etl_reconcile::app::reconcile_use_case::ReconcileUseCase;
use etl_reconcile::config::Config;
use etl_reconcile::domain::format_dimensions;
use etl_reconcile::infra::{FileWarningReportAdapter, JsonlRawSource, JsonlSeriesStore};
use etl_reconcile::logging;
use etl_reconcile::observability;
use etl_reconcile::pipeline::check_continuity;

#[derive(Parser)]
#[command(name = "etl_reconcile")]
#[command(about = "Normalize, continuity-check and reconcile utility time series")]
#[command(version)]
struct Cli {
    /// Directory for the rolling JSON log files
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a raw extract against the store and append what is new
    Run {
        /// Pipeline TOML file
        #[arg(long)]
        config: PathBuf,
        /// Raw extract, one JSON row per line
        #[arg(long)]
        raw: PathBuf,
        /// Persisted series, one JSON record per line (appended to)
        #[arg(long)]
        store: PathBuf,
        /// Overrides `[output] warnings` from the config
        #[arg(long)]
        warnings: Option<PathBuf>,
        /// Write a Prometheus text rendering of the run's metrics here
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },
    /// Normalize a raw extract and report continuity problems only
    Check {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        raw: PathBuf,
    },
}

fn warnings_path(config: &Config, flag: Option<PathBuf>, store: &Path) -> PathBuf {
    flag.or_else(|| config.output.warnings.clone())
        .unwrap_or_else(|| store.with_extension("warnings.txt"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init_logging(&cli.log_dir);

    match cli.command {
        Commands::Run {
            config,
            raw,
            store,
            warnings,
            metrics_out,
        } => {
            let config = Config::load(&config)?;
            if metrics_out.is_some() {
                if let Err(e) = observability::init() {
                    warn!("Metrics disabled: {}", e);
                }
            }

            let warnings = warnings_path(&config, warnings, &store);
            info!("Warnings for '{}' go to {:?}", config.pipeline.name, warnings);

            let use_case = ReconcileUseCase::new(
                config.pipeline.name.clone(),
                config.settings()?,
                Box::new(JsonlRawSource::new(raw)),
                Box::new(JsonlSeriesStore::new(store.clone())),
                Box::new(JsonlSeriesStore::new(store)),
                Box::new(FileWarningReportAdapter::new(warnings)),
            )
            .with_retry(config.retry_policy())
            .with_lookback_days(config.pipeline.lookback_days);

            let result = use_case.execute().await;

            if let (Some(path), Some(rendered)) = (metrics_out, observability::render()) {
                tokio::fs::write(&path, rendered).await?;
                info!("Wrote metrics to {:?}", path);
            }

            let summary = result?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Check { config, raw } => {
            let config = Config::load(&config)?;
            let rows = JsonlRawSource::new(raw).load_raw().await?;
            let check = check_continuity(&config.settings()?, &rows)?;

            for warning in &check.normalization.warnings {
                println!("{}", warning);
            }
            for series in &check.continuity.series {
                println!(
                    "{}: {} observed, {} expected, {} gap(s), {} expected DST skip(s){}",
                    format_dimensions(&series.dimensions),
                    series.observed,
                    series.expected,
                    series.gaps.len(),
                    series.expected_skips.len(),
                    if series.needs_review { ", needs review" } else { "" }
                );
            }
            for warning in check.continuity.warnings() {
                println!("{}", warning);
            }
            if check.continuity.is_continuous() && check.normalization.warnings.is_empty() {
                println!("no warnings");
            }
        }
    }

    Ok(())
}

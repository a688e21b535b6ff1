use std::path::PathBuf;
use std::process::ExitCode;

use arv_adapters::SourceSpec;
use arv_pipeline::{CancelFlag, PipelineConfig, PipelineError, ReviewPipeline, RunSummary};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "arv-cli")]
#[command(about = "Collect, clean, and persist app-store reviews for tracked banking apps")]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Collect, clean, and write the canonical table.
    Run,
    /// Collect and write the uncleaned table only.
    Collect,
    /// Clean an existing raw table.
    Clean {
        #[arg(long)]
        input: PathBuf,
    },
}

#[derive(Debug, Args)]
struct Overrides {
    #[arg(long, global = true)]
    apps_file: Option<PathBuf>,
    #[arg(long, global = true)]
    output: Option<PathBuf>,
    #[arg(long, global = true)]
    raw_output: Option<PathBuf>,
    #[arg(long, global = true)]
    reviews_per_app: Option<usize>,
    #[arg(long, global = true)]
    page_size: Option<usize>,
    /// Read reviews from a local fixture file instead of the network.
    #[arg(long, global = true, conflicts_with = "source_url")]
    fixtures: Option<PathBuf>,
    #[arg(long, global = true)]
    source_url: Option<String>,
    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,
    /// Cap on HTTP requests started per second across all apps.
    #[arg(long, global = true)]
    rate_limit_per_sec: Option<f64>,
}

impl Overrides {
    fn apply(self, config: &mut PipelineConfig) {
        if let Some(path) = self.apps_file {
            config.apps_file = path;
        }
        if let Some(path) = self.output {
            config.output_path = Some(path);
        }
        if let Some(path) = self.raw_output {
            config.raw_output_path = Some(path);
        }
        if let Some(count) = self.reviews_per_app {
            config.reviews_per_app = count;
        }
        if let Some(size) = self.page_size {
            config.page_size = size;
        }
        if let Some(path) = self.fixtures {
            config.source = SourceSpec::Fixture { path };
        }
        if let Some(base_url) = self.source_url {
            config.source = SourceSpec::Http { base_url };
        }
        if let Some(dir) = self.reports_dir {
            config.reports_dir = Some(dir);
        }
        if let Some(rate) = self.rate_limit_per_sec.filter(|r| *r > 0.0) {
            config.rate_limit_per_sec = Some(rate);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn execute(cli: Cli) -> Result<RunSummary, PipelineError> {
    let mut config = PipelineConfig::from_env();
    cli.overrides.apply(&mut config);

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping at the next page boundary");
            on_signal.cancel();
        }
    });

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => ReviewPipeline::new(config, cancel)?.run().await,
        Commands::Collect => ReviewPipeline::new(config, cancel)?.collect().await,
        Commands::Clean { input } => ReviewPipeline::offline(config)?.clean_file(input).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(summary) => {
            println!("{}", summary.render_markdown());
            let failed = summary.failed_apps();
            if !failed.is_empty() {
                warn!(failed = failed.len(), "some apps produced no reviews");
            }
            info!(run_id = %summary.run_id, rows = summary.final_rows(), "done");
            ExitCode::SUCCESS
        }
        Err(PipelineError::Validation(err)) => {
            error!("{err}");
            ExitCode::from(2)
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

use std::error::Error;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use tracing::{Subscriber, error};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use dcf_valuation::api::{AppState, run_http_server};
use dcf_valuation::config::ValuationConfig;
use dcf_valuation::io::RUN_LOG_FILE;
use dcf_valuation::pipeline::{PipelineError, run_pipeline};

/// Discounted cash flow valuation of a company from its historical statements.
#[derive(Parser)]
#[command(name = "dcf-valuation")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Value every configured scenario and write the artifacts
    Run {
        /// Directory holding the three statement CSVs
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        #[arg(long, default_value = "outputs")]
        output_dir: PathBuf,

        /// TOML configuration; built-in defaults when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Serve the dashboard and JSON API over the last run's artifacts
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,

        #[arg(long, default_value = "outputs")]
        output_dir: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Run {
            data_dir,
            output_dir,
            config,
        } => run(&data_dir, &output_dir, config.as_deref()),
        Command::Serve {
            port,
            output_dir,
            config,
        } => serve(port, output_dir, config.as_deref()).await,
    };

    if let Err(e) = outcome {
        error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(data_dir: &Path, output_dir: &Path, config: Option<&Path>) -> Result<(), Box<dyn Error>> {
    init_tracing(Some(open_run_log(output_dir)?));

    let config = ValuationConfig::load(config)?;
    run_pipeline(&config, data_dir, output_dir)?;
    Ok(())
}

/// Creates `output_dir` if needed and truncates its run log.
fn open_run_log(output_dir: &Path) -> Result<File, PipelineError> {
    let io_error = |path: PathBuf| move |source: std::io::Error| PipelineError::Io { path, source };
    fs::create_dir_all(output_dir).map_err(io_error(output_dir.to_path_buf()))?;
    let log_path = output_dir.join(RUN_LOG_FILE);
    File::create(&log_path).map_err(io_error(log_path))
}

async fn serve(
    port: u16,
    output_dir: PathBuf,
    config: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    init_tracing(None);
    let config = ValuationConfig::load(config)?;
    run_http_server(port, AppState::new(output_dir, config))
        .await
        .map_err(|e| format!("server error: {e}"))?;
    Ok(())
}

/// Console output always; for batch runs also a plain-text copy in the
/// output directory, truncated per run.
fn subscriber(log_file: Option<File>) -> impl Subscriber + Send + Sync + 'static {
    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
}

fn init_tracing(log_file: Option<File>) {
    subscriber(log_file).init();
}

use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use studylink::app::App;
use studylink::config::{ConfigLoader, ResolvedConfig};
use studylink::domain::Locator;
use studylink::error::IngestError;
use studylink::fetch::{CancelToken, HttpFetcher};
use studylink::output::{JsonOutput, OutputMode};
use studylink::source::DataSourceRegistry;
use studylink::store::MetadataStore;

#[derive(Parser)]
#[command(name = "studylink")]
#[command(about = "Ingest imaging studies from a link or local files and pick the viewer mode")]
#[command(version, author)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    #[arg(long, global = true)]
    config: Option<String>,

    /// Mode opened when no study needs the specialized viewer.
    #[arg(long, global = true)]
    mode: Option<String>,

    /// Fetch timeout in seconds; 0 disables it.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Treat the microscopy extension as unavailable.
    #[arg(long, global = true)]
    no_extension: bool,

    /// Print only the navigation path.
    #[arg(long, global = true)]
    path_only: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch a remote .zip or .dcm link and route its studies")]
    Open { locator: String },
    #[command(about = "Load local files or directories and route their studies")]
    Load {
        #[arg(required = true)]
        paths: Vec<Utf8PathBuf>,
    },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<IngestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IngestError) -> u8 {
    match error {
        IngestError::InvalidLocator(_) | IngestError::Lookup(_) => 2,
        IngestError::Retrieval(_)
        | IngestError::RetrievalStatus { .. }
        | IngestError::Cancelled
        | IngestError::Extraction(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli.common)?;
    let output_mode = if cli.common.path_only {
        OutputMode::PathOnly
    } else {
        OutputMode::Json
    };

    let fetcher = HttpFetcher::new(config.timeout)?;
    let app = App::new(fetcher, DataSourceRegistry::with_defaults(), config);
    let store = MetadataStore::new();

    let outcome = match cli.command {
        Commands::Open { locator } => {
            let locator: Locator = locator.parse()?;
            app.ingest_locator(&locator, &store, &CancelToken::new(), &JsonOutput)?
        }
        Commands::Load { paths } => app.ingest_selection(&paths, &store, &JsonOutput)?,
    };

    JsonOutput::print_outcome(&outcome, output_mode).into_diagnostic()?;
    store.clear();
    Ok(())
}

fn resolve_config(args: &CommonArgs) -> miette::Result<ResolvedConfig> {
    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    if let Some(mode) = &args.mode {
        config.default_mode = mode.clone();
    }
    if let Some(secs) = args.timeout {
        config.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if args.no_extension {
        config.extensions.clear();
    }
    Ok(config)
}

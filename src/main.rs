mod cli;
mod console;

use clap::Parser;
use cli::{Cli, Commands, DownloadArgs, FetchArgs};
use console::ConsoleReporter;
use inkfetch::config::Config;
use inkfetch::fetcher::HttpFetcher;
use inkfetch::locator::{self, ManifestLocator};
use inkfetch::model::DownloadJob;
use inkfetch::observability::{self, Metrics};
use inkfetch::orchestrator::DownloadOrchestrator;
use inkfetch::progress::{FanoutReporter, ProgressReporter, TracingReporter};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Some chapters failed, partially failed or were never started
const EXIT_INCOMPLETE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, BoxError> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path.clone())?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Fetch(args) => {
            observability::init_tracing(config.logging.enable_logs, &config.logging.filter);
            fetch(&config, args).await
        }
        Commands::Download(args) => {
            apply_overrides(&mut config, &args);
            config.validate()?;
            observability::init_tracing(
                config.logging.enable_logs || args.verbose,
                &config.logging.filter,
            );
            download(&config, args).await
        }
        Commands::Config => {
            let path = cli.config.unwrap_or_else(inkfetch::config::config_path);
            println!("# inkfetch configuration (file: {})", path.display());
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn apply_overrides(config: &mut Config, args: &DownloadArgs) {
    if let Some(format) = args.format {
        config.download.format = format;
    }
    if let Some(output) = &args.output {
        config.download.directory = output.clone();
    }
    if let Some(n) = args.max_chapters {
        config.download.max_concurrent_chapters = n;
    }
    if let Some(n) = args.max_images {
        config.download.max_concurrent_images = n;
    }
    if args.discard_images {
        config.download.keep_images = false;
    }
}

async fn fetch(config: &Config, args: FetchArgs) -> Result<ExitCode, BoxError> {
    let http = HttpFetcher::new(&config.http_config())?;
    let locator = ManifestLocator::new(http.client().clone());

    let work = locator::load_work(&locator, &args.manifest, &TracingReporter).await?;
    console::print_work(&work);

    Ok(ExitCode::SUCCESS)
}

async fn download(config: &Config, args: DownloadArgs) -> Result<ExitCode, BoxError> {
    let http = HttpFetcher::new(&config.http_config())?;
    let locator = ManifestLocator::new(http.client().clone());

    let metrics = Arc::new(Metrics::new());
    let reporter: Arc<dyn ProgressReporter> = Arc::new(FanoutReporter::new(vec![
        Box::new(ConsoleReporter::new()),
        Box::new(metrics.clone()),
        Box::new(TracingReporter),
    ]));

    let mut work = locator::load_work(&locator, &args.manifest, reporter.as_ref()).await?;
    let selection = args.chapters.resolve(work.chapters.len())?;
    locator::resolve_selection(&locator, &mut work, &selection, reporter.as_ref()).await?;

    let job = DownloadJob::new(work, selection, config.to_settings());
    info!(job_id = %job.id, dir = %config.download.directory.display(), "Job created");

    let orchestrator = DownloadOrchestrator::new(Arc::new(http), reporter);
    let watcher = tokio::spawn(cancel_on_signal(orchestrator.cancel_token()));

    let result = orchestrator.run(job).await;
    watcher.abort();
    let summary = result?;

    console::print_summary(&summary, &metrics.snapshot());

    if summary.is_complete_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_INCOMPLETE))
    }
}

async fn cancel_on_signal(cancel: CancellationToken) {
    shutdown_signal().await;
    eprintln!("Cancelling: finishing chapters in progress, no new chapters will start");
    cancel.cancel();
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

use std::process;
use std::sync::Arc;

use clap::Parser;
use streamgrab::cli::Args;
use streamgrab::config::AppConfig;
use streamgrab::error::{AppError, Result};
use streamgrab::progress::spawn_reporter;
use streamgrab::utils::parse_params;
use streamgrab_engine::{
    CookieJar, DownloadRequest, DownloadSession, EventSink, FfmpegTool, SessionOutcome,
    install_rustls_provider,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Exit status when the session ran but produced no complete file.
const EXIT_INCOMPLETE: i32 = 1;
/// Exit status for usage, configuration and setup errors.
const EXIT_ERROR: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(EXIT_INCOMPLETE),
        Err(e) => {
            error!("Application error: {}", e);
            eprintln!("Error: {}", e);
            process::exit(EXIT_ERROR);
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    install_rustls_provider();

    let config = AppConfig::load(args.config.as_deref())?.with_args(&args)?;
    let metadata = parse_params(&args.metadata)?;
    let options = config.merge_options(metadata, args.thumbnail.clone());
    let request = build_request(&args, &config).await?;

    info!(
        url = %request.url,
        output = %request.output_file().display(),
        quality = %request.quality,
        "Starting session"
    );

    let token = CancellationToken::new();
    spawn_interrupt_handler(token.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = spawn_reporter(rx, args.quiet || args.json);

    let session = DownloadSession::new(
        config.downloader_config(),
        Arc::new(FfmpegTool::with_config(config.tool_config())),
        EventSink::new(tx),
    );
    let outcome = session.run(&request, &options, token).await;
    drop(session);
    if let Err(e) = reporter.await {
        warn!("Progress reporter stopped abnormally: {e}");
    }

    report(&outcome, args.json)?;
    Ok(outcome.success)
}

async fn build_request(args: &Args, config: &AppConfig) -> Result<DownloadRequest> {
    let output_dir = config.output_dir();
    tokio::fs::create_dir_all(&output_dir).await?;

    let session_name = match &args.name {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        Some(_) => return Err(AppError::InvalidInput("session name is empty".to_string())),
        None => chrono::Local::now()
            .format("stream_%Y%m%d-%H%M%S")
            .to_string(),
    };

    let mut cookies = match &args.cookies {
        Some(path) => Some(CookieJar::from_netscape_file(path).await?),
        None => None,
    };
    if !args.cookie.is_empty() {
        let jar = cookies.get_or_insert_with(CookieJar::new);
        for (name, value) in parse_params(&args.cookie)? {
            jar.insert(name, value);
        }
    }

    let mut request = DownloadRequest::new(&args.url, output_dir, session_name);
    request.quality = config.quality.clone();
    request.max_fragments = args.max_fragments;
    request.cookies = cookies;
    request.resume = args.resume;
    request.container_extension = config.container.clone();
    Ok(request)
}

/// First Ctrl-C stops the download and lets the partial file be written;
/// a second one exits immediately.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received, stopping download (press Ctrl-C again to exit now)");
        token.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            error!("Second interrupt received, exiting");
            process::exit(EXIT_INTERRUPTED);
        }
    });
}

fn report(outcome: &SessionOutcome, json: bool) -> Result<()> {
    if json {
        let status = if outcome.success { "success" } else { "failed" };
        let value = serde_json::json!({
            "status": status,
            "output": outcome.output_path.as_ref().map(|p| p.display().to_string()),
            "fragments_downloaded": outcome.fragments_downloaded,
            "fragments_total": outcome.fragments_total,
            "reason": outcome.reason,
            "degraded_stages": outcome
                .degraded_stages
                .iter()
                .map(|stage| stage.as_str())
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match (&outcome.output_path, outcome.success) {
        (Some(path), true) => {
            info!(
                fragments = outcome.fragments_downloaded,
                "Saved {}",
                path.display()
            );
            for stage in &outcome.degraded_stages {
                warn!("The {stage} step failed, the file was kept without it");
            }
        }
        (Some(path), false) => warn!(
            reason = outcome.reason.as_deref().unwrap_or("unknown"),
            "Download incomplete, saved partial file {}",
            path.display()
        ),
        (None, _) => error!(
            reason = outcome.reason.as_deref().unwrap_or("unknown"),
            "Download failed, no output file was produced"
        ),
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_level(verbose))
        .init();
}

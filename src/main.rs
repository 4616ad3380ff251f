//! CLI entry point for the repository mirror.

use anyhow::{Context, Result, bail};
use clap::Parser;
use mirror_core::{
    CancellationToken, ContentStore, Deduplicator, Downloader, HttpClient, Mirror, MirrorOptions,
    RepositoryTarget, RetryPolicy,
};
use tracing::{debug, error, info, warn};

mod app_config;
mod cli;

use app_config::{MirrorSettings, load_config};
use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let loaded = load_config(args.config.as_deref())?;
    let Some(file_config) = loaded.config else {
        info!(path = ?loaded.path, "No configuration file found; nothing to mirror");
        return Ok(());
    };
    if file_config.repositories.is_empty() {
        info!(path = ?loaded.path, "No repositories configured");
        return Ok(());
    }

    let settings = MirrorSettings::resolve(&args, file_config)?;
    debug!(?settings, "effective settings");

    let client =
        HttpClient::try_new_with_timeouts(settings.connect_timeout_secs, settings.read_timeout_secs)
            .context("Failed to build HTTP client")?;
    let downloader = Downloader::new(
        client,
        RetryPolicy::with_max_attempts(settings.max_retries),
        settings.concurrency,
    )?;
    let dedup = Deduplicator::new(ContentStore::new(&settings.store_dir), settings.link_mode);
    let mirror = Mirror::new(
        downloader,
        dedup,
        MirrorOptions {
            scratch_base: Some(settings.scratch_dir.clone()),
            failure_policy: settings.failure_policy,
        },
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling current repository");
            on_interrupt.cancel();
        }
    });

    let total = settings.repositories.len();
    let mut failed = 0usize;

    for entry in &settings.repositories {
        if cancel.is_cancelled() {
            failed += 1;
            continue;
        }

        let target = match RepositoryTarget::new(
            &entry.url,
            settings.mirror_dir.join(&entry.local_path),
        ) {
            Ok(target) => target
                .with_mirror_src(settings.mirror_src_for(&args, entry))
                .with_auth_token(entry.auth_token.clone()),
            Err(e) => {
                error!(url = %entry.url, error = %e, "Skipping repository");
                failed += 1;
                continue;
            }
        };

        info!(url = %entry.url, path = %target.destination().display(), "Mirroring repository");
        match mirror.mirror_with_cancellation(&target, cancel.clone()).await {
            Ok(report) => {
                for failure in &report.failures {
                    warn!(location = %failure.location, kind = %failure.kind, error = %failure.error, "File not mirrored");
                }
                info!(
                    url = %entry.url,
                    downloaded = report.downloaded,
                    deduplicated = report.deduplicated,
                    present = report.already_present,
                    failed = report.failed(),
                    "Repository done"
                );
            }
            Err(e) if e.is_cancelled() => {
                warn!(url = %entry.url, error = %e, "Repository cancelled");
                failed += 1;
            }
            Err(e) => {
                error!(url = %entry.url, error = %e, "Repository failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {total} repositories were not mirrored");
    }
    info!(total, "All repositories mirrored");
    Ok(())
}

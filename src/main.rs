//! Binary entrypoint for the lock-screen image renderer.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use lockscreen_image::config::Configuration;
use lockscreen_image::lockscreen::LockScreen;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "lockscreen-image", about = "Renders lock-screen image widgets")]
struct Cli {
    /// Path to YAML config file
    #[arg(value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Stop after this long (e.g. "30s", "5m")
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    run_for: Option<Duration>,

    /// Write a PNG of every output here before exiting
    #[arg(long, value_name = "DIR")]
    snapshot_dir: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(
            format!("lockscreen_image={level}")
                .parse()
                .context("invalid log directive")?,
        );
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let cfg = Configuration::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?
        .validated()
        .context("validating configuration")?;
    info!(
        outputs = cfg.outputs.len(),
        images = cfg.images.len(),
        "configuration loaded"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for ctrl-c");
                return;
            }
            info!("ctrl-c received; unlocking");
            cancel.cancel();
        });
    }
    if let Some(limit) = cli.run_for {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            info!(after = %humantime::format_duration(limit), "run time elapsed");
            cancel.cancel();
        });
    }

    let mut lock = LockScreen::new(&cfg, tokio::runtime::Handle::current())?;
    lock.run(cancel).await?;

    if let Some(dir) = &cli.snapshot_dir {
        lock.render_all();
        lock.snapshot(dir)?;
    }
    lock.shutdown();
    Ok(())
}

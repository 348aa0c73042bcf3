use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use irview_core::synthetic::{Pattern, SyntheticSource};
use irview_core::types::mean_intensity;
use irview_core::{
    FrameSource, IntensityNormalizer, MemorySink, PresentationSink, PumpStats, Session,
};
use irview_hw::InfraredCamera;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "irview", about = "Live infrared sensor viewer")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream infrared frames through the normalizer
    View {
        /// V4L2 device path (overrides config)
        #[arg(short, long)]
        device: Option<String>,
        /// Use a generated ramp instead of a sensor
        #[arg(long)]
        synthetic: bool,
        /// Stop after this many frame notifications
        #[arg(long)]
        frames: Option<u64>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
    /// Print the effective configuration
    Config,
    /// Print the normalized intensity of raw sample values
    Intensity {
        #[arg(required = true)]
        values: Vec<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::View {
            device,
            synthetic,
            frames,
            width,
            height,
        } => {
            if let Some(device) = device {
                config.device = device;
            }
            config.width = width.unwrap_or(config.width);
            config.height = height.unwrap_or(config.height);
            config.validate()?;
            view(&config, synthetic, frames).await?;
        }
        Commands::Config => {
            config.validate()?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Intensity { values } => {
            let normalizer = IntensityNormalizer::new(config.normalizer)?;
            for value in values {
                println!(
                    "{value}\t{}\t{:.4}",
                    normalizer.intensity(value),
                    normalizer.ratio(value)
                );
            }
        }
    }

    Ok(())
}

async fn view(config: &Config, synthetic: bool, frames: Option<u64>) -> Result<()> {
    let normalizer = IntensityNormalizer::new(config.normalizer)?;
    tracing::info!(
        scene_scale = normalizer.config().scene_scale(),
        rounding = ?normalizer.config().rounding,
        "calibration loaded"
    );
    let mut source: Box<dyn FrameSource> = if synthetic {
        let mut source = SyntheticSource::new(Pattern::Ramp);
        if let Some(n) = frames {
            source = source.with_frame_limit(n);
        }
        Box::new(source)
    } else {
        Box::new(InfraredCamera::new(config.device.clone()))
    };

    let sink = MemorySink::new();
    let session = Session::start(
        source.as_mut(),
        Some(config.geometry()?),
        normalizer,
        sink.clone(),
    )
    .context("failed to start infrared stream")?;
    tracing::info!(geometry = %session.geometry(), synthetic, "viewer running");

    let mut ticker = tokio::time::interval(Duration::from_millis(config.stats_interval_ms));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res?;
                tracing::info!("interrupted");
                break;
            }
            _ = ticker.tick() => {
                let stats = session.stats();
                let display = sink.snapshot();
                tracing::info!(
                    presented = stats.presented,
                    dropped = stats.dropped(),
                    mean_intensity = mean_intensity(&display.front),
                    "stream stats"
                );
                let reached_limit =
                    frames.is_some_and(|n| stats.presented + stats.dropped() >= n);
                if session.is_finished() || reached_limit {
                    break;
                }
            }
        }
    }

    let stats = close_session(session).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Close joins the capture worker, so run it off the async runtime.
async fn close_session<S>(session: Session<S>) -> Result<PumpStats>
where
    S: PresentationSink + Send + 'static,
    S::Surface: Send,
{
    let stats = tokio::task::spawn_blocking(move || session.close())
        .await
        .context("session close task failed")?;
    Ok(stats)
}

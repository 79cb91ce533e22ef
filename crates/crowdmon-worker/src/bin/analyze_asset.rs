//! Analyze one image or video from the command line and print its event
//! stream as JSON lines.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crowdmon_events::SubscriptionFilter;
use crowdmon_media::kind_for_extension;
use crowdmon_models::{Event, MediaKind};
use crowdmon_worker::{Orchestrator, WorkerConfig};

#[derive(Debug, Parser)]
#[command(name = "analyze-asset", about = "Run crowd analysis on a single asset")]
struct Args {
    /// Image or video file
    path: PathBuf,

    /// image or video; guessed from the extension when omitted
    #[arg(long)]
    kind: Option<MediaKind>,

    /// Replay recorded detections from this JSON file
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Directory for the annotated output
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Skip writing annotated output
    #[arg(long)]
    no_output: bool,

    /// Print only the final event
    #[arg(long, short)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Logs go to stderr so stdout stays machine-readable.
    let env_filter = EnvFilter::from_default_env().add_directive("crowdmon=warn".parse()?);
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(env_filter)
        .init();

    let kind = match args.kind {
        Some(kind) => kind,
        None => args
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(kind_for_extension)
            .with_context(|| {
                format!(
                    "cannot tell the media kind of {}; pass --kind",
                    args.path.display()
                )
            })?,
    };

    let mut config = WorkerConfig::from_env();
    if let Some(replay) = args.replay {
        config.replay_path = Some(replay);
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if args.no_output {
        config.annotate_output = false;
    }

    let orchestrator = Orchestrator::from_config(config, ".");
    let mut events = orchestrator.subscribe(SubscriptionFilter::All);
    orchestrator
        .initialize()
        .await
        .context("detection capabilities failed to load")?;

    let asset_ref = args.path.to_string_lossy().to_string();
    let job_id = orchestrator
        .submit(&asset_ref, kind)
        .await
        .with_context(|| format!("{} was not accepted", args.path.display()))?;
    info!(job_id = %job_id, "Submitted {}", asset_ref);

    while let Some(event) = events.recv().await {
        if event.job_id() != Some(&job_id) {
            continue;
        }
        if !args.quiet || event.is_terminal() {
            println!("{}", serde_json::to_string(&*event)?);
        }
        if event.is_terminal() {
            return match &*event {
                Event::JobFailed { message, .. } => Err(anyhow::anyhow!("analysis failed: {message}")),
                _ => Ok(()),
            };
        }
    }

    anyhow::bail!("event stream closed before the job finished")
}

mod headless;

use std::{path::PathBuf, sync::Arc};

use avatar_stage_core::{
    AudioBufferCache, AvatarAcquirer, Capability, FrameSample, ObjectUrlRegistry, RenderGraph,
    RenderLoop, ResourceSwitchController, Session, SimplexNoise, StageConfig, UiEvent, UiNotifier,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::headless::{
    FsFetcher, GlbLoader, LogNotifier, UnavailableSplatModule, WavAudio, ZipArchiveReader,
};

#[tokio::main]
async fn main() -> avatar_stage_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_stage(args).await,
        Commands::Noise {
            seed,
            samples,
            step,
        } => print_noise(seed, samples, step),
        Commands::Config => {
            println!("{}", StageConfig::default().to_json_pretty()?);
            Ok(())
        }
    }
}

async fn run_stage(args: RunArgs) -> avatar_stage_core::Result<()> {
    let config = match &args.config {
        Some(path) => StageConfig::load(path)?,
        None => StageConfig::default(),
    };
    tracing::info!(
        candidates = config.avatar_candidates.len(),
        assets = %args.assets.display(),
        "starting stage"
    );

    let session = Session::new();
    let notifier: Arc<dyn UiNotifier> = Arc::new(LogNotifier);

    let object_urls = ObjectUrlRegistry::new();
    let acquirer = AvatarAcquirer::new(
        Arc::new(UnavailableSplatModule),
        Arc::new(FsFetcher::new(&args.assets)),
        Arc::new(ZipArchiveReader),
        Arc::new(GlbLoader::new(object_urls.clone())),
        object_urls,
    )
    .with_fallback_entry(config.fallback_entry.clone());

    if let Err(err) = acquirer
        .acquire(&config.avatar_candidates, &session, notifier.as_ref())
        .await
    {
        tracing::warn!(%err, "continuing without avatar");
    }

    let audio = Arc::new(WavAudio::new(&args.assets));
    let cache = Arc::new(AudioBufferCache::new(audio.clone()));
    let controller =
        ResourceSwitchController::new(session.clone(), &config, audio, cache, notifier);

    let events = [
        args.animation.map(UiEvent::Animation),
        args.audio.map(UiEvent::Audio),
        args.palette.map(UiEvent::Palette),
    ];
    let pending: Vec<_> = events
        .into_iter()
        .flatten()
        .filter_map(|event| controller.dispatch(event))
        .collect();
    for task in pending {
        match task.await {
            Ok(outcome) => tracing::info!(?outcome, "switch settled"),
            Err(err) => tracing::warn!(%err, "switch task aborted"),
        }
    }

    let noise = args
        .seed
        .map(SimplexNoise::with_seed)
        .unwrap_or_else(SimplexNoise::from_entropy);
    let mut stage = RenderLoop::new(
        session.clone(),
        noise,
        config.motion.clone(),
        config.palettes.clone(),
        RenderGraph::new(),
    );

    let fps = if args.fps.is_finite() && args.fps > 0.0 { args.fps } else { 60.0 };
    let delta = 1.0 / fps;
    let mut last = FrameSample::default();
    for frame in 0..args.frames {
        let t = frame as f32 * delta;
        session.set_pointer((t * 0.7).sin() * 0.8, (t * 0.45).cos() * 0.5)?;
        last = stage.frame(delta);
    }

    let report = StageReport {
        capability: session.capability()?,
        animation: session.current_animation()?,
        audio: session.current_audio()?,
        palette: session.palette_index()?,
        frames: stage.sink().frames,
        last_frame: last,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_noise(seed: u64, samples: usize, step: f64) -> avatar_stage_core::Result<()> {
    let noise = SimplexNoise::with_seed(seed);
    for index in 0..samples {
        let x = index as f64 * step;
        println!("{x:.4}\t{:.6}", noise.noise2d(x, 0.0));
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Debug, Serialize)]
struct StageReport {
    capability: Capability,
    animation: Option<usize>,
    audio: Option<usize>,
    palette: usize,
    frames: u64,
    last_frame: FrameSample,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive avatar stage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Acquire the avatar, apply selections and step the stage headlessly.
    Run(RunArgs),
    /// Print samples of the noise field along the x axis.
    Noise {
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 16)]
        samples: usize,
        #[arg(long, default_value_t = 0.25)]
        step: f64,
    },
    /// Print the default configuration as JSON.
    Config,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// JSON configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory asset identifiers are resolved against.
    #[arg(long, default_value = ".")]
    assets: PathBuf,
    /// Number of frames to render.
    #[arg(long, default_value_t = 120)]
    frames: u32,
    #[arg(long, default_value_t = 60.0)]
    fps: f32,
    /// Fixed noise seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,
    /// Animation clip to select after loading.
    #[arg(long)]
    animation: Option<usize>,
    /// Audio track to start after loading.
    #[arg(long)]
    audio: Option<usize>,
    /// Palette to apply after loading.
    #[arg(long)]
    palette: Option<usize>,
}

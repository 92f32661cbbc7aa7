// SPDX-License-Identifier: GPL-3.0-only

use camera_pipeline::EffectSpec;
use camera_pipeline::camera::Facing;
use camera_pipeline::frame_source::FrameSourceKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-pipeline")]
#[command(about = "Run camera frames through a GPU shader pipeline")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum FacingArg {
    Back,
    Front,
}

impl From<FacingArg> for Facing {
    fn from(arg: FacingArg) -> Self {
        match arg {
            FacingArg::Back => Facing::Back,
            FacingArg::Front => Facing::Front,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Stream,
    Manual,
}

impl From<SourceArg> for FrameSourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Stream => FrameSourceKind::HardwareStream,
            SourceArg::Manual => FrameSourceKind::ManualConversion,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the GPU adapter the renderer would use
    Info,

    /// List available effects
    Effects,

    /// Render a synthetic camera through effects and save a capture
    Render {
        /// Effect to apply, in order: `name` or `name=value`
        #[arg(short, long = "effect")]
        effects: Vec<EffectSpec>,

        /// Overlay image for two-input effects
        #[arg(long)]
        overlay: Option<PathBuf>,

        /// Still image to render instead of the camera
        #[arg(long)]
        input: Option<PathBuf>,

        /// View width
        #[arg(long, default_value = "640")]
        width: u32,

        /// View height
        #[arg(long, default_value = "480")]
        height: u32,

        /// Which camera the synthetic device pretends to be
        #[arg(long, value_enum, default_value = "back")]
        facing: FacingArg,

        /// Sensor orientation in degrees
        #[arg(long, default_value = "0")]
        orientation: u32,

        /// Frame source to force instead of probing the camera
        #[arg(long, value_enum)]
        source: Option<SourceArg>,

        /// Frames to draw before capturing
        #[arg(long, default_value = "5")]
        frames: u64,

        /// Output PNG path
        #[arg(short, long, default_value = "capture.png")]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=camera_pipeline=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => cli::info(&config),
        Commands::Effects => cli::list_effects(),
        Commands::Render {
            effects,
            overlay,
            input,
            width,
            height,
            facing,
            orientation,
            source,
            frames,
            output,
        } => cli::render(
            config,
            cli::RenderOptions {
                effects,
                overlay,
                input,
                width,
                height,
                facing: facing.into(),
                orientation,
                source: source.map(Into::into),
                frames,
                output,
            },
        ),
    }
}

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use film_lab::render::create_backend;
use film_lab::{
    BackendChoice, Engine, EngineConfig, ExportFormat, ExportPreset, Histogram, Mask,
    PartialAdjustments, Vectorscope,
};

#[derive(Parser, Debug)]
#[command(name = "film-lab", version, about = "Non-destructive film look renderer")]
struct Cli {
    /// Engine config (JSON); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Render backend override
    #[arg(short, long, global = true, value_parser = parse_backend)]
    backend: Option<BackendChoice>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render an image through the adjustment pipeline and write the result
    Render {
        input: PathBuf,
        output: PathBuf,
        /// Adjustments or preset (JSON object of camelCase fields)
        #[arg(short, long)]
        adjustments: Option<PathBuf>,
        /// Preset strength when the adjustments file is applied as a preset
        #[arg(long)]
        strength: Option<f32>,
        /// Local masks (JSON array)
        #[arg(short, long)]
        masks: Option<PathBuf>,
        /// 3-D LUT in .cube format
        #[arg(long)]
        cube: Option<PathBuf>,
        /// Texture overlay image
        #[arg(long)]
        overlay: Option<PathBuf>,
        /// Output size: 4k, 2k, 1080p, 720p, original or a width in pixels
        #[arg(short, long, default_value = "original")]
        size: String,
        /// JPEG quality override
        #[arg(short, long)]
        quality: Option<u8>,
    },
    /// Print histogram statistics for an image after adjustments
    Analyze {
        input: PathBuf,
        #[arg(short, long)]
        adjustments: Option<PathBuf>,
    },
    /// Show the selected backend and its limits
    Info,
}

fn parse_backend(s: &str) -> std::result::Result<BackendChoice, String> {
    match s.to_ascii_lowercase().as_str() {
        "auto" => Ok(BackendChoice::Auto),
        "cpu" => Ok(BackendChoice::Cpu),
        "gpu" => Ok(BackendChoice::Gpu),
        other => Err(format!("unknown backend '{other}' (auto, cpu, gpu)")),
    }
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("film_lab={}", level).parse()?)
        .add_directive("wgpu=warn".parse()?)
        .add_directive("naga=warn".parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    Ok(config)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn open_image(path: &Path) -> Result<image::RgbaImage> {
    let image = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
    Ok(image.to_rgba8())
}

/// Apply an adjustments file: a plain partial, or a preset when it names itself
async fn apply_adjustments(engine: &mut Engine, path: &Path, strength: Option<f32>) -> Result<()> {
    let partial: PartialAdjustments = read_json(path).await?;
    if partial.contains_key("name") || strength.is_some() {
        engine
            .apply_preset_with_strength(&partial, strength.unwrap_or(1.0))
            .context("applying preset")?;
    } else {
        engine.set_adjustments(&partial).context("applying adjustments")?;
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let config = load_config(&cli)?;

    match &cli.command {
        Command::Render {
            input,
            output,
            adjustments,
            strength,
            masks,
            cube,
            overlay,
            size,
            quality,
        } => {
            let mut engine = Engine::new(config).context("starting render engine")?;
            engine.load_image(open_image(input)?)?;

            if let Some(path) = adjustments {
                apply_adjustments(&mut engine, path, *strength).await?;
            }
            if let Some(path) = masks {
                let list: Vec<Mask> = read_json(path).await?;
                engine.set_masks(list).context("applying masks")?;
            }
            if let Some(path) = cube {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                engine
                    .load_cube_file(&text)
                    .with_context(|| format!("loading LUT {}", path.display()))?;
            }
            if let Some(path) = overlay {
                engine.load_overlay(open_image(path)?)?;
            }

            let preset: ExportPreset = size.parse()?;
            let (width, height) = engine
                .original_size()
                .map(|(w, h)| preset.resolve(w, h))
                .context("no image loaded")?;
            let format = output
                .extension()
                .and_then(|e| e.to_str())
                .and_then(ExportFormat::from_extension)
                .unwrap_or(engine.config().export_format);
            let quality = quality.unwrap_or(engine.config().jpeg_quality);
            if !(1..=100).contains(&quality) {
                bail!("quality {quality} must be in 1..=100");
            }

            let frame = engine.export_final(width, height).await?;
            let bytes = film_lab::export::encode(&frame, format, quality)?;
            tokio::fs::write(output, &bytes)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            info!(width, height, path = %output.display(), "export written");
        }
        Command::Analyze { input, adjustments } => {
            let mut engine = Engine::new(config).context("starting render engine")?;
            engine.load_image(open_image(input)?)?;
            if let Some(path) = adjustments {
                apply_adjustments(&mut engine, path, None).await?;
            }
            let size = engine.config().analysis_size;
            let bytes = engine.analysis_buffer(size)?;
            let histogram = Histogram::from_rgba(&bytes);
            let scope = Vectorscope::from_rgba(&bytes, 64);

            println!("mean luminance   {:.3}", histogram.mean_luminance());
            println!("exposure hint    {:+.2} EV", histogram.exposure_hint());
            println!("clipped shadows  {:.2}%", histogram.clipped_fraction(false) * 100.0);
            println!("clipped lights   {:.2}%", histogram.clipped_fraction(true) * 100.0);
            println!("saturated        {:.2}%", scope.saturated_fraction(8.0) * 100.0);
        }
        Command::Info => {
            let backend = create_backend(config.backend).context("creating backend")?;
            let limits = backend.limits();
            println!("backend          {:?}", backend.kind());
            println!("adapter          {}", backend.name());
            println!("max texture      {}", limits.max_texture_dim);
            println!("max 3-D texture  {}", limits.max_volume_dim);
            println!("source cap       {}", config.source_cap(limits.max_texture_dim));
        }
    }
    Ok(())
}

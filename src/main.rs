use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use thumbnail_studio::config::StudioSettings;
use thumbnail_studio::export::export_artifact;
use thumbnail_studio::generation::SubmitOutcome;
use thumbnail_studio::runtime::StudioRuntime;
use thumbnail_studio::selection::SelectionRect;
use thumbnail_studio::server::run_http_server;
use thumbnail_studio::studio::run_studio;
use thumbnail_studio::thumbnail::presets::PresetCatalog;
use thumbnail_studio::thumbnail::{AspectRatio, ImageData, ImageSize, QualityTier, TextStyle};

#[derive(Debug, Parser)]
#[command(name = "thumbnail_studio", about = "Generate and refine video thumbnails from a photo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate a thumbnail from a photo, then optionally refine it.
    Generate(GenerateArgs),
    /// Open the native studio.
    Studio,
    /// Serve the studio session over HTTP.
    Serve {
        #[arg(long, default_value = "127.0.0.1:3000")]
        bind: String,
    },
    /// List the available style presets.
    Presets,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// Photo of the person to feature.
    #[arg(long)]
    image: PathBuf,
    /// Directory the thumbnails are written to.
    #[arg(long, default_value = ".")]
    out: PathBuf,
    #[arg(long)]
    preset: Option<String>,
    #[arg(long)]
    headline: Option<String>,
    #[arg(long)]
    text_style: Option<TextStyle>,
    #[arg(long)]
    expression: Option<String>,
    #[arg(long)]
    action: Option<String>,
    #[arg(long)]
    background: Option<String>,
    #[arg(long)]
    aspect_ratio: Option<AspectRatio>,
    /// Use the fast engine instead of the high-fidelity one.
    #[arg(long, conflicts_with_all = ["image_size", "web_grounding"])]
    fast: bool,
    #[arg(long)]
    image_size: Option<ImageSize>,
    #[arg(long)]
    web_grounding: bool,
    /// Edit instruction applied to the previous result. Repeat for several passes.
    #[arg(long)]
    refine: Vec<String>,
    /// Limit refinements to `x,y,width,height` in percent of the image.
    #[arg(long, value_parser = parse_region, requires = "refine")]
    refine_region: Option<SelectionRect>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_tracing()?;

    let cli = Cli::parse();
    let settings = StudioSettings::from_env().context("failed to load configuration")?;

    match cli.command {
        Commands::Generate(args) => run_generate(&settings, args).await?,
        Commands::Studio => run_studio(&settings)?,
        Commands::Serve { bind } => run_http_server(&settings, &bind).await?,
        Commands::Presets => print_presets(&settings)?,
    }

    Ok(())
}

async fn run_generate(settings: &StudioSettings, args: GenerateArgs) -> Result<()> {
    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed to read photo `{}`", args.image.display()))?;
    let runtime = StudioRuntime::from_settings(settings)?;

    {
        let mut session = runtime.session().lock();
        session.set_fresh_upload(ImageData::from_bytes(bytes));
        if let Some(preset) = args.preset.as_deref()
            && !session.apply_preset(preset)
        {
            bail!("unknown preset `{preset}`; run `thumbnail_studio presets` to list them");
        }

        let config = session.config_mut();
        if let Some(headline) = args.headline {
            config.overlay_text = headline;
        }
        if let Some(text_style) = args.text_style {
            config.text_style = text_style;
        }
        if let Some(expression) = args.expression {
            config.facial_expression = expression;
        }
        if let Some(action) = args.action {
            config.character_action = action;
        }
        if let Some(background) = args.background {
            config.background_details = background;
        }
        if let Some(aspect_ratio) = args.aspect_ratio {
            config.aspect_ratio = aspect_ratio;
        }
        config.quality = if args.fast {
            QualityTier::Fast
        } else {
            QualityTier::HighFidelity {
                image_size: args.image_size.unwrap_or(ImageSize::OneK),
                web_grounding: args.web_grounding,
            }
        };
    }

    let path = generate_and_export(&runtime, &args.out).await?;
    println!("{}", path.display());

    for (pass, instruction) in args.refine.iter().enumerate() {
        {
            let mut session = runtime.session().lock();
            session.set_edit_instruction(instruction.as_str());
            if let Some(region) = args.refine_region {
                session
                    .set_selection(region)
                    .context("failed to apply refine region")?;
            }
        }
        info!(pass = pass + 1, instruction = %instruction, "refining thumbnail");
        let path = generate_and_export(&runtime, &args.out).await?;
        println!("{}", path.display());
    }

    Ok(())
}

async fn generate_and_export(runtime: &StudioRuntime, out: &Path) -> Result<PathBuf> {
    let artifact_id = match runtime.controller.submit().await {
        SubmitOutcome::Succeeded { artifact_id } => artifact_id,
        SubmitOutcome::Ignored => bail!("a generation is already in progress"),
        SubmitOutcome::Failed(error) => {
            let hints = error
                .recovery_options()
                .iter()
                .map(|option| format!("{option:?}"))
                .collect::<Vec<_>>();
            if hints.is_empty() {
                return Err(anyhow!(error));
            }
            return Err(anyhow!(error).context(format!("recovery options: {}", hints.join(", "))));
        }
    };

    let session = runtime.session().lock();
    let artifact = session
        .lineage()
        .get(artifact_id)
        .ok_or_else(|| anyhow!("generated artifact `{artifact_id}` is missing from history"))?;
    Ok(export_artifact(artifact, out)?)
}

fn print_presets(settings: &StudioSettings) -> Result<()> {
    let catalog = PresetCatalog::load(settings.presets_file.as_deref())?;
    for preset in catalog.all() {
        println!("{:<14} {:<18} {}", preset.id, preset.name, preset.description);
    }
    Ok(())
}

fn parse_region(raw: &str) -> Result<SelectionRect, String> {
    let values = raw
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| format!("invalid region `{raw}`: {error}"))?;
    let [x, y, width, height] = values[..] else {
        return Err(format!("invalid region `{raw}`: expected x,y,width,height"));
    };
    SelectionRect::new(x, y, width, height).map_err(|error| error.to_string())
}

fn init_tracing() -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,thumbnail_studio=debug"));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    let (file_layer, guard) = match std::env::var("THUMBSTUDIO_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let file_filter = EnvFilter::try_new(
                std::env::var("THUMBSTUDIO_FILE_LOG").unwrap_or_else(|_| "info".to_owned()),
            )
            .context("failed to parse THUMBSTUDIO_FILE_LOG")?;
            let appender = tracing_appender::rolling::daily(dir.trim(), "thumbnail_studio.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(file_filter);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|error| anyhow!("failed to initialize tracing subscriber: {error}"))?;
    Ok(guard)
}

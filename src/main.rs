use rsdigit::app::{App, Command};
use rsdigit::config::{AppConfig, Regime};
use rsdigit::extract::extract;
use rsdigit::mnist_sprite::{load_sprite, SpriteOptions};
use rsdigit::model::Classifier;
use rsdigit::sketchpad::{FrameLoop, Sketchpad};
use rsdigit::stroke::PointerEvent;
use rsdigit::train::Trainer;

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON file overriding the default training and stroke settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DataArgs {
    /// Sprite PNG, one 784-pixel row per example
    #[arg(long)]
    images: PathBuf,
    /// One-hot label bytes, 10 per example
    #[arg(long)]
    labels: PathBuf,
    /// Leading sprite rows used for training
    #[arg(long, default_value_t = 55_000)]
    train_elements: usize,
}

#[derive(Args)]
struct TrainArgs {
    #[arg(long, value_enum, default_value_t = Regime::Small)]
    regime: Regime,
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    learning_rate: Option<f32>,
    #[arg(long)]
    seed: Option<u64>,
    /// Show the progress bar, overriding the config file
    #[arg(long, overrides_with = "quiet")]
    progress: bool,
    /// Hide the progress bar, overriding the config file
    #[arg(long, overrides_with = "progress")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a fresh classifier on the bundled dataset
    Train {
        #[command(flatten)]
        data: DataArgs,
        #[command(flatten)]
        train: TrainArgs,
        /// Write the per-epoch statistics here as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Replay a recorded pointer session onto the drawing surface
    Draw {
        /// JSON list of pointer events
        #[arg(long)]
        events: PathBuf,
        /// Save the 200x200 surface
        #[arg(long)]
        surface_png: Option<PathBuf>,
        /// Save the 28x28 classifier input
        #[arg(long)]
        tensor_png: Option<PathBuf>,
        /// Sprite PNG to train on before classifying the drawing
        #[arg(long, requires = "labels")]
        images: Option<PathBuf>,
        /// Label bytes matching --images
        #[arg(long, requires = "images")]
        labels: Option<PathBuf>,
        #[arg(long, default_value_t = 55_000)]
        train_elements: usize,
        #[command(flatten)]
        train: TrainArgs,
    },
}

fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => match AppConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        },
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Train {
            data,
            train,
            report,
        } => {
            apply_overrides(&mut config, &train);
            if let Err(e) = run_train(&config, &data, train.regime, report.as_deref()) {
                eprintln!("Error training model: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Draw {
            events,
            surface_png,
            tensor_png,
            images,
            labels,
            train_elements,
            train,
        } => {
            apply_overrides(&mut config, &train);
            let data = images.zip(labels).map(|(images, labels)| DataArgs {
                images,
                labels,
                train_elements,
            });
            let outputs = DrawOutputs {
                surface_png: surface_png.as_deref(),
                tensor_png: tensor_png.as_deref(),
            };
            if let Err(e) = run_draw(&config, &events, outputs, data.as_ref(), train.regime) {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
    }
}

/// CLI flags win over the config file.
fn apply_overrides(config: &mut AppConfig, args: &TrainArgs) {
    let training = &mut config.training;
    if let Some(epochs) = args.epochs {
        training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        training.batch_size = batch_size;
    }
    if let Some(learning_rate) = args.learning_rate {
        training.learning_rate = learning_rate;
    }
    if args.seed.is_some() {
        training.seed = args.seed;
    }
    if args.progress {
        training.progress = true;
    } else if args.quiet {
        training.progress = false;
    }
}

fn sprite_options(config: &AppConfig, data: &DataArgs) -> SpriteOptions {
    SpriteOptions {
        train_elements: data.train_elements,
        seed: config.training.seed.unwrap_or_default(),
    }
}

fn run_train(
    config: &AppConfig,
    data: &DataArgs,
    regime: Regime,
    report_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    config.training.validate()?;
    let mut source = load_sprite(&data.images, &data.labels, sprite_options(config, data))?;
    let mut model = Classifier::new(config.training.seed)?;
    info!(params = model.num_params(), "classifier initialised");

    let report = Trainer::new(config.training.clone()).train(&mut model, &mut source, regime)?;
    if let Some(last) = report.last() {
        println!(
            "validation accuracy {:.3} after {} epochs",
            last.val_accuracy, last.epoch
        );
    }
    if let Some(path) = report_path {
        report.save_json(path)?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}

struct DrawOutputs<'a> {
    surface_png: Option<&'a Path>,
    tensor_png: Option<&'a Path>,
}

fn run_draw(
    config: &AppConfig,
    events_path: &Path,
    outputs: DrawOutputs<'_>,
    data: Option<&DataArgs>,
    regime: Regime,
) -> Result<(), Box<dyn std::error::Error>> {
    config.training.validate()?;
    let events: Vec<PointerEvent> = serde_json::from_str(&std::fs::read_to_string(events_path)?)?;

    let Some(data) = data else {
        // Drawing only, no classifier involved.
        let mut pad = Sketchpad::new(config.stroke);
        let mut frames = FrameLoop::new();
        frames.replay(&mut pad, &events);
        info!(frames = frames.frames(), "replayed pointer session");
        save_outputs(&pad, &outputs)?;
        return Ok(());
    };

    let source = match load_sprite(&data.images, &data.labels, sprite_options(config, data)) {
        Ok(source) => source,
        Err(e) => {
            error!(error = %e, "dataset could not be loaded");
            return Err("Error training model".into());
        }
    };
    let mut app = App::new(Box::new(source), config.training.clone(), config.stroke)?;

    let mut frames = FrameLoop::new();
    frames.replay(app.sketchpad_mut(), &events);
    info!(frames = frames.frames(), "replayed pointer session");
    save_outputs(app.sketchpad(), &outputs)?;

    let command = match regime {
        Regime::Small => Command::TrainSmall,
        Regime::Large => Command::TrainLarge,
    };
    println!("{}", app.dispatch(command)?);
    println!("{}", app.dispatch(Command::Analyze)?);
    Ok(())
}

fn save_outputs(pad: &Sketchpad, outputs: &DrawOutputs<'_>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = outputs.surface_png {
        pad.surface().save_png(path)?;
    }
    if let Some(path) = outputs.tensor_png {
        extract(pad.surface())?.to_luma_image().save(path)?;
    }
    Ok(())
}

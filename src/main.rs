use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::{error, info};

use ferrite_mlp::{
    evaluate, train_network, CostFunction, MnistImages, MnistLabels, Network, NetworkSpec, Result,
    TrainConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train and evaluate a feedforward network on IDX datasets")]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a new network and save it
    Train(TrainArgs),
    /// Report the accuracy of a saved network
    Evaluate(EvaluateArgs),
}

#[derive(Args, Debug)]
struct DatasetArgs {
    /// IDX3 image file
    #[arg(long)]
    images: PathBuf,

    /// IDX1 label file
    #[arg(long)]
    labels: PathBuf,

    /// Number of label classes
    #[arg(long, default_value_t = 10)]
    classes: usize,
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    /// Network description (JSON); overrides the architecture flags below
    #[arg(long)]
    config: Option<PathBuf>,

    /// Neurons per layer, input first
    #[arg(long, value_delimiter = ',', default_value = "784,30,10")]
    layers: Vec<usize>,

    #[arg(long, default_value_t = 0.5)]
    learning_rate: f64,

    /// L2 regularization strength
    #[arg(long, default_value_t = 0.0)]
    lambda: f64,

    /// quadratic or cross-entropy
    #[arg(long, default_value = "quadratic")]
    cost: CostFunction,

    /// Draw initial biases at random instead of starting from zero
    #[arg(long)]
    generate_biases: bool,

    #[arg(long, default_value_t = 1)]
    epochs: usize,

    /// 1 trains one sample at a time
    #[arg(long, default_value_t = 1)]
    batch_size: usize,

    /// Cap on samples per epoch
    #[arg(long)]
    samples: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value_t = 1000)]
    log_every: usize,

    /// Where to write the model; a .json extension selects JSON
    #[arg(short, long, default_value = "model.bin")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    /// Model written by `train` (.bin or .json)
    #[arg(short, long)]
    model: PathBuf,

    #[arg(long, default_value_t = 10_000)]
    count: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let outcome = match cli.command {
        Command::Train(args) => run_train(args),
        Command::Evaluate(args) => run_evaluate(args),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    let (images, labels) = load_dataset(&args.dataset)?;

    let spec = match &args.config {
        Some(path) => NetworkSpec::load_json(path)?,
        None => NetworkSpec {
            layers: args.layers.clone(),
            learning_rate: args.learning_rate,
            lambda: args.lambda,
            cost: args.cost,
            generate_biases: args.generate_biases,
        },
    };
    let mut network = spec.build()?;

    let config = TrainConfig {
        epochs: args.epochs,
        samples_per_epoch: args.samples,
        batch_size: args.batch_size,
        log_every: args.log_every,
        seed: args.seed,
    };
    let history = train_network(&mut network, &images, &labels, &config)?;
    if let Some(last) = history.last() {
        info!("final mean loss {:.6}", last.mean_loss);
    }

    if is_json(&args.output) {
        network.save_json(&args.output)
    } else {
        network.save(&args.output)
    }
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let (images, labels) = load_dataset(&args.dataset)?;
    let network = if is_json(&args.model) {
        Network::load_json(&args.model)?
    } else {
        Network::load(&args.model)?
    };

    let result = evaluate(&network, &images, &labels, args.count)?;
    println!(
        "{}/{} correct, accuracy {:.2}%",
        result.correct,
        result.total,
        result.accuracy() * 100.0
    );
    Ok(())
}

fn load_dataset(args: &DatasetArgs) -> Result<(MnistImages, MnistLabels)> {
    let images = MnistImages::open(&args.images)?;
    let labels = MnistLabels::open_with_classes(&args.labels, args.classes)?;
    Ok((images, labels))
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

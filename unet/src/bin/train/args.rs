use clap::Parser;
use std::path::PathBuf;

// Upper bound on loader threads
const MAX_WORKERS: usize = 12;

fn default_workers() -> usize {
    num_cpus::get().clamp(1, MAX_WORKERS)
}

#[derive(Parser, Debug, Clone)]
#[command(name = "U-Net Trainer")]
#[command(version = "1.0.0")]
pub struct Args {
    /// YAML run configuration.
    #[arg(long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Checkpoint to resume from before training.
    #[arg(long)]
    pub load: Option<PathBuf>,

    /// Number of data loader workers.
    #[arg(long, default_value_t = default_workers())]
    pub workers: usize,

    /// Seed for shuffling the training set.
    #[arg(long, default_value_t = 19)]
    pub seed: u64,

    /// JSON-lines metrics file, defaults to `<PREDICTIONS_DIR>/<run>_tracker.jsonl`.
    #[arg(long)]
    pub tracker: Option<PathBuf>,

    /// Send tracked metrics to the log only.
    #[arg(long, conflicts_with = "tracker")]
    pub no_tracker: bool,
}

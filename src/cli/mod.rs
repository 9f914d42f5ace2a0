use crate::batching::Task;
use crate::config::PipelineConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// medseq: leakage-safe windowing and sequence encoding of patient histories
#[derive(Parser, Debug)]
#[command(name = "medseq")]
#[command(about = "Build labeled, encoded diagnosis sequences from patient event tables")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Window the cohort, fit the vocabulary and assemble batches
    Build(BuildArgs),

    /// Window the cohort and fit the vocabulary only
    Vocab(VocabArgs),
}

/// Input tables shared by every subcommand
#[derive(Args, Debug)]
pub struct InputArgs {
    /// Event tables (CSV or TSV, optionally gzipped); repeat for several
    #[arg(short, long = "events", required = true, num_args = 1..)]
    pub events: Vec<PathBuf>,

    /// Date-of-birth table
    #[arg(short, long, required = true)]
    pub birthdays: PathBuf,

    /// Prediction timestamps per patient
    #[arg(short, long, required = true)]
    pub prediction_times: PathBuf,

    /// Outcome timestamps per patient; every label is negative without it
    #[arg(long)]
    pub outcomes: Option<PathBuf>,

    /// Mapping from raw diagnosis codes to categories
    #[arg(short = 'm', long, required = true)]
    pub code_mapping: PathBuf,

    /// Pipeline configuration (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Command line overrides applied on top of the configuration file
#[derive(Args, Debug, Default)]
pub struct ConfigOverrides {
    #[arg(long)]
    pub lookbehind_days: Option<i64>,

    #[arg(long)]
    pub lookahead_days: Option<i64>,

    #[arg(long)]
    pub max_sequence_length: Option<usize>,

    /// Random seed for masking
    #[arg(long)]
    pub seed: Option<u64>,
}

impl ConfigOverrides {
    /// Apply every override that was given
    pub fn apply(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(days) = self.lookbehind_days {
            config.lookbehind_days = days;
        }
        if let Some(days) = self.lookahead_days {
            config.lookahead_days = days;
        }
        if let Some(len) = self.max_sequence_length {
            config.max_sequence_length = len;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config
    }
}

/// Build arguments
#[derive(Args, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// Training objective
    #[arg(short, long, value_enum, default_value = "supervised")]
    pub task: Task,

    /// Batch size
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Output directory for the vocabulary
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,
}

/// Vocabulary arguments
#[derive(Args, Debug)]
pub struct VocabArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// Output file for the vocabulary
    #[arg(short, long, default_value = "vocabulary.json")]
    pub output: PathBuf,
}

/// Parse CLI arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Setup logging based on verbosity
///
/// `RUST_LOG` takes precedence when set.
pub fn setup_logging(verbose: bool) {
    let default = if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUTS: [&str; 8] = [
        "-e", "events.csv",
        "-b", "birthdays.csv",
        "-p", "times.csv",
        "-m", "mapping.csv",
    ];

    #[test]
    fn test_build_parse() {
        let mut argv = vec!["medseq", "build"];
        argv.extend(INPUTS);
        argv.extend(["--task", "pretraining", "--seed", "7"]);
        let cli = Cli::parse_from(argv);

        match cli.command {
            Commands::Build(args) => {
                assert_eq!(args.input.events, vec![PathBuf::from("events.csv")]);
                assert_eq!(args.input.outcomes, None);
                assert_eq!(args.task, Task::Pretraining);
                assert_eq!(args.overrides.seed, Some(7));
                assert_eq!(args.output, PathBuf::from("./output"));
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_vocab_parse() {
        let cli = Cli::parse_from([
            "medseq", "vocab",
            "-e", "a.csv", "b.tsv.gz",
            "-b", "birthdays.csv",
            "-p", "times.csv",
            "-m", "mapping.csv",
            "-o", "vocab.json",
        ]);

        match cli.command {
            Commands::Vocab(args) => {
                assert_eq!(args.input.events.len(), 2);
                assert_eq!(args.output, PathBuf::from("vocab.json"));
            }
            _ => panic!("Expected Vocab command"),
        }
    }

    #[test]
    fn test_missing_required_input() {
        assert!(Cli::try_parse_from(["medseq", "build", "-e", "events.csv"]).is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let overrides = ConfigOverrides {
            lookbehind_days: Some(30),
            max_sequence_length: Some(16),
            ..ConfigOverrides::default()
        };
        let config = overrides.apply(PipelineConfig::new());

        assert_eq!(config.lookbehind_days, 30);
        assert_eq!(config.max_sequence_length, 16);
        assert_eq!(config.lookahead_days, 365);
    }
}

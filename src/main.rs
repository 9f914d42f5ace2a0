use anyhow::{Context, Result};
use burn::config::Config;
use indicatif::{ProgressBar, ProgressStyle};
use medseq::batching::Batches;
use medseq::cli::{parse_args, setup_logging, BuildArgs, Commands, InputArgs, VocabArgs, ConfigOverrides};
use medseq::config::PipelineConfig;
use medseq::data::loader::TableLoader;
use medseq::data::source::CsvEventSource;
use medseq::encoding::SequenceEncoder;
use medseq::utils::format_number;
use medseq::vocab::DiagnosisNormalizer;
use medseq::windowing::PredictionTime;
use medseq::pipeline;
use tracing::{info, error};

fn main() {
    let cli = parse_args();

    setup_logging(cli.verbose);

    info!("{}", medseq::info());

    let result = match cli.command {
        Commands::Build(args) => run_build(args),
        Commands::Vocab(args) => run_vocab(args),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn stage_bar(n_stages: u64) -> Result<ProgressBar> {
    let bar = ProgressBar::new(n_stages);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    Ok(bar)
}

fn load_config(input: &InputArgs, overrides: &ConfigOverrides) -> Result<PipelineConfig> {
    let config = match &input.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::new(),
    };
    let config = overrides.apply(config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Load the tables, window the cohort and fit the vocabulary
fn prepare(
    input: &InputArgs,
    config: &PipelineConfig,
    bar: &ProgressBar,
) -> Result<(Vec<PredictionTime>, SequenceEncoder)> {
    let loader = TableLoader::new();

    bar.set_message("loading tables");
    let prediction_rows = loader.load_timestamps(&input.prediction_times)
        .with_context(|| format!("Failed to load prediction times from {:?}", input.prediction_times))?;
    let outcome_rows = match &input.outcomes {
        Some(path) => loader.load_timestamps(path)
            .with_context(|| format!("Failed to load outcomes from {:?}", path))?,
        None => Vec::new(),
    };
    let mapping = loader.load_code_mapping(&input.code_mapping)
        .with_context(|| format!("Failed to load code mapping from {:?}", input.code_mapping))?;
    bar.inc(1);

    bar.set_message("windowing cohort");
    let source = CsvEventSource::new(input.events.clone(), input.birthdays.clone())
        .with_loader_config(config.loader_config());
    let prediction_times = pipeline::window_cohort(&source, config, prediction_rows, outcome_rows)?;
    info!("Created {} prediction times", format_number(prediction_times.len()));
    bar.inc(1);

    bar.set_message("fitting vocabulary");
    let encoder = pipeline::fit_encoder(config, DiagnosisNormalizer::new(mapping), &prediction_times)
        .context("Failed to fit vocabulary")?;
    bar.inc(1);

    Ok((prediction_times, encoder))
}

fn run_build(args: BuildArgs) -> Result<()> {
    info!("Building {:?} batches...", args.task);
    info!("Output directory: {:?}", args.output);

    let mut config = load_config(&args.input, &args.overrides)?;
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
        config.validate().context("Invalid configuration")?;
    }
    medseq::utils::ensure_dir(&args.output)?;

    let bar = stage_bar(4)?;
    let (prediction_times, encoder) = prepare(&args.input, &config, &bar)?;

    bar.set_message("assembling batches");
    let batches = pipeline::build_batches(&config, args.task, &encoder, &prediction_times)
        .context("Failed to assemble batches")?;
    bar.finish_with_message("done");

    let vocab_path = args.output.join("vocabulary.json");
    encoder.vocabulary()?.save(&vocab_path)?;
    config.save(args.output.join("config.json"))
        .with_context(|| format!("Failed to write config to {:?}", args.output))?;

    info!("\n=== Build Summary ===");
    info!("Prediction times: {}", format_number(prediction_times.len()));
    info!("Batches: {}", format_number(batches.n_batches()));
    info!("Rows: {}", format_number(batches.n_rows()));
    match &batches {
        Batches::Supervised(b) => {
            let positives: i64 = b.iter().flat_map(|batch| batch.outcome.iter()).sum();
            info!("Positive outcomes: {}", format_number(positives as usize));
        }
        Batches::Pretraining(b) => {
            let targets: usize = b.iter().map(|batch| batch.n_targets()).sum();
            info!("Masked targets: {}", format_number(targets));
        }
    }
    info!("Vocabulary saved to: {:?}", vocab_path);

    Ok(())
}

fn run_vocab(args: VocabArgs) -> Result<()> {
    info!("Fitting vocabulary...");

    let config = load_config(&args.input, &args.overrides)?;

    let bar = stage_bar(3)?;
    let (_, encoder) = prepare(&args.input, &config, &bar)?;
    bar.finish_with_message("done");

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        medseq::utils::ensure_dir(parent)?;
    }
    encoder.vocabulary()?.save(&args.output)?;
    info!("Vocabulary saved to: {:?}", args.output);

    Ok(())
}

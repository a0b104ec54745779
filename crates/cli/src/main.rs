//! CLI tool for preparing chat fine-tuning data.
//!
//! `pairs` flattens conversation JSONL into an `input,target` pair store that
//! a tokenizer can consume; `split` cuts a conversation file into train,
//! validation and test sets.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use log::info;

use sft_pairs_core::{
    pipeline, split_file, ContextMode, PairFormat, PipelineResult, PrepConfig, SplitResult,
};

/// Turn chat transcripts into supervised training pairs.
#[derive(Parser, Debug)]
#[command(name = "sft-pairs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config file; flags given on the command line take precedence
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flatten conversations into (input, target) pairs
    Pairs(PairsArgs),
    /// Split a conversation file into train/validation/test files
    Split(SplitArgs),
}

#[derive(Args, Debug)]
struct PairsArgs {
    /// Conversation JSONL file, or a directory searched for *.jsonl
    #[arg(long)]
    input: Option<PathBuf>,

    /// Pair store to write
    #[arg(long)]
    output: Option<PathBuf>,

    /// Pair store format (csv or jsonl); inferred from the output extension by default
    #[arg(long)]
    format: Option<PairFormat>,

    /// End-of-sequence marker appended to every message
    #[arg(long)]
    eos_marker: Option<String>,

    /// Input of the next pair after a reply: carry-target or reset
    #[arg(long)]
    context_mode: Option<ContextMode>,

    /// Append to an existing pair store instead of replacing it; the metadata
    /// counts then cover every run written into the store
    #[arg(long, overrides_with = "no_append")]
    append: bool,

    /// Replace the pair store even if the config enables appending
    #[arg(long)]
    no_append: bool,

    /// Skip malformed records instead of aborting
    #[arg(long, overrides_with = "no_skip_malformed")]
    skip_malformed: bool,

    /// Abort on malformed records even if the config enables skipping
    #[arg(long)]
    no_skip_malformed: bool,
}

#[derive(Args, Debug)]
struct SplitArgs {
    /// Conversation JSONL file to split
    #[arg(long)]
    input: Option<PathBuf>,

    /// Directory for train.jsonl, validation.jsonl and test.jsonl
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Fraction of records for training (0.0-1.0)
    #[arg(long)]
    train_ratio: Option<f64>,

    /// Fraction of records for validation (0.0-1.0); the rest is test
    #[arg(long)]
    validation_ratio: Option<f64>,

    /// Shuffle seed
    #[arg(long)]
    seed: Option<u64>,

    /// Skip malformed records instead of aborting
    #[arg(long, overrides_with = "no_skip_malformed")]
    skip_malformed: bool,

    /// Abort on malformed records even if the config enables skipping
    #[arg(long)]
    no_skip_malformed: bool,
}

/// Resolve a `--flag` / `--no-flag` pair against the configured value.
fn flag_override(current: bool, on: bool, off: bool) -> bool {
    match (on, off) {
        (true, _) => true,
        (_, true) => false,
        _ => current,
    }
}

fn load_config(path: Option<&Path>) -> Result<PrepConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Ok(PrepConfig::from_file(path)?)
        }
        None => Ok(PrepConfig::default()),
    }
}

fn apply_pairs_args(config: &mut PrepConfig, args: PairsArgs) {
    if let Some(input) = args.input {
        config.data_path = Some(input);
    }
    if let Some(output) = args.output {
        config.output_path = Some(output);
    }
    if let Some(format) = args.format {
        config.format = Some(format);
    }
    if let Some(eos) = args.eos_marker {
        config.eos_marker = eos;
    }
    if let Some(mode) = args.context_mode {
        config.context_mode = mode;
    }
    config.append = flag_override(config.append, args.append, args.no_append);
    config.skip_malformed =
        flag_override(config.skip_malformed, args.skip_malformed, args.no_skip_malformed);
}

/// Counts recorded by an earlier run in `metadata_path`, if any.
fn previous_counts(metadata_path: &Path) -> Option<PipelineResult> {
    let text = std::fs::read_to_string(metadata_path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&text).ok()?;
    serde_json::from_value(value.get("counts")?.clone()).ok()
}

fn run_pairs(mut config: PrepConfig, args: PairsArgs) -> Result<(), Box<dyn std::error::Error>> {
    apply_pairs_args(&mut config, args);

    let input = config
        .data_path
        .clone()
        .ok_or("no input given (use --input or data_path in the config)")?;
    let output = config
        .output_path
        .clone()
        .ok_or("no output given (use --output or output_path in the config)")?;
    let format = config.output_format();

    let result: PipelineResult = pipeline::run(
        &input,
        &output,
        format,
        config.append,
        &config.pipeline_config(),
    )?;

    let metadata_path = output.with_extension("metadata.json");
    let mut counts = result.clone();
    if config.append {
        if let Some(previous) = previous_counts(&metadata_path) {
            info!("Adding counts from earlier runs in {:?}", metadata_path);
            counts.merge(&previous);
        }
    }
    let metadata = serde_json::json!({
        "config": {
            "input": input.to_string_lossy(),
            "output": output.to_string_lossy(),
            "format": format.to_string(),
            "append": config.append,
            "skip_malformed": config.skip_malformed,
            "eos_marker": config.eos_marker,
            "context_mode": config.context_mode,
        },
        "counts": counts,
        "last_run": result,
        "stats": {
            "avg_pairs_per_record": if counts.total_records > 0 {
                counts.total_pairs as f64 / counts.total_records as f64
            } else {
                0.0
            },
        },
    });
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

    println!("\n[summary]");
    println!("  Files processed: {}", result.total_files);
    println!("  Records: {}", result.total_records);
    println!("  Skipped records: {}", result.skipped_records);
    println!("  Records without pairs: {}", result.conversations_without_pairs);
    println!("  Pairs written: {}", result.total_pairs);
    if counts != result {
        println!("  Pairs in store: {}", counts.total_pairs);
    }
    println!("  Output: {:?} ({})", output, format);
    println!("  Metadata: {:?}", metadata_path);

    Ok(())
}

fn run_split(mut config: PrepConfig, args: SplitArgs) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(input) = args.input {
        config.data_path = Some(input);
    }
    if let Some(dir) = args.output_dir {
        config.split_dir = Some(dir);
        config.train_path = None;
        config.validation_path = None;
        config.test_path = None;
    }
    if let Some(ratio) = args.train_ratio {
        config.train_ratio = ratio;
    }
    if let Some(ratio) = args.validation_ratio {
        config.validation_ratio = ratio;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.skip_malformed =
        flag_override(config.skip_malformed, args.skip_malformed, args.no_skip_malformed);

    let input = config
        .data_path
        .clone()
        .ok_or("no input given (use --input or data_path in the config)")?;
    let paths = config.split_paths();

    info!("Splitting {:?} (seed {})", input, config.seed);
    let result: SplitResult = split_file(&input, &paths, &config.split_config())?;

    println!("\n[summary]");
    println!("  Records: {}", result.total_records);
    println!("  Skipped records: {}", result.skipped_records);
    println!("  Train: {} -> {:?}", result.train_records, paths.train);
    println!("  Validation: {} -> {:?}", result.validation_records, paths.validation);
    println!("  Test: {} -> {:?}", result.test_records, paths.test);

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Pairs(args) => run_pairs(config, args),
        Command::Split(args) => run_split(config, args),
    }
}

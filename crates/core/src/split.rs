//! Deterministic train / validation / test split of a conversation file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};
use crate::message::Conversation;
use crate::pipeline::read_conversations;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train_ratio: f64,
    pub validation_ratio: f64,
    /// Shuffle seed; the same seed and input always give the same split.
    pub seed: u64,
    pub skip_malformed: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_ratio: 0.8,
            validation_ratio: 0.1,
            seed: 42,
            skip_malformed: false,
        }
    }
}

impl SplitConfig {
    /// Fraction left over for the test split.
    pub fn test_ratio(&self) -> f64 {
        (1.0 - self.train_ratio - self.validation_ratio).max(0.0)
    }

    pub fn validate(&self) -> Result<()> {
        let in_range = |r: f64| (0.0..=1.0).contains(&r);
        if !in_range(self.train_ratio) || !in_range(self.validation_ratio) {
            return Err(PrepError::Config(format!(
                "split ratios must be within 0..=1 (train {}, validation {})",
                self.train_ratio, self.validation_ratio
            )));
        }
        if self.train_ratio + self.validation_ratio > 1.0 + f64::EPSILON {
            return Err(PrepError::Config(format!(
                "train ratio {} plus validation ratio {} exceeds 1",
                self.train_ratio, self.validation_ratio
            )));
        }
        Ok(())
    }
}

/// The three partitions of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splits<T> {
    pub train: Vec<T>,
    pub validation: Vec<T>,
    pub test: Vec<T>,
}

/// Output locations for [`split_file`].
#[derive(Debug, Clone)]
pub struct SplitPaths {
    pub train: PathBuf,
    pub validation: PathBuf,
    pub test: PathBuf,
}

impl SplitPaths {
    /// `train.jsonl`, `validation.jsonl` and `test.jsonl` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            train: dir.join("train.jsonl"),
            validation: dir.join("validation.jsonl"),
            test: dir.join("test.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SplitResult {
    pub total_records: usize,
    pub skipped_records: usize,
    pub train_records: usize,
    pub validation_records: usize,
    pub test_records: usize,
}

/// Shuffle `items` with the configured seed and cut them into three parts.
pub fn split_items<T>(mut items: Vec<T>, config: &SplitConfig) -> Result<Splits<T>> {
    config.validate()?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    items.shuffle(&mut rng);

    let total = items.len();
    let train_count = ((total as f64 * config.train_ratio).round() as usize).min(total);
    let val_count =
        ((total as f64 * config.validation_ratio).round() as usize).min(total - train_count);

    let test = items.split_off(train_count + val_count);
    let validation = items.split_off(train_count);
    Ok(Splits {
        train: items,
        validation,
        test,
    })
}

fn write_jsonl(path: &Path, conversations: &[Conversation]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = BufWriter::new(File::create(path)?);
    for conversation in conversations {
        writeln!(file, "{}", conversation.to_json_line()?)?;
    }
    file.flush()?;
    log::info!("Saved file: {:?} ({} records)", path, conversations.len());
    Ok(())
}

/// Split a conversation JSONL file into train, validation and test files.
pub fn split_file(input: &Path, paths: &SplitPaths, config: &SplitConfig) -> Result<SplitResult> {
    config.validate()?;
    let loaded = read_conversations(input, config.skip_malformed)?;
    let total_records = loaded.conversations.len();

    let splits = split_items(loaded.conversations, config)?;
    write_jsonl(&paths.train, &splits.train)?;
    write_jsonl(&paths.validation, &splits.validation)?;
    write_jsonl(&paths.test, &splits.test)?;

    Ok(SplitResult {
        total_records,
        skipped_records: loaded.skipped,
        train_records: splits.train.len(),
        validation_records: splits.validation.len(),
        test_records: splits.test.len(),
    })
}

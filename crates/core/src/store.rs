//! Tabular persistence for training pairs (`input`, `target` columns).

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::emitter::{PairSink, TrainingPair};
use crate::error::Result;

/// On-disk layout of the pair store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairFormat {
    /// CSV with an `input,target` header row.
    #[default]
    Csv,
    /// One `{"input":..,"target":..}` object per line.
    Jsonl,
}

impl PairFormat {
    /// Guess the format from a file extension, if it is a known one.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "csv" => Some(PairFormat::Csv),
            "jsonl" | "ndjson" => Some(PairFormat::Jsonl),
            _ => None,
        }
    }
}

impl fmt::Display for PairFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairFormat::Csv => f.write_str("csv"),
            PairFormat::Jsonl => f.write_str("jsonl"),
        }
    }
}

impl FromStr for PairFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(PairFormat::Csv),
            "jsonl" | "ndjson" => Ok(PairFormat::Jsonl),
            other => Err(format!("unknown pair format '{}' (expected csv or jsonl)", other)),
        }
    }
}

enum Backend {
    Csv(csv::Writer<File>),
    Jsonl(BufWriter<File>),
}

/// Writes pairs to a file in emission order.
pub struct PairWriter {
    backend: Backend,
    path: PathBuf,
    written: usize,
}

impl PairWriter {
    /// Open `path` for writing. With `append`, rows are added after any
    /// existing content; otherwise the file is truncated.
    pub fn create(path: &Path, format: PairFormat, append: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let existing_len = if append {
            std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;

        let backend = match format {
            PairFormat::Csv => Backend::Csv(
                csv::WriterBuilder::new()
                    .has_headers(existing_len == 0)
                    .from_writer(file),
            ),
            PairFormat::Jsonl => Backend::Jsonl(BufWriter::new(file)),
        };

        if append && existing_len > 0 {
            log::info!("Appending to existing pair store {:?}", path);
        }

        Ok(Self {
            backend,
            path: path.to_path_buf(),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pairs written by this writer (not counting pre-existing rows).
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush buffered rows and return the number written.
    pub fn finish(mut self) -> Result<usize> {
        match &mut self.backend {
            Backend::Csv(w) => w.flush()?,
            Backend::Jsonl(w) => w.flush()?,
        }
        Ok(self.written)
    }
}

impl PairSink for PairWriter {
    fn emit(&mut self, pair: TrainingPair) -> Result<()> {
        match &mut self.backend {
            Backend::Csv(w) => w.serialize(&pair)?,
            Backend::Jsonl(w) => {
                serde_json::to_writer(&mut *w, &pair)?;
                w.write_all(b"\n")?;
            }
        }
        self.written += 1;
        Ok(())
    }
}

/// Read every pair back from a store, in file order.
pub fn read_pairs(path: &Path, format: PairFormat) -> Result<Vec<TrainingPair>> {
    match format {
        PairFormat::Csv => {
            let mut reader = csv::Reader::from_path(path)?;
            let mut pairs = Vec::new();
            for row in reader.deserialize() {
                pairs.push(row?);
            }
            Ok(pairs)
        }
        PairFormat::Jsonl => {
            let reader = BufReader::new(File::open(path)?);
            let mut pairs = Vec::new();
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                pairs.push(serde_json::from_str(&line)?);
            }
            Ok(pairs)
        }
    }
}

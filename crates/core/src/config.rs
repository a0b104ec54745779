//! Run configuration loaded from a JSON file.
//!
//! Every key is optional; missing keys take the defaults below. Command-line
//! flags are applied on top of the loaded value by the caller.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pipeline::PipelineConfig;
use crate::segmenter::{ContextMode, SegmenterConfig};
use crate::split::{SplitConfig, SplitPaths};
use crate::store::PairFormat;
use crate::DEFAULT_EOS_MARKER;

/// Contents of a config file such as:
///
/// ```json
/// {
///   "data_path": "./Data/data.jsonl",
///   "output_path": "./Data/pairs.csv",
///   "eos_marker": "</s>",
///   "train_ratio": 0.8
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    /// Conversation JSONL file, or a directory of them.
    pub data_path: Option<PathBuf>,
    /// Pair store to write.
    pub output_path: Option<PathBuf>,
    /// Pair store format. Inferred from `output_path` when unset.
    pub format: Option<PairFormat>,
    pub append: bool,
    pub skip_malformed: bool,
    pub eos_marker: String,
    pub context_mode: ContextMode,

    pub train_ratio: f64,
    pub validation_ratio: f64,
    pub seed: u64,
    /// Directory for split outputs when the individual paths are unset.
    pub split_dir: Option<PathBuf>,
    pub train_path: Option<PathBuf>,
    pub validation_path: Option<PathBuf>,
    pub test_path: Option<PathBuf>,
}

impl Default for PrepConfig {
    fn default() -> Self {
        let split = SplitConfig::default();
        Self {
            data_path: None,
            output_path: None,
            format: None,
            append: false,
            skip_malformed: false,
            eos_marker: DEFAULT_EOS_MARKER.to_string(),
            context_mode: ContextMode::default(),
            train_ratio: split.train_ratio,
            validation_ratio: split.validation_ratio,
            seed: split.seed,
            split_dir: None,
            train_path: None,
            validation_path: None,
            test_path: None,
        }
    }
}

impl PrepConfig {
    /// Load a config file. Ratios are validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PrepConfig = serde_json::from_str(&text)?;
        config.split_config().validate()?;
        log::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn segmenter_config(&self) -> SegmenterConfig {
        SegmenterConfig {
            eos_marker: self.eos_marker.clone(),
            context_mode: self.context_mode,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            segmenter: self.segmenter_config(),
            skip_malformed: self.skip_malformed,
        }
    }

    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            train_ratio: self.train_ratio,
            validation_ratio: self.validation_ratio,
            seed: self.seed,
            skip_malformed: self.skip_malformed,
        }
    }

    /// Explicit format, else the output extension, else CSV.
    pub fn output_format(&self) -> PairFormat {
        self.format
            .or_else(|| self.output_path.as_deref().and_then(PairFormat::from_path))
            .unwrap_or_default()
    }

    /// Split output paths. Unset paths fall back to `split_dir`, then to the
    /// directory holding `data_path`.
    pub fn split_paths(&self) -> SplitPaths {
        let dir = self
            .split_dir
            .clone()
            .or_else(|| {
                self.data_path
                    .as_deref()
                    .and_then(Path::parent)
                    .map(Path::to_path_buf)
            })
            .unwrap_or_else(|| PathBuf::from("."));
        let defaults = SplitPaths::in_dir(&dir);
        SplitPaths {
            train: self.train_path.clone().unwrap_or(defaults.train),
            validation: self.validation_path.clone().unwrap_or(defaults.validation),
            test: self.test_path.clone().unwrap_or(defaults.test),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrepError;
    use tempfile::TempDir;

    #[test]
    fn test_missing_keys_use_defaults() {
        let config: PrepConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PrepConfig::default());
        assert_eq!(config.eos_marker, DEFAULT_EOS_MARKER);
        assert_eq!(config.output_format(), PairFormat::Csv);
    }

    #[test]
    fn test_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "data_path": "data/data.jsonl",
                "output_path": "data/pairs.jsonl",
                "eos_marker": "</s>",
                "context_mode": "reset",
                "skip_malformed": true,
                "seed": 7
            }"#,
        )
        .unwrap();

        let config = PrepConfig::from_file(&path).unwrap();
        assert_eq!(config.output_format(), PairFormat::Jsonl);
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.segmenter.eos_marker, "</s>");
        assert_eq!(pipeline.segmenter.context_mode, ContextMode::Reset);
        assert!(pipeline.skip_malformed);
        assert_eq!(config.split_config().seed, 7);
        assert_eq!(config.split_paths().train, PathBuf::from("data/train.jsonl"));
    }

    #[test]
    fn test_bad_ratios_rejected_on_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"train_ratio": 1.5}"#).unwrap();
        assert!(matches!(
            PrepConfig::from_file(&path),
            Err(PrepError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_context_mode_rejected() {
        let err = serde_json::from_str::<PrepConfig>(r#"{"context_mode": "sometimes"}"#);
        assert!(err.is_err());
    }
}

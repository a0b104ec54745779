//! Pipeline for turning JSONL conversation files into a pair store.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::emitter::{emit_all, PairSink, TrainingPair};
use crate::error::{MalformedRecord, PrepError, Result};
use crate::message::{parse_conversation_bytes, Conversation};
use crate::segmenter::{SegmenterConfig, TurnSegmenter};
use crate::store::{PairFormat, PairWriter};

/// Configuration for the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    pub segmenter: SegmenterConfig,
    /// Drop malformed lines with a warning instead of aborting the batch.
    pub skip_malformed: bool,
}

/// Conversations read from one source file.
#[derive(Debug, Clone, Default)]
pub struct LoadedRecords {
    pub conversations: Vec<Conversation>,
    /// Malformed lines dropped in skip mode.
    pub skipped: usize,
}

/// Result of processing a single source file.
#[derive(Debug)]
pub struct FileResult {
    pub source_path: PathBuf,
    pub records: usize,
    pub skipped: usize,
    /// Conversations that produced no pair (empty, or no assistant turn).
    pub without_pairs: usize,
    pub pairs: Vec<TrainingPair>,
}

/// Result of processing all files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineResult {
    pub total_files: usize,
    pub total_records: usize,
    pub skipped_records: usize,
    pub conversations_without_pairs: usize,
    pub total_pairs: usize,
}

impl PipelineResult {
    /// Add another run's counts, e.g. when appending to an existing store.
    pub fn merge(&mut self, other: &PipelineResult) {
        self.total_files += other.total_files;
        self.total_records += other.total_records;
        self.skipped_records += other.skipped_records;
        self.conversations_without_pairs += other.conversations_without_pairs;
        self.total_pairs += other.total_pairs;
    }
}

/// Discover all JSONL files under a directory, sorted by path.
pub fn discover_jsonl_files(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "jsonl"))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();
    paths
}

/// Resolve an input argument into the list of files to process.
/// A file is used as-is; a directory is searched for `*.jsonl` files.
pub fn resolve_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_dir() {
        let files = discover_jsonl_files(input);
        if files.is_empty() {
            return Err(PrepError::EmptyInput {
                path: input.to_path_buf(),
            });
        }
        Ok(files)
    } else {
        Ok(vec![input.to_path_buf()])
    }
}

/// Read and parse every conversation in a JSONL file, keeping file order.
///
/// Blank lines are ignored. A file with no records at all is an error. Lines
/// are read as raw bytes so invalid UTF-8 is reported as a malformed record.
pub fn read_conversations(path: &Path, skip_malformed: bool) -> Result<LoadedRecords> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines: Vec<(usize, Vec<u8>)> = Vec::new();
    for (idx, line) in reader.split(b'\n').enumerate() {
        let mut line = line?;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if !line.iter().all(u8::is_ascii_whitespace) {
            lines.push((idx + 1, line));
        }
    }

    if lines.is_empty() {
        return Err(PrepError::EmptyInput {
            path: path.to_path_buf(),
        });
    }

    let parsed: Vec<(usize, std::result::Result<Conversation, MalformedRecord>)> = lines
        .par_iter()
        .map(|(line_no, line)| (*line_no, parse_conversation_bytes(line)))
        .collect();

    let mut loaded = LoadedRecords::default();
    for (line_no, result) in parsed {
        match result {
            Ok(conversation) => loaded.conversations.push(conversation),
            Err(err) if skip_malformed => {
                log::warn!("Skipping {:?}:{}: {}", path, line_no, err.reason);
                loaded.skipped += 1;
            }
            Err(err) => return Err(PrepError::malformed(path, line_no, err)),
        }
    }

    if loaded.conversations.is_empty() {
        log::warn!("All {} records in {:?} were malformed", loaded.skipped, path);
    }
    Ok(loaded)
}

/// Segment conversations in parallel. Pairs come back in conversation order.
pub fn segment_conversations(
    segmenter: &TurnSegmenter,
    conversations: &[Conversation],
) -> Vec<Vec<TrainingPair>> {
    conversations
        .par_iter()
        .map(|conversation| segmenter.segment(conversation))
        .collect()
}

/// Process a single JSONL file.
pub fn process_file(path: &Path, config: &PipelineConfig) -> Result<FileResult> {
    let segmenter = TurnSegmenter::new(config.segmenter.clone());
    let loaded = read_conversations(path, config.skip_malformed)?;

    let per_conversation = segment_conversations(&segmenter, &loaded.conversations);
    let without_pairs = per_conversation.iter().filter(|p| p.is_empty()).count();
    let pairs: Vec<TrainingPair> = per_conversation.into_iter().flatten().collect();

    log::debug!(
        "{:?}: {} records, {} pairs",
        path,
        loaded.conversations.len(),
        pairs.len()
    );

    Ok(FileResult {
        source_path: path.to_path_buf(),
        records: loaded.conversations.len(),
        skipped: loaded.skipped,
        without_pairs,
        pairs,
    })
}

/// Process files in parallel, returning results in the order of `paths`.
/// The first failing file (in path order) aborts the batch.
pub fn process_all_files(paths: &[PathBuf], config: &PipelineConfig) -> Result<Vec<FileResult>> {
    let total_files = paths.len();
    let results: Vec<Result<FileResult>> = paths
        .par_iter()
        .map(|path| process_file(path, config))
        .collect();

    let mut out = Vec::with_capacity(total_files);
    for (idx, result) in results.into_iter().enumerate() {
        out.push(result?);
        let count = idx + 1;
        if count % 100 == 0 || count == total_files {
            log::info!("Processed {}/{} files...", count, total_files);
        }
    }
    Ok(out)
}

/// Emit all pairs from `results` into `sink`, in file order.
pub fn write_pairs<S>(results: Vec<FileResult>, sink: &mut S) -> Result<PipelineResult>
where
    S: PairSink + ?Sized,
{
    let mut summary = PipelineResult {
        total_files: results.len(),
        ..Default::default()
    };

    for file in results {
        summary.total_records += file.records;
        summary.skipped_records += file.skipped;
        summary.conversations_without_pairs += file.without_pairs;
        summary.total_pairs += emit_all(sink, file.pairs)?;
    }

    Ok(summary)
}

/// Run the whole conversion: resolve inputs, segment, and write the store.
pub fn run(
    input: &Path,
    output: &Path,
    format: PairFormat,
    append: bool,
    config: &PipelineConfig,
) -> Result<PipelineResult> {
    let mut paths = resolve_inputs(input)?;
    // A store inside the input directory must not be read back as conversations.
    if let Ok(store) = output.canonicalize() {
        paths.retain(|p| p.canonicalize().map_or(true, |p| p != store));
        if paths.is_empty() {
            return Err(PrepError::EmptyInput {
                path: input.to_path_buf(),
            });
        }
    }
    log::info!("Processing {} file(s) from {:?}", paths.len(), input);

    let results = process_all_files(&paths, config)?;

    let mut writer = PairWriter::create(output, format, append)?;
    let summary = write_pairs(results, &mut writer)?;
    let written = writer.finish()?;
    log::info!("Wrote {} pairs to {:?} ({})", written, output, format);

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::segmenter::ContextMode;
    use crate::store::read_pairs;
    use std::io::Write;
    use tempfile::TempDir;

    fn config() -> PipelineConfig {
        PipelineConfig {
            segmenter: SegmenterConfig {
                eos_marker: "<eos>".to_string(),
                context_mode: ContextMode::CarryTarget,
            },
            skip_malformed: false,
        }
    }

    fn write_file(path: &Path, lines: &[&str]) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut file = File::create(path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    const EXCHANGE: &str =
        r#"{"messages":[{"role":"user","content":"Hi"},{"role":"assistant","content":"Hello"}]}"#;
    const NO_REPLY: &str = r#"{"messages":[{"role":"user","content":"Anyone?"}]}"#;
    const TWO_TURNS: &str = r#"{"messages":[{"role":"system","content":"S"},{"role":"user","content":"A"},{"role":"assistant","content":"B"},{"role":"user","content":"C"},{"role":"assistant","content":"D"}]}"#;

    #[test]
    fn test_discover_jsonl_files() {
        let temp = TempDir::new().unwrap();
        write_file(&temp.path().join("b.jsonl"), &[EXCHANGE]);
        write_file(&temp.path().join("sub/a.jsonl"), &[EXCHANGE]);
        write_file(&temp.path().join("notes.txt"), &["x"]);

        let files = discover_jsonl_files(temp.path());
        assert_eq!(files.len(), 2);
        assert!(files.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_process_file_counts() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.jsonl");
        write_file(&path, &[EXCHANGE, "", NO_REPLY, TWO_TURNS, r#"{"messages":[]}"#]);

        let result = process_file(&path, &config()).unwrap();
        assert_eq!(result.records, 4);
        assert_eq!(result.without_pairs, 2);
        assert_eq!(
            result.pairs,
            vec![
                TrainingPair::new("Hi<eos>", "Hello<eos>"),
                TrainingPair::new("S<eos>A<eos>", "B<eos>"),
                TrainingPair::new("B<eos>C<eos>", "D<eos>"),
            ]
        );
    }

    #[test]
    fn test_malformed_record_aborts_with_line_number() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.jsonl");
        write_file(&path, &[EXCHANGE, r#"{"messages":[{"role":"bot","content":"x"}]}"#]);

        match process_file(&path, &config()) {
            Err(PrepError::MalformedRecord { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed record error, got {:?}", other),
        }
    }

    #[test]
    fn test_skip_malformed_mode() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.jsonl");
        write_file(&path, &["{oops", EXCHANGE]);

        let cfg = PipelineConfig {
            skip_malformed: true,
            ..config()
        };
        let result = process_file(&path, &cfg).unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.pairs.len(), 1);
    }

    #[test]
    fn test_invalid_utf8_line_is_malformed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.jsonl");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(EXCHANGE.as_bytes());
        bytes.extend_from_slice(b"\n{\"messages\":[{\"role\":\"user\",\"content\":\"\xff\xfe\"}]}\r\n");
        bytes.extend_from_slice(TWO_TURNS.as_bytes());
        bytes.push(b'\n');
        std::fs::write(&path, bytes).unwrap();

        match process_file(&path, &config()) {
            Err(PrepError::MalformedRecord { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed record error, got {:?}", other),
        }

        let cfg = PipelineConfig {
            skip_malformed: true,
            ..config()
        };
        let result = process_file(&path, &cfg).unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.records, 2);
        assert_eq!(result.pairs.len(), 3);
    }

    #[test]
    fn test_crlf_line_endings() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.jsonl");
        std::fs::write(&path, format!("{}\r\n\r\n{}\r\n", EXCHANGE, NO_REPLY)).unwrap();
        let result = process_file(&path, &config()).unwrap();
        assert_eq!(result.records, 2);
        assert_eq!(result.pairs, vec![TrainingPair::new("Hi<eos>", "Hello<eos>")]);
    }

    #[test]
    fn test_store_inside_input_directory_is_not_read_back() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        write_file(&data.join("data.jsonl"), &[EXCHANGE]);
        let output = data.join("pairs.jsonl");

        let first = run(&data, &output, PairFormat::Jsonl, true, &config()).unwrap();
        assert_eq!(first.total_pairs, 1);
        let second = run(&data, &output, PairFormat::Jsonl, true, &config()).unwrap();
        assert_eq!(second.total_files, 1);
        assert_eq!(second.total_pairs, 1);

        let pairs = read_pairs(&output, PairFormat::Jsonl).unwrap();
        assert_eq!(pairs.len(), 2);

        // A directory holding nothing but the store has no input left.
        std::fs::remove_file(data.join("data.jsonl")).unwrap();
        assert!(matches!(
            run(&data, &output, PairFormat::Jsonl, true, &config()),
            Err(PrepError::EmptyInput { .. })
        ));
    }

    #[test]
    fn test_merge_counts() {
        let mut total = PipelineResult {
            total_files: 1,
            total_records: 3,
            skipped_records: 1,
            conversations_without_pairs: 1,
            total_pairs: 2,
        };
        let previous = total.clone();
        total.merge(&previous);
        assert_eq!(total.total_records, 6);
        assert_eq!(total.total_pairs, 4);
        assert_eq!(total.skipped_records, 2);
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.jsonl");
        write_file(&path, &["", "   "]);
        assert!(matches!(
            process_file(&path, &config()),
            Err(PrepError::EmptyInput { .. })
        ));

        let empty_dir = temp.path().join("nothing");
        std::fs::create_dir_all(&empty_dir).unwrap();
        assert!(matches!(
            resolve_inputs(&empty_dir),
            Err(PrepError::EmptyInput { .. })
        ));
    }

    #[test]
    fn test_batching_preserves_order() {
        let segmenter = TurnSegmenter::new(config().segmenter);
        let conversations: Vec<Conversation> = (0..20)
            .map(|i| {
                Conversation::new(vec![
                    Message::user(format!("q{i}")),
                    Message::assistant(format!("a{i}")),
                    Message::user(format!("q{i}b")),
                    Message::assistant(format!("a{i}b")),
                ])
            })
            .collect();

        let whole: Vec<TrainingPair> = segment_conversations(&segmenter, &conversations)
            .into_iter()
            .flatten()
            .collect();
        let sequential: Vec<TrainingPair> =
            conversations.iter().flat_map(|c| segmenter.segment(c)).collect();
        assert_eq!(whole, sequential);

        for batch_size in [1, 3, 7] {
            let batched: Vec<TrainingPair> = conversations
                .chunks(batch_size)
                .flat_map(|chunk| segment_conversations(&segmenter, chunk))
                .flatten()
                .collect();
            assert_eq!(batched, whole);
        }
    }

    #[test]
    fn test_run_directory_in_path_order() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("data");
        write_file(&input.join("1.jsonl"), &[EXCHANGE]);
        write_file(&input.join("2.jsonl"), &[TWO_TURNS, NO_REPLY]);
        let output = temp.path().join("out/pairs.csv");

        let summary = run(&input, &output, PairFormat::Csv, false, &config()).unwrap();
        assert_eq!(
            summary,
            PipelineResult {
                total_files: 2,
                total_records: 3,
                skipped_records: 0,
                conversations_without_pairs: 1,
                total_pairs: 3,
            }
        );

        let pairs = read_pairs(&output, PairFormat::Csv).unwrap();
        assert_eq!(pairs[0], TrainingPair::new("Hi<eos>", "Hello<eos>"));
        assert_eq!(pairs[2], TrainingPair::new("B<eos>C<eos>", "D<eos>"));

        // Appending a second run keeps the first run's rows in front.
        run(&input.join("1.jsonl"), &output, PairFormat::Csv, true, &config()).unwrap();
        let pairs = read_pairs(&output, PairFormat::Csv).unwrap();
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[3], TrainingPair::new("Hi<eos>", "Hello<eos>"));
    }
}

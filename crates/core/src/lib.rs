//! Core logic for turning chat transcripts into supervised training pairs.
//!
//! Each line of the input is a conversation record
//! (`{"messages":[{"role":..,"content":..}, ...]}`). The [`TurnSegmenter`]
//! groups messages into input runs (system and user turns) and target runs
//! (assistant turns) and emits one [`TrainingPair`] per completed reply. The
//! [`pipeline`] module drives this over whole files and writes the pairs to a
//! tabular store for later tokenization.

mod config;
mod emitter;
mod error;
mod message;
mod segmenter;
mod store;
pub mod pipeline;
pub mod split;

pub use config::PrepConfig;
pub use emitter::{emit_all, CountingSink, PairSink, TrainingPair};
pub use error::{MalformedRecord, PrepError, Result};
pub use message::{parse_conversation, parse_conversation_bytes, Bucket, Conversation, Message, Role};
pub use pipeline::{
    discover_jsonl_files, process_all_files, process_file, read_conversations, resolve_inputs,
    segment_conversations, write_pairs, FileResult, LoadedRecords, PipelineConfig, PipelineResult,
};
pub use segmenter::{ContextMode, SegmenterConfig, TurnSegmenter};
pub use split::{split_file, split_items, SplitConfig, SplitPaths, SplitResult, Splits};
pub use store::{read_pairs, PairFormat, PairWriter};

/// Default end-of-sequence marker appended to every message (GPT-2's `<|endoftext|>`).
pub const DEFAULT_EOS_MARKER: &str = "<|endoftext|>";

//! Splits a conversation into alternating input/target runs and flushes
//! `(input, target)` pairs at run boundaries.

use std::convert::Infallible;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::emitter::{PairSink, TrainingPair};
use crate::error::{PrepError, Result};
use crate::message::{Bucket, Conversation};
use crate::DEFAULT_EOS_MARKER;

/// What becomes the input of the next pair after a reply has been flushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// The previous target followed by the new input run.
    #[default]
    CarryTarget,
    /// Only the new input run. Reproduces datasets built before carry-forward.
    Reset,
}

impl FromStr for ContextMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "carry_target" | "carry" => Ok(ContextMode::CarryTarget),
            "reset" => Ok(ContextMode::Reset),
            other => Err(format!(
                "unknown context mode '{}' (expected carry-target or reset)",
                other
            )),
        }
    }
}

/// Configuration for the [`TurnSegmenter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Appended to every message's content before concatenation.
    pub eos_marker: String,
    pub context_mode: ContextMode,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            eos_marker: DEFAULT_EOS_MARKER.to_string(),
            context_mode: ContextMode::default(),
        }
    }
}

/// Turns conversations into training pairs.
///
/// Segmentation is a pure function of the conversation and the config, so a
/// single segmenter can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct TurnSegmenter {
    config: SegmenterConfig,
}

impl TurnSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Segment a conversation and collect its pairs.
    pub fn segment(&self, conversation: &Conversation) -> Vec<TrainingPair> {
        let mut pairs = Vec::new();
        self.walk(conversation, |pair| -> std::result::Result<(), Infallible> {
            pairs.push(pair);
            Ok(())
        })
        .unwrap_or_else(|never| match never {});
        pairs
    }

    /// Segment a conversation, emitting each pair into `sink` as it is flushed.
    /// Returns the number of pairs emitted.
    pub fn segment_into<S>(&self, conversation: &Conversation, sink: &mut S) -> Result<usize>
    where
        S: PairSink + ?Sized,
    {
        let mut emitted = 0;
        self.walk(conversation, |pair| -> Result<(), PrepError> {
            sink.emit(pair)?;
            emitted += 1;
            Ok(())
        })?;
        Ok(emitted)
    }

    fn walk<E>(
        &self,
        conversation: &Conversation,
        mut flush: impl FnMut(TrainingPair) -> std::result::Result<(), E>,
    ) -> std::result::Result<(), E> {
        let eos = self.config.eos_marker.as_str();
        let mut input_text = String::new();
        let mut target_text = String::new();
        let mut last_bucket: Option<Bucket> = None;

        for message in &conversation.messages {
            let bucket = message.bucket();
            match (last_bucket, bucket) {
                // Reply finished, a new input run starts: the pair is complete.
                (Some(Bucket::Target), Bucket::Input) => {
                    let target = std::mem::take(&mut target_text);
                    let carried = match self.config.context_mode {
                        ContextMode::CarryTarget => target.clone(),
                        ContextMode::Reset => String::new(),
                    };
                    flush(TrainingPair {
                        input: std::mem::replace(&mut input_text, carried),
                        target,
                    })?;
                    push_message(&mut input_text, &message.content, eos);
                }
                (_, Bucket::Input) => push_message(&mut input_text, &message.content, eos),
                (_, Bucket::Target) => push_message(&mut target_text, &message.content, eos),
            }
            last_bucket = Some(bucket);
        }

        // A trailing input run has no reply and is dropped.
        if last_bucket == Some(Bucket::Target) {
            flush(TrainingPair {
                input: input_text,
                target: target_text,
            })?;
        }
        Ok(())
    }
}

fn push_message(buf: &mut String, content: &str, eos: &str) {
    buf.push_str(content);
    buf.push_str(eos);
}

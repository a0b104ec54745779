//! Training pairs and the sinks that collect them.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One supervised example: the model sees `input` and learns to produce `target`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingPair {
    pub input: String,
    pub target: String,
}

impl TrainingPair {
    pub fn new(input: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            target: target.into(),
        }
    }
}

/// Receives pairs in the order the segmenter flushes them.
///
/// Implementors must preserve emission order.
pub trait PairSink {
    fn emit(&mut self, pair: TrainingPair) -> Result<()>;
}

impl PairSink for Vec<TrainingPair> {
    fn emit(&mut self, pair: TrainingPair) -> Result<()> {
        self.push(pair);
        Ok(())
    }
}

// Blanket implementation for mutable references to sinks
impl<S: PairSink + ?Sized> PairSink for &mut S {
    fn emit(&mut self, pair: TrainingPair) -> Result<()> {
        (**self).emit(pair)
    }
}

/// Counts pairs passing through to an inner sink.
pub struct CountingSink<S> {
    inner: S,
    count: usize,
}

impl<S: PairSink> CountingSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: PairSink> PairSink for CountingSink<S> {
    fn emit(&mut self, pair: TrainingPair) -> Result<()> {
        self.inner.emit(pair)?;
        self.count += 1;
        Ok(())
    }
}

/// Emit every pair from `pairs` into `sink`, in order.
pub fn emit_all<S, I>(sink: &mut S, pairs: I) -> Result<usize>
where
    S: PairSink + ?Sized,
    I: IntoIterator<Item = TrainingPair>,
{
    let mut n = 0;
    for pair in pairs {
        sink.emit(pair)?;
        n += 1;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_keeps_order() {
        let mut out: Vec<TrainingPair> = Vec::new();
        let n = emit_all(
            &mut out,
            vec![TrainingPair::new("a", "1"), TrainingPair::new("b", "2")],
        )
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(out[0].input, "a");
        assert_eq!(out[1].input, "b");
    }

    #[test]
    fn test_counting_sink_through_reference() {
        let mut out: Vec<TrainingPair> = Vec::new();
        let mut counting = CountingSink::new(&mut out);
        counting.emit(TrainingPair::new("x", "y")).unwrap();
        counting.emit(TrainingPair::new("z", "w")).unwrap();
        assert_eq!(counting.count(), 2);
        drop(counting);
        assert_eq!(out.len(), 2);
    }
}

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use super::analysis::SpectralAnalyzer;
use super::context::ContextLease;

/// Which kind of input a node was built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Playable,
    Live,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Playable => write!(f, "playable"),
            SourceKind::Live => write!(f, "live"),
        }
    }
}

/// Entry point of the graph on the audio thread.
///
/// Device callbacks push interleaved blocks here; the blocks reach the
/// connected analyzer, or are dropped while nothing is connected.
#[derive(Clone, Default)]
pub struct SampleSink {
    slot: Arc<Mutex<Option<SpectralAnalyzer>>>,
}

impl SampleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never blocks: a block arriving while the slot is being swapped is skipped.
    pub fn push(&self, data: &[f32], channels: usize) {
        let mut slot = match self.slot.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        if let Some(analyzer) = slot.as_mut() {
            analyzer.process_interleaved(data, channels);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn connect(&self, analyzer: SpectralAnalyzer) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(analyzer);
    }

    fn disconnect(&self) {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// A running device stream owned by a node.
pub trait ActiveStream {
    /// Stop delivering audio and let go of the device.
    fn stop(&mut self);

    /// A playable source has run out of samples.
    fn is_ended(&self) -> bool {
        false
    }
}

/// One attached source: its running stream, the sink feeding the analyzer
/// and the context lease. Dropping it tears all three down.
pub struct StreamingNode {
    kind: SourceKind,
    label: String,
    sink: SampleSink,
    stream: Option<Box<dyn ActiveStream>>,
    lease: Option<ContextLease>,
}

impl StreamingNode {
    pub(crate) fn new(
        kind: SourceKind,
        label: String,
        sink: SampleSink,
        stream: Box<dyn ActiveStream>,
        lease: ContextLease,
    ) -> Self {
        Self {
            kind,
            label,
            sink,
            stream: Some(stream),
            lease: Some(lease),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }

    pub fn is_ended(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_ended())
    }

    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            self.sink.disconnect();
            stream.stop();
            log::info!("Released {} source: {}", self.kind, self.label);
        }
        self.lease.take();
    }
}

impl Drop for StreamingNode {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for StreamingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingNode")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;

    #[test]
    fn test_sink_feeds_connected_analyzer_only() {
        let sink = SampleSink::new();
        let cfg = AnalyzerConfig { fft_size: 64, hop_size: 64, ..Default::default() };
        let (analyzer, handle) = SpectralAnalyzer::configure(&cfg).unwrap();

        sink.push(&[0.0; 64], 1);
        assert!(!sink.is_connected());

        sink.connect(analyzer);
        sink.push(&[0.0; 128], 2);
        assert_eq!(handle.snapshot().generation, 1);

        sink.disconnect();
        sink.push(&[0.0; 64], 1);
        assert_eq!(handle.snapshot().generation, 1);
    }
}

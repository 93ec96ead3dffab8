use std::path::Path;

use super::analysis::SpectralAnalyzer;
use super::context::AudioContext;
use super::decode::{decode_audio, DecodedTrack};
use super::node::{SampleSink, SourceKind, StreamingNode};
use crate::error::Result;

/// Decoded media ready to be played and analysed.
#[derive(Clone, Debug)]
pub struct PlayableMedia {
    label: String,
    track: DecodedTrack,
}

impl PlayableMedia {
    pub fn open(path: &Path) -> Result<Self> {
        let track = decode_audio(path)?;
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { label, track })
    }

    pub fn from_track(label: impl Into<String>, track: DecodedTrack) -> Self {
        Self {
            label: label.into(),
            track,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn track(&self) -> &DecodedTrack {
        &self.track
    }

    pub fn into_track(self) -> DecodedTrack {
        self.track
    }
}

/// A capture device request. `None` means the default input device.
#[derive(Clone, Debug, Default)]
pub struct LiveCapture {
    device: Option<String>,
}

impl LiveCapture {
    pub fn default_input() -> Self {
        Self::default()
    }

    /// Match the first input device whose name contains `query` (case-insensitive).
    pub fn named(query: impl Into<String>) -> Self {
        Self {
            device: Some(query.into()),
        }
    }

    pub fn device_query(&self) -> Option<&str> {
        self.device.as_deref()
    }
}

/// Input to a session: a media file or a capture device.
#[derive(Clone, Debug)]
pub enum AudioSource {
    Playable(PlayableMedia),
    Live(LiveCapture),
}

impl AudioSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            AudioSource::Playable(_) => SourceKind::Playable,
            AudioSource::Live(_) => SourceKind::Live,
        }
    }

    pub fn label(&self) -> String {
        match self {
            AudioSource::Playable(media) => media.label().to_string(),
            AudioSource::Live(capture) => capture
                .device_query()
                .map_or_else(|| "default input".to_string(), |q| format!("input matching '{}'", q)),
        }
    }
}

/// Adapt either kind of source into a running [`StreamingNode`] feeding `analyzer`.
///
/// Takes the context lease, resumes the context if it is suspended, then
/// opens and starts the device stream. The analyzer is wired in before the
/// stream starts, so the first callback already reaches it.
pub fn attach(
    context: &AudioContext,
    source: AudioSource,
    analyzer: SpectralAnalyzer,
) -> Result<StreamingNode> {
    let lease = context.acquire()?;
    context.resume()?;

    let kind = source.kind();
    let label = source.label();
    let sink = SampleSink::new();
    sink.connect(analyzer);

    let stream = match source {
        AudioSource::Playable(media) => context.device().open_playable(media, sink.clone())?,
        AudioSource::Live(capture) => context.device().open_live(capture, sink.clone())?,
    };

    log::info!("Attached {} source: {}", kind, label);
    Ok(StreamingNode::new(kind, label, sink, stream, lease))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::context::testing::FakeDevice;
    use crate::audio::context::ContextState;
    use crate::config::AnalyzerConfig;
    use crate::error::AnalyzerError;

    fn analyzer() -> SpectralAnalyzer {
        let cfg = AnalyzerConfig { fft_size: 256, hop_size: 256, ..Default::default() };
        SpectralAnalyzer::configure(&cfg).unwrap().0
    }

    fn media() -> AudioSource {
        AudioSource::Playable(PlayableMedia::from_track(
            "tone.wav",
            DecodedTrack {
                samples: vec![0.0; 4096],
                sample_rate: 44100,
                channels: 1,
            },
        ))
    }

    #[test]
    fn test_attach_resumes_context_and_opens_stream() {
        let (context, device) = FakeDevice::context();

        let node = attach(&context, media(), analyzer()).unwrap();
        assert_eq!(node.kind(), SourceKind::Playable);
        assert_eq!(node.label(), "tone.wav");
        assert_eq!(context.state(), ContextState::Running);
        assert_eq!(device.opened.get(), 1);
    }

    #[test]
    fn test_second_attach_is_refused_until_release() {
        let (context, device) = FakeDevice::context();

        let node = attach(&context, AudioSource::Live(LiveCapture::default_input()), analyzer()).unwrap();
        assert!(matches!(attach(&context, media(), analyzer()), Err(AnalyzerError::ContextBusy)));

        node.dispose();
        assert_eq!(device.stops.get(), 1);
        assert!(attach(&context, media(), analyzer()).is_ok());
    }

    #[test]
    fn test_denied_source_is_surfaced_and_frees_context() {
        let (context, device) = FakeDevice::context();
        *device.deny.borrow_mut() = Some("permission denied".into());

        let err = attach(&context, AudioSource::Live(LiveCapture::named("usb")), analyzer()).unwrap_err();
        assert!(matches!(err, AnalyzerError::SourceUnavailable(ref r) if r == "permission denied"));
        assert!(!context.is_busy());
    }

    #[test]
    fn test_first_callback_reaches_analyzer() {
        let (context, device) = FakeDevice::context();
        *device.on_open.borrow_mut() = vec![0.25; 256];
        let cfg = AnalyzerConfig { fft_size: 256, hop_size: 256, ..Default::default() };
        let (analyzer, handle) = SpectralAnalyzer::configure(&cfg).unwrap();

        let _node = attach(&context, AudioSource::Live(LiveCapture::default_input()), analyzer).unwrap();
        assert_eq!(handle.snapshot().generation, 1);
    }

    #[test]
    fn test_labels() {
        assert_eq!(AudioSource::Live(LiveCapture::default_input()).label(), "default input");
        assert_eq!(AudioSource::Live(LiveCapture::named("USB")).label(), "input matching 'USB'");
    }
}

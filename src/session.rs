//! Analysis session: one source, one analyzer, one feature extractor.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::audio::analysis::{AnalyzerHandle, SpectralAnalyzer};
use crate::audio::context::AudioContext;
use crate::audio::features::{AudioAnalysis, FeatureExtractor};
use crate::audio::node::StreamingNode;
use crate::audio::source::{self, AudioSource};
use crate::clock::{Clock, MonotonicClock};
use crate::config::{AnalyzerConfig, Config, FeatureConfig};
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub analyzer: AnalyzerConfig,
    pub features: FeatureConfig,
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            analyzer: config.analyzer.clone(),
            features: config.features.clone(),
        }
    }
}

enum SessionState {
    Idle,
    Active(ActiveSession),
    Disposed,
}

struct ActiveSession {
    node: StreamingNode,
    analyzer: AnalyzerHandle,
    extractor: FeatureExtractor,
}

/// One listening session, from `init` to `dispose`.
///
/// Build a new session for every new source; a session is initialised once
/// and polled with [`analyze`](Self::analyze) once per frame.
pub struct AnalysisSession<C: Clock = MonotonicClock> {
    context: Rc<AudioContext>,
    config: SessionConfig,
    clock: C,
    state: SessionState,
}

impl AnalysisSession<MonotonicClock> {
    pub fn new(context: Rc<AudioContext>, config: SessionConfig) -> Self {
        Self::with_clock(context, config, MonotonicClock::new())
    }
}

impl<C: Clock> AnalysisSession<C> {
    pub fn with_clock(context: Rc<AudioContext>, config: SessionConfig, clock: C) -> Self {
        Self {
            context,
            config,
            clock,
            state: SessionState::Idle,
        }
    }

    /// Attach `source` and wire it to a freshly configured analyzer.
    ///
    /// A failed attach leaves the session idle, so the caller may try again.
    ///
    /// # Panics
    ///
    /// If the session was already initialised or disposed.
    pub fn init(&mut self, source: AudioSource) -> Result<()> {
        assert!(
            matches!(self.state, SessionState::Idle),
            "init() called on a session that is not idle; create a new session for each source"
        );

        self.config.features.validate()?;
        let (analyzer, handle) = SpectralAnalyzer::configure(&self.config.analyzer)?;
        let node = source::attach(&self.context, source, analyzer)?;

        let extractor = FeatureExtractor::new(handle.bin_count(), self.config.features.clone());

        log::info!("Session started: {} ({})", node.label(), node.kind());
        self.state = SessionState::Active(ActiveSession {
            node,
            analyzer: handle,
            extractor,
        });
        Ok(())
    }

    /// Features for the current frame.
    ///
    /// `None` until the analyzer has produced its first transform, and
    /// forever after [`dispose`](Self::dispose).
    ///
    /// # Panics
    ///
    /// If called before [`init`](Self::init).
    pub fn analyze(&mut self) -> Option<AudioAnalysis> {
        let active = match &mut self.state {
            SessionState::Idle => panic!("analyze() called before init()"),
            SessionState::Disposed => return None,
            SessionState::Active(active) => active,
        };

        // One snapshot per call keeps freq and time from the same transform.
        let snapshot = active.analyzer.snapshot();
        if !snapshot.has_data() {
            return None;
        }
        Some(active.extractor.extract(&snapshot.freq, &snapshot.time, self.clock.now()))
    }

    /// Release the source and everything wired to it. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if let SessionState::Active(active) = std::mem::replace(&mut self.state, SessionState::Disposed) {
            log::info!("Session stopped: {}", active.node.label());
            active.node.dispose();
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active(_))
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.state, SessionState::Disposed)
    }

    /// A playable source has played to the end.
    pub fn is_ended(&self) -> bool {
        match &self.state {
            SessionState::Active(active) => active.node.is_ended(),
            _ => false,
        }
    }

    /// Length of `raw_fft` for this session, once initialised.
    pub fn bin_count(&self) -> Option<usize> {
        match &self.state {
            SessionState::Active(active) => Some(active.analyzer.bin_count()),
            _ => None,
        }
    }
}

impl<C: Clock> Drop for AnalysisSession<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct SharedSession<C: Clock> {
    session: RefCell<AnalysisSession<C>>,
    dispose_requested: Cell<bool>,
}

/// Shared handle for frame callbacks.
///
/// Ticks are serialised: a tick that arrives while another is running is
/// dropped. Disposal requested during a tick takes effect when the tick
/// ends, and every tick after disposal is a no-op.
pub struct SessionHandle<C: Clock = MonotonicClock> {
    inner: Rc<SharedSession<C>>,
}

impl<C: Clock> Clone for SessionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C: Clock> SessionHandle<C> {
    pub fn new(session: AnalysisSession<C>) -> Self {
        Self {
            inner: Rc::new(SharedSession {
                session: RefCell::new(session),
                dispose_requested: Cell::new(false),
            }),
        }
    }

    pub fn tick(&self) -> Option<AudioAnalysis> {
        if self.inner.dispose_requested.get() {
            self.finish_dispose();
            return None;
        }

        let mut session = match self.inner.session.try_borrow_mut() {
            Ok(session) => session,
            Err(_) => {
                log::warn!("Overlapping analysis tick ignored");
                return None;
            }
        };

        let result = session.analyze();
        if self.inner.dispose_requested.get() {
            session.dispose();
            return None;
        }
        result
    }

    pub fn dispose(&self) {
        self.inner.dispose_requested.set(true);
        self.finish_dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.dispose_requested.get()
    }

    pub fn is_ended(&self) -> bool {
        self.inner
            .session
            .try_borrow()
            .map(|s| s.is_ended())
            .unwrap_or(false)
    }

    fn finish_dispose(&self) {
        // Busy means a tick is in flight; it disposes on the way out.
        if let Ok(mut session) = self.inner.session.try_borrow_mut() {
            session.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::context::testing::FakeDevice;
    use crate::audio::source::LiveCapture;
    use crate::clock::ManualClock;
    use crate::error::AnalyzerError;
    use std::time::Duration;

    const FRAME: Duration = Duration::from_millis(16);

    fn config() -> SessionConfig {
        SessionConfig {
            analyzer: AnalyzerConfig {
                fft_size: 1024,
                hop_size: 1024,
                ..Default::default()
            },
            features: FeatureConfig::default(),
        }
    }

    fn sine(amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| amplitude * (2.0 * std::f32::consts::PI * 440.0 * n as f32 / 44100.0).sin())
            .collect()
    }

    fn live() -> AudioSource {
        AudioSource::Live(LiveCapture::default_input())
    }

    fn started() -> (AnalysisSession<ManualClock>, FakeDevice, ManualClock, Rc<AudioContext>) {
        let (context, device) = FakeDevice::context();
        let context = Rc::new(context);
        let clock = ManualClock::new();
        let mut session = AnalysisSession::with_clock(Rc::clone(&context), config(), clock.clone());
        session.init(live()).unwrap();
        (session, device, clock, context)
    }

    #[test]
    fn test_absent_until_first_transform() {
        let (mut session, device, _clock, _context) = started();
        assert!(session.analyze().is_none());

        device.feed(&sine(0.5, 512));
        assert!(session.analyze().is_none());

        device.feed(&sine(0.5, 512));
        let frame = session.analyze().unwrap();
        assert_eq!(frame.raw_fft.len(), 512);
        assert_eq!(session.bin_count(), Some(512));
        assert!(frame.volume > 0.3 && frame.volume < 0.4, "volume {}", frame.volume);
    }

    #[test]
    fn test_block_delivered_at_start_is_analysed() {
        let (context, device) = FakeDevice::context();
        *device.on_open.borrow_mut() = vec![0.5; 1024];

        let mut session = AnalysisSession::new(Rc::new(context), config());
        session.init(live()).unwrap();
        assert!(session.analyze().is_some());
    }

    #[test]
    fn test_silent_input_gives_zero_features() {
        let (mut session, device, _clock, _context) = started();
        device.feed(&vec![0.0; 1024]);

        let frame = session.analyze().unwrap();
        assert_eq!(frame.volume, 0.0);
        assert!(!frame.beat);
        assert_eq!(frame.pitch, 0.0);
        assert_eq!(frame.timbre, 0.0);
    }

    #[test]
    fn test_raw_fft_length_is_stable() {
        let (mut session, device, clock, _context) = started();
        for amplitude in [0.0, 0.2, 0.9, 0.1] {
            device.feed(&sine(amplitude, 1024));
            clock.advance(FRAME);
            assert_eq!(session.analyze().unwrap().raw_fft.len(), 512);
        }
    }

    #[test]
    fn test_beat_through_session() {
        let (mut session, device, clock, _context) = started();

        for _ in 0..20 {
            device.feed(&sine(0.1, 1024));
            assert!(!session.analyze().unwrap().beat);
            clock.advance(FRAME);
        }

        device.feed(&sine(0.9, 1024));
        assert!(session.analyze().unwrap().beat);

        // Next frame, same loudness: inside the refractory window
        clock.advance(FRAME);
        assert!(!session.analyze().unwrap().beat);
    }

    #[test]
    #[should_panic(expected = "before init")]
    fn test_analyze_before_init_panics() {
        let (context, _device) = FakeDevice::context();
        let mut session = AnalysisSession::new(Rc::new(context), config());
        session.analyze();
    }

    #[test]
    #[should_panic(expected = "not idle")]
    fn test_double_init_panics() {
        let (mut session, _device, _clock, _context) = started();
        let _ = session.init(live());
    }

    #[test]
    fn test_dispose_releases_source() {
        let (mut session, device, _clock, context) = started();
        device.feed(&vec![0.0; 1024]);
        assert!(context.is_busy());

        session.dispose();
        assert!(session.is_disposed());
        assert_eq!(device.stops.get(), 1);
        assert!(!context.is_busy());
        assert!(session.analyze().is_none());

        session.dispose();
        assert_eq!(device.stops.get(), 1);
    }

    #[test]
    fn test_drop_releases_source() {
        let (session, device, _clock, context) = started();
        drop(session);
        assert_eq!(device.stops.get(), 1);
        assert!(!context.is_busy());
    }

    #[test]
    fn test_failed_init_can_be_retried() {
        let (context, device) = FakeDevice::context();
        let context = Rc::new(context);
        *device.deny.borrow_mut() = Some("permission denied".into());

        let mut session = AnalysisSession::new(Rc::clone(&context), config());
        let err = session.init(live()).unwrap_err();
        assert!(matches!(err, AnalyzerError::SourceUnavailable(_)));
        assert!(!session.is_active());
        assert!(!context.is_busy());

        device.deny.borrow_mut().take();
        session.init(live()).unwrap();
        assert!(session.is_active());
    }

    #[test]
    fn test_invalid_config_fails_init() {
        let (context, device) = FakeDevice::context();
        let mut bad = config();
        bad.analyzer.fft_size = 1000;

        let mut session = AnalysisSession::new(Rc::new(context), bad);
        assert!(matches!(session.init(live()), Err(AnalyzerError::InvalidConfig(_))));
        assert_eq!(device.opened.get(), 0);
    }

    #[test]
    fn test_sessions_share_context_sequentially() {
        let (context, _device) = FakeDevice::context();
        let context = Rc::new(context);

        let mut first = AnalysisSession::new(Rc::clone(&context), config());
        first.init(live()).unwrap();

        let mut second = AnalysisSession::new(Rc::clone(&context), config());
        assert!(matches!(second.init(live()), Err(AnalyzerError::ContextBusy)));

        first.dispose();
        second.init(live()).unwrap();
    }

    #[test]
    fn test_ended_follows_source() {
        let (session, device, _clock, _context) = started();
        assert!(!session.is_ended());
        device.ended.set(true);
        assert!(session.is_ended());
    }

    #[test]
    fn test_stale_tick_after_dispose_is_noop() {
        let (session, device, _clock, _context) = started();
        let handle = SessionHandle::new(session);
        let pending = handle.clone();

        device.feed(&vec![0.0; 1024]);
        assert!(pending.tick().is_some());

        handle.dispose();
        assert!(pending.tick().is_none());
        assert!(pending.tick().is_none());
        assert_eq!(device.stops.get(), 1);
    }

    #[test]
    fn test_overlapping_tick_is_dropped() {
        let (session, device, _clock, _context) = started();
        let handle = SessionHandle::new(session);
        device.feed(&vec![0.0; 1024]);

        let busy = handle.inner.session.borrow_mut();
        assert!(handle.tick().is_none());
        drop(busy);

        assert!(handle.tick().is_some());
    }

    #[test]
    fn test_dispose_mid_tick_is_deferred() {
        let (session, device, _clock, _context) = started();
        let handle = SessionHandle::new(session);
        device.feed(&vec![0.0; 1024]);

        let in_flight = handle.inner.session.borrow_mut();
        handle.dispose();
        assert!(handle.is_disposed());
        assert_eq!(device.stops.get(), 0);
        drop(in_flight);

        assert!(handle.tick().is_none());
        assert_eq!(device.stops.get(), 1);
    }
}

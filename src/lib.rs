//! aquabeat - real-time audio feature extraction for music visualizers.
//!
//! A [`session::AnalysisSession`] attaches a file or capture device to a
//! spectral analyzer and, once per frame, condenses the latest transform
//! into volume, beat, pitch and timbre.

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod pump;
pub mod session;

pub use audio::features::AudioAnalysis;
pub use audio::source::{AudioSource, LiveCapture, PlayableMedia};
pub use error::AnalyzerError;
pub use session::{AnalysisSession, SessionConfig, SessionHandle};

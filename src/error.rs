use thiserror::Error;

/// Errors surfaced by the analysis engine.
///
/// Contract violations (wrong buffer lengths, double `init`, `analyze`
/// before `init`) are not represented here; they panic.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// Permission denied, no device, or undecodable media.
    #[error("audio source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("invalid analyzer configuration: {0}")]
    InvalidConfig(String),

    /// Another session still holds the audio context.
    #[error("audio context is already in use by another session")]
    ContextBusy,
}

impl AnalyzerError {
    pub(crate) fn unavailable(reason: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable(reason.to_string())
    }
}

pub type Result<T, E = AnalyzerError> = std::result::Result<T, E>;

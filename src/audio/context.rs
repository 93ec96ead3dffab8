use std::cell::Cell;
use std::rc::Rc;

use super::device::CpalDevice;
use super::node::{ActiveStream, SampleSink};
use super::source::{LiveCapture, PlayableMedia};
use crate::error::{AnalyzerError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
}

/// Platform audio layer behind an [`AudioContext`].
pub trait AudioDevice {
    /// Make sure the host is ready to deliver audio.
    ///
    /// Hosts without a suspended state (cpal) only check that a device is
    /// there to open. An error keeps the context suspended.
    fn resume(&self) -> Result<()>;

    /// Start playing decoded media, teeing every rendered block into `sink`.
    fn open_playable(&self, media: PlayableMedia, sink: SampleSink) -> Result<Box<dyn ActiveStream>>;

    /// Start capturing from an input device into `sink`.
    fn open_live(&self, capture: LiveCapture, sink: SampleSink) -> Result<Box<dyn ActiveStream>>;
}

/// Process-wide audio context.
///
/// Created once by the host application and shared with every session it
/// starts. Sessions use it one at a time: each attached source holds a
/// lease, and a second attach fails with [`AnalyzerError::ContextBusy`]
/// until the first source is released. The context itself is never torn
/// down by a session.
pub struct AudioContext {
    device: Box<dyn AudioDevice>,
    state: Cell<ContextState>,
    in_use: Rc<Cell<bool>>,
}

impl AudioContext {
    pub fn new(device: Box<dyn AudioDevice>) -> Self {
        Self {
            device,
            state: Cell::new(ContextState::Suspended),
            in_use: Rc::new(Cell::new(false)),
        }
    }

    /// Context over the default cpal host.
    pub fn system() -> Self {
        Self::new(Box::new(CpalDevice::new()))
    }

    pub fn state(&self) -> ContextState {
        self.state.get()
    }

    pub fn resume(&self) -> Result<()> {
        if self.state.get() == ContextState::Suspended {
            self.device.resume()?;
            self.state.set(ContextState::Running);
            log::info!("Audio context resumed");
        }
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.in_use.get()
    }

    pub(crate) fn acquire(&self) -> Result<ContextLease> {
        if self.in_use.replace(true) {
            return Err(AnalyzerError::ContextBusy);
        }
        Ok(ContextLease {
            in_use: Rc::clone(&self.in_use),
        })
    }

    pub(crate) fn device(&self) -> &dyn AudioDevice {
        self.device.as_ref()
    }
}

/// Held by a live node; frees the context when dropped.
pub(crate) struct ContextLease {
    in_use: Rc<Cell<bool>>,
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        self.in_use.set(false);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeDevice;
    use super::*;

    #[test]
    fn test_context_starts_suspended_and_resumes_once() {
        let (context, device) = FakeDevice::context();
        assert_eq!(context.state(), ContextState::Suspended);

        context.resume().unwrap();
        context.resume().unwrap();
        assert_eq!(context.state(), ContextState::Running);
        assert_eq!(device.resumes.get(), 1);
    }

    #[test]
    fn test_failed_resume_stays_suspended() {
        let (context, device) = FakeDevice::context();
        device.no_host.set(true);

        assert!(matches!(context.resume(), Err(AnalyzerError::SourceUnavailable(_))));
        assert_eq!(context.state(), ContextState::Suspended);

        device.no_host.set(false);
        context.resume().unwrap();
        assert_eq!(context.state(), ContextState::Running);
    }

    #[test]
    fn test_lease_is_exclusive_until_dropped() {
        let (context, _device) = FakeDevice::context();

        let lease = context.acquire().unwrap();
        assert!(context.is_busy());
        assert!(matches!(context.acquire(), Err(AnalyzerError::ContextBusy)));

        drop(lease);
        assert!(!context.is_busy());
        assert!(context.acquire().is_ok());
    }
}

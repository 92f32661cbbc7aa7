// SPDX-License-Identifier: GPL-3.0-only

//! Frame source session state

use crate::errors::{RenderError, RenderResult};
use std::fmt;

/// Where a frame source session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing attached
    #[default]
    Idle,
    /// Sizes chosen and the source attached, camera not started
    Configured,
    /// Frames are flowing
    Streaming,
    /// Delivery stopped; a new configuration starts it again
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Configured => "configured",
            SessionState::Streaming => "streaming",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Session lifecycle: `Idle -> Configured -> Streaming -> Stopped`.
///
/// A still capture detaches the feed while streaming and then either
/// resumes streaming or stops.
#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
    capturing: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// A capture has detached the feed and not yet finished
    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn configure(&mut self) -> RenderResult<()> {
        match self.state {
            SessionState::Idle | SessionState::Stopped | SessionState::Configured => {
                self.transition(SessionState::Configured);
                Ok(())
            }
            SessionState::Streaming => Err(self.invalid("configure")),
        }
    }

    pub fn start(&mut self) -> RenderResult<()> {
        match self.state {
            SessionState::Configured => {
                self.transition(SessionState::Streaming);
                Ok(())
            }
            _ => Err(self.invalid("start")),
        }
    }

    /// Stop delivery. Stopping an idle or stopped session does nothing.
    pub fn stop(&mut self) {
        if matches!(
            self.state,
            SessionState::Configured | SessionState::Streaming
        ) {
            self.transition(SessionState::Stopped);
        }
        self.capturing = false;
    }

    /// Detach the feed for a still capture
    pub fn begin_capture(&mut self) -> RenderResult<()> {
        if self.state != SessionState::Streaming {
            return Err(self.invalid("capture"));
        }
        if self.capturing {
            return Err(RenderError::CaptureBusy);
        }
        self.capturing = true;
        Ok(())
    }

    /// Finish a capture, resuming the stream or stopping it
    pub fn finish_capture(&mut self, resume: bool) -> RenderResult<()> {
        if !self.capturing {
            return Err(self.invalid("finish a capture"));
        }
        self.capturing = false;
        if !resume {
            self.transition(SessionState::Stopped);
        }
        Ok(())
    }

    /// Back to `Idle` once everything is released
    pub fn reset(&mut self) {
        self.transition(SessionState::Idle);
        self.capturing = false;
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "Frame session transition");
            self.state = next;
        }
    }

    fn invalid(&self, action: &str) -> RenderError {
        RenderError::Configuration(format!("Cannot {} while {}", action, self.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle() {
        let mut session = Session::new();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.start().is_err());

        session.configure().unwrap();
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(session.configure().is_err());

        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        session.configure().unwrap();
        session.start().unwrap();
    }

    #[test]
    fn test_capture_then_resume() {
        let mut session = Session::new();
        session.configure().unwrap();
        session.start().unwrap();

        session.begin_capture().unwrap();
        assert!(session.is_capturing());
        assert_eq!(session.begin_capture(), Err(RenderError::CaptureBusy));
        session.finish_capture(true).unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(!session.is_capturing());
    }

    #[test]
    fn test_capture_then_stop() {
        let mut session = Session::new();
        session.configure().unwrap();
        assert!(session.begin_capture().is_err());
        session.start().unwrap();
        session.begin_capture().unwrap();
        session.finish_capture(false).unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.finish_capture(true).is_err());
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the rendering engine and its camera collaborator

use std::fmt;

/// Result type alias using RenderError
pub type RenderResult<T> = Result<T, RenderError>;

/// Result type alias using CameraError
pub type CameraResult<T> = Result<T, CameraError>;

/// Main engine error type
#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    /// Requested size or format exceeds what the device supports
    Configuration(String),
    /// Shader module failed to compile or the render pipeline failed to link
    Linkage {
        /// Stage label
        stage: String,
        /// Driver message
        message: String,
    },
    /// A single acquire/present failure that is recovered by recreating the surface
    TransientDriver(String),
    /// The device was lost; every GPU handle tied to it is invalid
    ContextLost(String),
    /// Camera collaborator reported a failure
    Camera(CameraError),
    /// Pixel readback failed
    Readback(String),
    /// A capture request is already waiting for the next frame
    CaptureBusy,
    /// The render thread has already exited
    ThreadExited,
}

/// Camera collaborator errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// Camera has not been opened
    NotOpened,
    /// Camera is in use by another client
    Busy,
    /// Hardware or service failure
    Hardware(String),
    /// Requested operation is not available on this device
    Unsupported(String),
}

impl RenderError {
    /// Whether the render thread must stop after this error
    ///
    /// Setup failures are fatal. Driver and context failures are recovered
    /// by the render loop itself.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RenderError::TransientDriver(_) | RenderError::ContextLost(_)
        )
    }

    /// Build a linkage error for a named stage
    pub fn linkage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        RenderError::Linkage {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            RenderError::Linkage { stage, message } => {
                write!(f, "Shader linkage failed for '{}': {}", stage, message)
            }
            RenderError::TransientDriver(msg) => write!(f, "Transient driver error: {}", msg),
            RenderError::ContextLost(msg) => write!(f, "Graphics context lost: {}", msg),
            RenderError::Camera(e) => write!(f, "Camera error: {}", e),
            RenderError::Readback(msg) => write!(f, "Readback failed: {}", msg),
            RenderError::CaptureBusy => write!(f, "A capture is already pending"),
            RenderError::ThreadExited => write!(f, "Render thread has exited"),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::NotOpened => write!(f, "Camera is not opened"),
            CameraError::Busy => write!(f, "Camera is busy"),
            CameraError::Hardware(msg) => write!(f, "Hardware error: {}", msg),
            CameraError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
        }
    }
}

impl std::error::Error for RenderError {}
impl std::error::Error for CameraError {}

impl From<CameraError> for RenderError {
    fn from(err: CameraError) -> Self {
        RenderError::Camera(err)
    }
}

impl From<wgpu::Error> for RenderError {
    fn from(err: wgpu::Error) -> Self {
        match err {
            wgpu::Error::OutOfMemory { .. } => {
                RenderError::Configuration(format!("Out of GPU memory: {}", err))
            }
            _ => RenderError::Configuration(err.to_string()),
        }
    }
}

impl From<wgpu::SurfaceError> for RenderError {
    fn from(err: wgpu::SurfaceError) -> Self {
        match err {
            wgpu::SurfaceError::OutOfMemory => RenderError::ContextLost(err.to_string()),
            _ => RenderError::TransientDriver(err.to_string()),
        }
    }
}

impl From<String> for RenderError {
    fn from(msg: String) -> Self {
        RenderError::Configuration(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(RenderError::Configuration("too big".into()).is_fatal());
        assert!(RenderError::linkage("grayscale", "bad token").is_fatal());
        assert!(!RenderError::TransientDriver("outdated".into()).is_fatal());
        assert!(!RenderError::ContextLost("device lost".into()).is_fatal());
    }

    #[test]
    fn test_surface_error_mapping() {
        assert!(matches!(
            RenderError::from(wgpu::SurfaceError::Outdated),
            RenderError::TransientDriver(_)
        ));
        assert!(matches!(
            RenderError::from(wgpu::SurfaceError::OutOfMemory),
            RenderError::ContextLost(_)
        ));
    }

    #[test]
    fn test_display() {
        let err = RenderError::from(CameraError::Busy);
        assert_eq!(err.to_string(), "Camera error: Camera is busy");
    }
}

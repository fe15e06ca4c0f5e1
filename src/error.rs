//! Error taxonomy for the fusion kernel.
//!
//! Session-level errors (`SetupError`) are fatal to `start()` and require an
//! explicit retry. Per-frame errors (`FrameError`) are classified and logged
//! where they happen; they never cross a callback boundary.

use thiserror::Error;

/// Which capture output failed to attach.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    Color,
    Depth,
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputKind::Color => write!(f, "color"),
            OutputKind::Depth => write!(f, "depth"),
        }
    }
}

/// Failure while bringing a capture session up.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum SetupError {
    #[error("no color + depth capable capture device is available")]
    DeviceUnavailable,

    #[error("capture authorization has not been granted")]
    PermissionDenied,

    #[error("failed to attach capture input: {0}")]
    InputAttachFailed(String),

    #[error("failed to attach {output} output: {reason}")]
    OutputAttachFailed { output: OutputKind, reason: String },

    #[error("failed to configure capture session: {0}")]
    ConfigurationFailed(String),
}

impl SetupError {
    /// Single human-readable message per error kind, suitable for display.
    pub fn user_message(&self) -> &'static str {
        match self {
            SetupError::DeviceUnavailable => "Depth camera unavailable",
            SetupError::PermissionDenied => "Camera access was not authorized",
            SetupError::InputAttachFailed(_) => "Failed to set up camera input",
            SetupError::OutputAttachFailed { .. } => "Failed to set up camera output",
            SetupError::ConfigurationFailed(_) => "Failed to configure camera",
        }
    }
}

/// Per-frame failure. Recovered silently: prior state is retained.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("depth unavailable: {0}")]
    DepthUnavailable(String),

    /// Colour buffer does not match its declared dimensions.
    #[error("color frame unavailable: {0}")]
    ColorUnavailable(String),
}

/// The detection model could not be loaded. Detection stays disabled.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("unknown detection backend '{0}'")]
    UnknownBackend(String),

    #[error("detection backend '{0}' requires the {1} feature")]
    FeatureDisabled(String, &'static str),

    #[error("failed to load model: {0:#}")]
    Load(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_errors_map_to_one_message_per_kind() {
        assert_eq!(
            SetupError::DeviceUnavailable.user_message(),
            "Depth camera unavailable"
        );
        assert_eq!(
            SetupError::InputAttachFailed("busy".into()).user_message(),
            SetupError::InputAttachFailed("other".into()).user_message()
        );
        let output = SetupError::OutputAttachFailed {
            output: OutputKind::Depth,
            reason: "rejected".into(),
        };
        assert_eq!(output.user_message(), "Failed to set up camera output");
        assert!(output.to_string().contains("depth output"));
    }

    #[test]
    fn model_load_error_wraps_anyhow_context() {
        let err: ModelLoadError = anyhow::anyhow!("missing file").into();
        assert!(err.to_string().contains("missing file"));
    }
}

//! Error types for framepipe.

use thiserror::Error;

/// Coarse classification of a [`FramepipeError`].
///
/// Every error produced by the pipeline falls into one of these buckets;
/// the orchestrator uses it to decide how a stage failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid parameters, unsupported formats, missing collaborators.
    Configuration,
    /// A buffer pool or other fixed resource could not be allocated.
    ResourceExhaustion,
    /// An external processing unit (device, encoder, sink) failed.
    Processing,
    /// Misuse of a coordination primitive.
    ProtocolViolation,
    /// Operating system I/O.
    Io,
}

#[derive(Error, Debug)]
pub enum FramepipeError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Pipeline configuration error: {message}")]
    Configuration { message: String },

    #[error("Unsupported video standard {standard}: {message}")]
    UnsupportedStandard { standard: String, message: String },

    // Resource errors
    #[error("Buffer pool '{pool}' exhausted: {message}")]
    ResourceExhaustion { pool: String, message: String },

    // Processing errors
    #[error("Device error: {message}")]
    Device { message: String },

    #[error("Encoder '{codec}' failed: {message}")]
    Encode { codec: String, message: String },

    #[error("Sink '{sink}' failed: {message}")]
    Sink { sink: String, message: String },

    #[error("Stage '{stage}' panicked: {message}")]
    StagePanicked { stage: String, message: String },

    // Coordination errors
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("Channel '{channel}' destroyed while in use")]
    ChannelDestroyed { channel: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FramepipeError {
    /// Shorthand for [`FramepipeError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for [`FramepipeError::ProtocolViolation`].
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Shorthand for [`FramepipeError::Device`].
    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigFileNotFound { .. }
            | Self::ConfigInvalidValue { .. }
            | Self::Config(_)
            | Self::Configuration { .. }
            | Self::UnsupportedStandard { .. } => ErrorCategory::Configuration,
            Self::ResourceExhaustion { .. } => ErrorCategory::ResourceExhaustion,
            Self::Device { .. }
            | Self::Encode { .. }
            | Self::Sink { .. }
            | Self::StagePanicked { .. } => ErrorCategory::Processing,
            Self::ProtocolViolation { .. } | Self::ChannelDestroyed { .. } => {
                ErrorCategory::ProtocolViolation
            }
            Self::Io(_) => ErrorCategory::Io,
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, FramepipeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = FramepipeError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_unsupported_standard_display() {
        let error = FramepipeError::UnsupportedStandard {
            standard: "1080I 30".to_string(),
            message: "need D1 or 720P input".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Unsupported video standard 1080I 30: need D1 or 720P input"
        );
    }

    #[test]
    fn test_resource_exhaustion_display() {
        let error = FramepipeError::ResourceExhaustion {
            pool: "writer".to_string(),
            message: "no free buffer to prime downstream".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Buffer pool 'writer' exhausted: no free buffer to prime downstream"
        );
    }

    #[test]
    fn test_encode_display() {
        let error = FramepipeError::Encode {
            codec: "rle".to_string(),
            message: "output buffer too small".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Encoder 'rle' failed: output buffer too small"
        );
    }

    #[test]
    fn test_channel_destroyed_display() {
        let error = FramepipeError::ChannelDestroyed {
            channel: "capture-out".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Channel 'capture-out' destroyed while in use"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: FramepipeError = io_error.into();
        assert!(error.to_string().starts_with("I/O error:"));
        assert_eq!(error.category(), ErrorCategory::Io);
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_error = toml::from_str::<toml::Value>("= nope").unwrap_err();
        let error: FramepipeError = toml_error.into();
        assert_eq!(error.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            FramepipeError::configuration("x").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            FramepipeError::protocol("x").category(),
            ErrorCategory::ProtocolViolation
        );
        assert_eq!(
            FramepipeError::device("x").category(),
            ErrorCategory::Processing
        );
        assert_eq!(
            FramepipeError::StagePanicked {
                stage: "video".into(),
                message: "boom".into()
            }
            .category(),
            ErrorCategory::Processing
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FramepipeError>();
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let io_error = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let error: FramepipeError = io_error.into();
        assert!(error.source().is_some());
    }
}

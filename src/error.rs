//! Error handling for the Deep Insight telemetry engine.

/// A specialized `Result` type for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// The main error type for telemetry sources and the engine.
///
/// Adapters report failures through this type; the engine never propagates
/// them out of an update cycle. The variant decides the degradation policy:
/// structural failures mark a metric unavailable, everything else keeps the
/// last known value.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The whole subsystem is absent (no driver, no counters, no inventory)
    #[error("{subsystem} unavailable: {reason}")]
    Unavailable {
        subsystem: &'static str,
        reason: String,
    },

    /// A single read failed this tick
    #[error("Transient read failure: {0}")]
    Transient(String),

    /// The handle behind a source is no longer valid
    #[error("Structural failure: {0}")]
    Structural(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Counter or inventory output could not be parsed
    #[error("Failed to parse telemetry data: {0}")]
    ParseError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// NVML driver error
    #[cfg(feature = "nvml")]
    #[error("NVML error: {0}")]
    Nvml(#[from] nvml_wrapper::error::NvmlError),
}

impl TelemetryError {
    /// Create a new subsystem-unavailable error
    pub fn unavailable(subsystem: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            subsystem,
            reason: reason.into(),
        }
    }

    /// Create a new transient read error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a new structural error
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    /// Create a new parse error
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the failure invalidates the source's handle rather than a
    /// single reading.
    pub fn is_structural(&self) -> bool {
        match self {
            Self::Structural(_) | Self::Unavailable { .. } => true,
            #[cfg(feature = "nvml")]
            Self::Nvml(err) => {
                use nvml_wrapper::error::NvmlError;
                matches!(
                    err,
                    NvmlError::GpuLost
                        | NvmlError::NotFound
                        | NvmlError::InvalidArg
                        | NvmlError::Uninitialized
                        | NvmlError::DriverNotLoaded
                )
            }
            _ => false,
        }
    }
}

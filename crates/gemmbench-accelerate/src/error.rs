use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by operations, the device context and the harnesses.
#[derive(Debug, Error)]
pub enum AccelError {
    #[error("shader compile failed for '{label}': {message}")]
    ShaderCompile { label: String, message: String },

    #[error("allocation rejected for '{label}': {message}")]
    Allocation { label: String, message: String },

    #[error("fence wait for value {value} timed out after {waited:?}")]
    SyncTimeout { value: u64, waited: Duration },

    #[error(
        "variant '{variant}' diverges from the reference at {mismatches} element(s); \
         first at index {first_index}: expected {expected}, got {actual}"
    )]
    ComparisonMismatch {
        variant: String,
        mismatches: usize,
        first_index: usize,
        expected: String,
        actual: String,
    },

    #[error("{op}: {message}")]
    InvalidState { op: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("device error: {0}")]
    Device(String),
}

impl AccelError {
    pub fn shader_compile(label: impl Into<String>, message: impl Into<String>) -> Self {
        AccelError::ShaderCompile {
            label: label.into(),
            message: message.into(),
        }
    }

    pub fn allocation(label: impl Into<String>, message: impl Into<String>) -> Self {
        AccelError::Allocation {
            label: label.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state(op: impl Into<String>, message: impl Into<String>) -> Self {
        AccelError::InvalidState {
            op: op.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        AccelError::Config(message.into())
    }

    /// Short tag used in reports and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            AccelError::ShaderCompile { .. } => "shader-compile",
            AccelError::Allocation { .. } => "allocation",
            AccelError::SyncTimeout { .. } => "sync-timeout",
            AccelError::ComparisonMismatch { .. } => "comparison-mismatch",
            AccelError::InvalidState { .. } => "invalid-state",
            AccelError::Config(_) => "config",
            AccelError::Device(_) => "device",
        }
    }
}

impl From<wgpu::RequestDeviceError> for AccelError {
    fn from(err: wgpu::RequestDeviceError) -> Self {
        AccelError::Device(err.to_string())
    }
}

impl From<wgpu::BufferAsyncError> for AccelError {
    fn from(err: wgpu::BufferAsyncError) -> Self {
        AccelError::Device(format!("buffer map failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, AccelError>;

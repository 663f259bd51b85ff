use thiserror::Error;

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;

/// Closed error taxonomy for the runtime layer. Every variant names the
/// adapter (or stage) that raised it; `Backend` messages are taken verbatim
/// from the native engine's last-error register.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{backend}: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[error("artifact inspection: {message}")]
    Configuration { message: String },

    #[error("{backend}: input '{name}' should have dtype {expected} but {supplied} was provided")]
    TypeMismatch {
        backend: &'static str,
        name: String,
        expected: &'static str,
        supplied: &'static str,
    },

    #[error("{backend}: shape {requested:?} for '{name}' does not cover the {expected} recorded elements")]
    Shape {
        backend: &'static str,
        name: String,
        requested: Vec<usize>,
        expected: usize,
    },

    #[error("{backend}: {kind} index {index} is out of range (count {count})")]
    Index {
        backend: &'static str,
        kind: &'static str,
        index: usize,
        count: usize,
    },

    #[error("{backend}: {operation} is not supported")]
    Unsupported {
        backend: &'static str,
        operation: String,
    },

    #[error("{backend}: artifact API version {found} is outside the supported range {min}..={max}")]
    UnsupportedModelVersion {
        backend: &'static str,
        found: u32,
        min: u32,
        max: u32,
    },

    #[error("artifact inspection i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        RuntimeError::Backend {
            backend,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        RuntimeError::Configuration {
            message: message.into(),
        }
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AethonxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Subprocess error: {0}")]
    Subprocess(String),

    #[error("Source '{source_name}' failed: {message}")]
    SourceFailed { source_name: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AethonxError {
    /// True when the error is a deliberate cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AethonxError::Cancelled)
    }
}

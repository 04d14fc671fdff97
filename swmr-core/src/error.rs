use thiserror::Error;

/// The error kinds the core distinguishes. A torn read is deliberately *not*
/// a variant here: it is non-fatal, so it is surfaced as
/// [`crate::reader::EotOutcome::NoChange`] instead of an `Err`.
#[derive(Debug, Error)]
pub enum SwmrError {
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    #[error("shadow-file I/O failure")]
    Io(#[from] std::io::Error),

    #[error("internal consistency violation: {0}")]
    Consistency(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SwmrError>;

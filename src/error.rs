use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("missing column: {0}")]
    MissingColumn(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MetaError>;

/// Ways a weighted least-squares solve can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinalgFailure {
    #[error("singular matrix")]
    Singular,

    #[error("non-finite values in matrix computation")]
    NonFinite,
}

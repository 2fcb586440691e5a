use thiserror::Error;

#[derive(Debug, Error)]
pub enum PropsyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl PropsyncError {
    /// Storage failures are retried by the next cycle; everything else needs an operator.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

pub type PropsyncResult<T> = Result<T, PropsyncError>;

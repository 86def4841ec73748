use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The backing store could not be read or written.
    #[error("storage unavailable: {0:#}")]
    Persistence(#[source] anyhow::Error),
    /// Malformed base64 or a key of the wrong length.
    #[error("{0}")]
    Decode(String),
    /// The signature library rejected its input.
    #[error("{0}")]
    Crypto(String),
}

impl ExchangeError {
    pub fn persistence(err: impl Into<anyhow::Error>) -> Self {
        Self::Persistence(err.into())
    }
}

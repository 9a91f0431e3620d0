use tafwatch_core::errors::FetchError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("malformed TMI identifier: {0}")]
    MalformedIdentifier(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Fetch(e) => e.is_retryable(),
            StoreError::MalformedIdentifier(_) => false,
        }
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("chat title generation canceled")]
    TitleGenerationCanceled,
}

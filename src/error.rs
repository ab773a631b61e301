use crate::history::HistoryError;
use crate::upload::UploadError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no active conversation")]
    NoActiveConversation,
    #[error("unknown message {0}")]
    UnknownMessage(String),
    #[error("message {0} is not in a retryable state")]
    NotRetryable(String),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

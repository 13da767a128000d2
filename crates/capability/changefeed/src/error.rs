use crop_farm::FarmError;
use crop_storage::StorageError;
use domain::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum ChangeFeedError {
    #[error("change source disconnected: {0}")]
    Disconnected(String),
    #[error("undecodable change on {channel}: {message}")]
    Decode { channel: String, message: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Farm(#[from] FarmError),
}

impl ChangeFeedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChangeFeedError::Disconnected(_) => ErrorKind::BackendFailure,
            ChangeFeedError::Decode { .. } => ErrorKind::InvalidInput,
            ChangeFeedError::Storage(err) => err.kind(),
            ChangeFeedError::Farm(err) => err.kind(),
        }
    }
}

impl From<sqlx::Error> for ChangeFeedError {
    fn from(err: sqlx::Error) -> Self {
        ChangeFeedError::Storage(StorageError::from(err))
    }
}

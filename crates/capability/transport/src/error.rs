use crop_storage::StorageError;
use domain::ErrorKind;

/// 设备通信错误。
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("device request failed: {0}")]
    Request(String),
    #[error("device request timed out: {0}")]
    Timeout(String),
    #[error("device {uri} responded with status {status}")]
    Status { uri: String, status: u16 },
    #[error("device payload invalid: {0}")]
    Decode(String),
    #[error("invalid device uri: {0}")]
    InvalidUri(String),
    #[error("device state store error: {0}")]
    Storage(#[from] StorageError),
    #[error("notify error: {0}")]
    Notify(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::InvalidUri(_) | TransportError::Decode(_) => ErrorKind::InvalidInput,
            TransportError::Storage(err) => err.kind(),
            _ => ErrorKind::BackendFailure,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let uri = err
            .url()
            .map(|url| url.to_string())
            .unwrap_or_default();
        if err.is_timeout() {
            TransportError::Timeout(uri)
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status {
                uri,
                status: status.as_u16(),
            }
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BvcError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Request blocked by the remote site (HTTP 403): {0}")]
    Blocked(String),

    #[error("Bad response: {0}")]
    BadResponse(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    ArrowError(String),

    #[error("Date parsing error: {0}")]
    DateError(#[from] chrono::ParseError),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Empty payload: {0}")]
    EmptyPayload(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Report extraction failed: {0}")]
    Extraction(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, BvcError>;

// 用于从字符串创建错误
impl From<String> for BvcError {
    fn from(s: String) -> Self {
        BvcError::Unknown(s)
    }
}

impl From<&str> for BvcError {
    fn from(s: &str) -> Self {
        BvcError::Unknown(s.to_string())
    }
}

impl From<arrow::error::ArrowError> for BvcError {
    fn from(e: arrow::error::ArrowError) -> Self {
        BvcError::ArrowError(e.to_string())
    }
}

impl BvcError {
    /// Whether a transport failure is worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            BvcError::RequestError(e) => e.is_timeout() || e.is_connect(),
            BvcError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

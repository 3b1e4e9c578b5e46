use thiserror::Error;

pub type Result<T> = std::result::Result<T, LokiError>;

#[derive(Debug, Error)]
pub enum LokiError {
    #[error("invalid time format: {input}")]
    InvalidTimeFormat { input: String },

    #[error("missing required parameter: {0}")]
    MissingRequiredParameter(&'static str),

    #[error("invalid argument '{name}': expected {expected}")]
    InvalidArgument { name: String, expected: &'static str },

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("HTTP error: {status} - {body}")]
    BackendHttpError { status: u16, body: String },

    #[error("loki error: {message}")]
    BackendReportedError { message: String },

    #[error("failed to decode backend response: {0}")]
    DecodeError(String),

    #[error("failed to encode JSON: {0}")]
    EncodeError(String),

    #[error("unsupported format: {format}. Supported formats: raw, json, text")]
    UnsupportedFormat { format: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("malformed stream: {0}")]
    MalformedStream(String),

    #[error("buffer exhausted: {0}")]
    BufferExhaustion(String),

    #[error("audio sink error: {0}")]
    Sink(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PlayError>;

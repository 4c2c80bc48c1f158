use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoapCheckError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid CoAP code: {0}")]
    InvalidCode(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

pub type Result<T> = std::result::Result<T, CoapCheckError>;

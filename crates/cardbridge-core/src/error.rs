use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Device identity errors
    #[error("Invalid device key: {0}")]
    InvalidDeviceKey(String),

    #[error("Invalid hex data: {0}")]
    InvalidHex(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

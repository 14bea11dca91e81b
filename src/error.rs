use std::io;

/// Error taxonomy for the protocol engine. Variants are kinds, not identifiers:
/// several distinct failures (a bad packet id, a short source read, an oversized
/// string) all surface as `InvalidArgument`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("framing error: {0}")]
    FramingError(String),

    #[error("usb i/o error: {0}")]
    IoError(String),

    #[error("device reported an error (ack={0})")]
    DeviceError(i32),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e.to_string())
    }
}

impl From<rusb::Error> for Error {
    fn from(e: rusb::Error) -> Self {
        Error::IoError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

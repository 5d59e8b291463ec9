#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failure")]
    Failure,

    #[error("not enough data")]
    NotEnoughData,

    #[error("invalid format: {0}")]
    InvalidFormat(&'static str),

    #[error("invalid parameters")]
    InvalidParameters,

    #[error("out of range")]
    OutOfRange,

    #[error("invalid rtp constructor type: {0:#04x}")]
    InvalidRtpConstructorType(u8),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

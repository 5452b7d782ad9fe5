use thiserror::Error;

#[derive(Debug, Error)]
pub enum RconError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("packet exceeds the 1460-byte MTU limit")]
    PacketTooLarge,

    #[error("packet shorter than the minimum 10-byte frame")]
    PacketTooShort,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("remote console unavailable after exhausting reconnection attempts")]
    RconUnavailable,
}

pub type Result<T> = std::result::Result<T, RconError>;

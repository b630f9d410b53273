use nom::error::ErrorKind;
use thiserror::Error;

use crate::message::AlertDescription;

/// Errors produced by the engine.
///
/// Records that fail parsing, replay checks or authentication are dropped
/// without producing an error. Everything else that ends a session is
/// reported as the `reason` of [`Output::Closed`](crate::Output::Closed).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Parse incomplete")]
    ParseIncomplete,

    #[error("Parse error: {0:?}")]
    ParseError(ErrorKind),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Handshake failure: {0}")]
    HandshakeFailure(String),

    #[error("Unsupported protocol version: {0:#06x}")]
    UnsupportedVersion(u16),

    #[error("Finished verify_data did not match the transcript")]
    FinishedMismatch,

    #[error("Unknown PSK identity")]
    UnknownPskIdentity,

    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Peer sent fatal alert: {0:?}")]
    PeerAlert(AlertDescription),

    #[error("Peer closed the connection")]
    PeerClosed,

    #[error("Timeout: {0}")]
    Timeout(&'static str),

    #[error("Session evicted to make room for another peer")]
    Evicted,

    #[error("Too many records failed authentication")]
    TooManyAuthFailures,

    #[error("Not connected")]
    NotConnected,

    #[error("Unknown peer")]
    UnknownPeer,

    #[error("Transmit queue full")]
    TransmitQueueFull,

    #[error("Application data too large: {0} bytes")]
    DataTooLarge(usize),

    #[error("Record sequence number space exhausted")]
    SequenceExhausted,

    #[error("Epoch is not allowed to wrap")]
    WrappedEpoch,

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl Error {
    /// The fatal alert we send to the peer when this error ends a session.
    ///
    /// `None` means the session is torn down silently.
    pub(crate) fn alert(&self) -> Option<AlertDescription> {
        let d = match self {
            Error::ParseIncomplete | Error::ParseError(_) => AlertDescription::DecodeError,
            Error::UnexpectedMessage(_) => AlertDescription::UnexpectedMessage,
            Error::ProtocolViolation(_) => AlertDescription::IllegalParameter,
            Error::HandshakeFailure(_) => AlertDescription::HandshakeFailure,
            Error::UnsupportedVersion(_) => AlertDescription::ProtocolVersion,
            Error::FinishedMismatch => AlertDescription::DecryptError,
            Error::UnknownPskIdentity => AlertDescription::UnknownPskIdentity,
            Error::CryptoError(_) | Error::SequenceExhausted | Error::WrappedEpoch => {
                AlertDescription::InternalError
            }
            _ => return None,
        };
        Some(d)
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::ParseIncomplete,
            nom::Err::Error(x) | nom::Err::Failure(x) => Error::ParseError(x.code),
        }
    }
}

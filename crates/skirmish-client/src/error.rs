//! Error taxonomy for session setup and remote calls.

use skirmish_core::CallError;
use skirmish_proto::codec::CodecError;
use skirmish_proto::{RejectReason, WireError};
use thiserror::Error;

/// Why establishing a session failed. None of these are retried
/// automatically; the caller decides whether to try again.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Transport failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame codec failure: {0}")]
    Codec(CodecError),

    /// The peer went away between the hello and the welcome.
    #[error("Connection closed during handshake")]
    ClosedDuringHandshake,

    /// The dial or the welcome took longer than the request timeout.
    #[error("Handshake timed out")]
    Timeout,

    #[error("Handshake rejected: {0:?}")]
    Rejected(RejectReason),

    /// The server answered the hello with something other than a welcome
    /// or a reject.
    #[error("Unexpected handshake reply")]
    UnexpectedReply,
}

impl From<CodecError> for ConnectError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(io) if is_disconnect(&io) => ConnectError::ClosedDuringHandshake,
            CodecError::Io(io) => ConnectError::Io(io),
            other => ConnectError::Codec(other),
        }
    }
}

fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
    )
}

/// Why a correlated request produced no usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No response arrived within the configured request timeout.
    #[error("Request timed out")]
    Timeout,

    /// The connection dropped before the response arrived, or the session
    /// was already closed.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The host or server answered with a typed refusal.
    #[error("Refused by remote: {0}")]
    Refused(WireError),

    /// The response arrived but had the wrong shape for the request.
    #[error("Malformed response for this request")]
    UnexpectedResponse,
}

/// Failure of a lobby operation through a handle, local or remote.
#[derive(Debug, Error)]
pub enum LobbyError {
    /// The authoritative model refused the call.
    #[error(transparent)]
    Call(#[from] CallError),

    /// The call never reached the authoritative model.
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Failure while driving or following a match-start sequence.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Match start cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("A match sequence is already running")]
    AlreadyRunning,

    #[error("Only the hosting session can drive match preparation")]
    NotHost,

    #[error(transparent)]
    Request(#[from] RequestError),
}

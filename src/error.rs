//! Main Crate Error

use std::fmt::{self, Display, Formatter};

/// Errors that can be reported between nodes in the DHT.
///
/// The numeric values are the stable wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The request simply didn't make any sense.
    BadRequest = 1,
    /// The request was parsed but not recognised.
    UnknownRequest = 2,
    /// The request was parsed and recognised but the node encountered a problem
    /// when dealing with it.
    InternalError = 3,
    /// The request was too big for the node to handle.
    RequestTooBig = 4,
    /// Unsupported version of the protocol.
    UnsupportedProtocol = 5,
    /// The request could not be cryptographically verified.
    UnverifiableProvenance = 6,
    /// The key for an item did not match as expected.
    KeyMismatch = 7,
    /// The value is superceded (a newer version is known to the node already).
    SupersededValue = 8,
}

/// Wire code and description of every [ErrorCode], in wire order.
pub const ERRORS: [(i32, &str); 8] = [
    (1, "Bad request"),
    (2, "Unknown request"),
    (3, "Internal error"),
    (4, "Request too big"),
    (5, "Unsupported protocol"),
    (6, "Unverifiable provenance"),
    (7, "Key mismatch"),
    (8, "Superceded value"),
];

impl ErrorCode {
    /// Every code, in wire order.
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::BadRequest,
        ErrorCode::UnknownRequest,
        ErrorCode::InternalError,
        ErrorCode::RequestTooBig,
        ErrorCode::UnsupportedProtocol,
        ErrorCode::UnverifiableProvenance,
        ErrorCode::KeyMismatch,
        ErrorCode::SupersededValue,
    ];

    /// The integer sent on the wire.
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Parse a wire code, returns `None` for codes outside `1..=8`.
    pub fn from_code(code: i32) -> Option<ErrorCode> {
        usize::try_from(code)
            .ok()
            .and_then(|code| code.checked_sub(1))
            .and_then(|index| Self::ALL.get(index).copied())
    }

    /// Human readable description sent alongside the code.
    pub fn description(&self) -> &'static str {
        ERRORS[*self as usize - 1].1
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

/// The payload of an RPC error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub description: String,
}

impl ProtocolError {
    pub fn new(code: ErrorCode) -> Self {
        code.into()
    }
}

impl From<ErrorCode> for ProtocolError {
    fn from(code: ErrorCode) -> Self {
        Self {
            code,
            description: code.description().to_string(),
        }
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description, self.code.code())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Outcome of a failed remote procedure call, as reported by a [crate::Transport]
/// or by the node's own RPC timeout.
pub enum RpcError {
    #[error("Request timed out")]
    /// No response within the RPC timeout.
    Timeout,

    #[error("Peer responded with an error: {0}")]
    /// The peer answered with one of the [ErrorCode]s.
    Peer(ProtocolError),

    #[error("Malformed response: {0}")]
    /// The response could not be parsed.
    Malformed(String),

    #[error("Peer unreachable: {0}")]
    /// The transport could not deliver the request at all.
    Unreachable(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Local failure kinds surfaced to callers.
pub enum Error {
    #[error("Operation timed out")]
    /// No response within the allowed time.
    Timeout,

    #[error("Peer protocol error: {0}")]
    /// A peer returned one of the wire [ErrorCode]s.
    PeerProtocol(ProtocolError),

    #[error("Malformed input: {0}")]
    /// Unparseable local input.
    Malformed(String),

    #[error("Not found")]
    /// Lookup or retrieve exhausted without a result.
    NotFound,

    #[error("Superceded value")]
    /// A newer value is already known.
    Superseded,

    #[error("Failed to load persisted values: {0}")]
    /// The [crate::Persistence] backend failed while the node was starting.
    Persistence(String),

    #[error("I/O error: {0}")]
    /// The node could not acquire an operating system resource, like its actor thread.
    Io(String),

    #[error("The Dht was shutdown")]
    /// The node's actor thread is no longer running.
    Shutdown,
}

impl From<ProtocolError> for Error {
    fn from(error: ProtocolError) -> Self {
        match error.code {
            ErrorCode::SupersededValue => Error::Superseded,
            _ => Error::PeerProtocol(error),
        }
    }
}

impl From<RpcError> for Error {
    fn from(error: RpcError) -> Self {
        match error {
            RpcError::Timeout | RpcError::Unreachable(_) => Error::Timeout,
            RpcError::Peer(error) => error.into(),
            RpcError::Malformed(reason) => Error::Malformed(reason),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error.to_string())
    }
}

/// Alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

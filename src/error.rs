//! Error taxonomy for the transport pipeline.
//!
//! Every layer returns [`TransportError`]. Decorators never special-case each
//! other's errors: a breaker rejection looks like any other failure to a
//! retrier, and vice versa.

use std::fmt;
use std::io;
use std::time::Duration;

/// Boxed error used for opaque sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of a network-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkErrorKind {
    /// Connect or read timed out at the socket level.
    Timeout,
    /// Peer reset the connection.
    ConnectionReset,
    /// Peer refused the connection.
    ConnectionRefused,
    /// Connection closed before the message completed.
    UnexpectedEof,
    /// Write to a closed connection.
    BrokenPipe,
    /// Any other failure while establishing the connection.
    Connect,
    /// Malformed or unexpected protocol traffic.
    Protocol,
}

impl NetworkErrorKind {
    /// Classify an I/O error kind, if it maps to a known network failure.
    pub fn from_io(kind: io::ErrorKind) -> Option<Self> {
        match kind {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Some(Self::Timeout),
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                Some(Self::ConnectionReset)
            }
            io::ErrorKind::ConnectionRefused => Some(Self::ConnectionRefused),
            io::ErrorKind::UnexpectedEof => Some(Self::UnexpectedEof),
            io::ErrorKind::BrokenPipe => Some(Self::BrokenPipe),
            io::ErrorKind::NotConnected | io::ErrorKind::AddrNotAvailable => Some(Self::Connect),
            _ => None,
        }
    }

    /// Whether failures of this kind are transient by convention.
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::Protocol)
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::ConnectionReset => "connection reset",
            Self::ConnectionRefused => "connection refused",
            Self::UnexpectedEof => "unexpected eof",
            Self::BrokenPipe => "broken pipe",
            Self::Connect => "connect",
            Self::Protocol => "protocol",
        };
        f.write_str(s)
    }
}

/// Errors produced by transports and decorators.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error ({kind}): {source}")]
    Network {
        kind: NetworkErrorKind,
        #[source]
        source: BoxError,
    },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The circuit breaker rejected the call without reaching upstream.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The caller's cancellation signal or deadline fired.
    #[error("request cancelled")]
    Cancelled,

    #[error("request body could not be prepared for replay: {0}")]
    BodyReplay(#[source] io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    #[error(transparent)]
    Other(BoxError),
}

impl TransportError {
    /// Build a network error of the given kind.
    pub fn network(kind: NetworkErrorKind, source: impl Into<BoxError>) -> Self {
        Self::Network {
            kind,
            source: source.into(),
        }
    }

    /// Wrap an arbitrary error whose nature is unknown to the pipeline.
    pub fn other(source: impl Into<BoxError>) -> Self {
        Self::Other(source.into())
    }

    /// Network-level failure that is retryable by default.
    pub fn is_retryable_network(&self) -> bool {
        match self {
            Self::Network { kind, .. } => kind.is_transient(),
            Self::Timeout(_) => true,
            _ => false,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Network kind, if this is a network error.
    pub fn network_kind(&self) -> Option<NetworkErrorKind> {
        match self {
            Self::Network { kind, .. } => Some(*kind),
            Self::Timeout(_) => Some(NetworkErrorKind::Timeout),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match NetworkErrorKind::from_io(e.kind()) {
            Some(kind) => Self::network(kind, e),
            None => Self::other(e),
        }
    }
}

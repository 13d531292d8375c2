//! Error types.
//!
//! This mirrors the error kinds from the wire-level design: the codec and
//! dispatcher never unwind, they return one of these and let the caller
//! decide (see the policy table in the specification's error-handling
//! section).

use std::fmt;

/// Errors produced by the option codec, message parser, and lease
/// persistence.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Malformed option, bad length, bad magic cookie, or a classless-route
    /// record with `cidr > 32`.
    Invalid,
    /// The requested option is not present in the message.
    NotFound,
    /// A socket, file, or other OS-level operation failed.
    Io(std::io::Error),
    /// The message was rejected by a whitelist, blacklist, or
    /// required-options check before it reached the state machine.
    Rejected(&'static str),
    /// The server sent a DHCPNAK.
    Nak,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Invalid => write!(f, "invalid DHCP message or option"),
            Error::NotFound => write!(f, "option not found"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Rejected(reason) => write!(f, "message rejected: {reason}"),
            Error::Nak => write!(f, "server sent DHCPNAK"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

//! Error types for the Tor control connection.
//!
//! Errors fall in two groups. Transport and framing failures
//! ([`TorControlError::Transport`], [`TorControlError::Protocol`]) are fatal
//! to the connection: the dispatch loop stops and every pending command
//! fails with [`TorControlError::ConnectionClosed`]. Everything else is local
//! to the command that produced it.

use std::fmt;
use std::io;
use thiserror::Error;

/// The main error type for all Tor control operations.
#[derive(Error, Debug)]
pub enum TorControlError {
    /// Socket level failure while reading or writing.
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// Malformed protocol framing. Resynchronisation is not attempted.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Well framed reply whose content could not be interpreted.
    #[error("Parse error: {0}")]
    Parse(String),

    /// No reply arrived within the command timeout.
    #[error("Operation timed out")]
    Timeout,

    /// The authentication handshake was rejected.
    #[error("Authentication failed ({reason}): {message}")]
    Authentication {
        /// Why the handshake failed.
        reason: AuthFailure,
        /// Detail from the daemon or the local check that failed.
        message: String,
    },

    /// A protected command was sent before authenticating.
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    /// The connection is closed, or closed while the command was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Command was rejected by Tor.
    #[error("Command rejected (code {code}): {message}")]
    CommandRejected {
        /// The status code returned by Tor.
        code: u16,
        /// The human-readable error message.
        message: String,
    },

    /// Tor did not recognise one or more of the request's keys.
    #[error("Invalid arguments: {message}")]
    InvalidArguments {
        /// The daemon's message.
        message: String,
        /// The offending keys, when Tor named them.
        arguments: Vec<String>,
    },

    /// Invalid argument provided by the caller.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TorControlError {
    /// Build an authentication error.
    pub fn auth(reason: AuthFailure, message: impl Into<String>) -> Self {
        TorControlError::Authentication {
            reason,
            message: message.into(),
        }
    }

    /// Whether this error means the connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TorControlError::Transport(_)
                | TorControlError::Protocol(_)
                | TorControlError::ConnectionClosed
        )
    }

    /// The authentication failure reason, if this is an authentication error.
    pub fn auth_failure(&self) -> Option<AuthFailure> {
        match self {
            TorControlError::Authentication { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Result type alias for Tor control operations.
pub type Result<T> = std::result::Result<T, TorControlError>;

/// Sub-reason of an authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthFailure {
    /// The daemon requires credentials that were not supplied.
    MissingCredentials,
    /// The password was rejected.
    IncorrectPassword,
    /// The cookie was rejected, or the SAFECOOKIE server hash did not match.
    CookieMismatch,
    /// The cookie file could not be read.
    UnreadableCookie,
    /// The cookie file does not hold exactly 32 bytes.
    IncorrectCookieSize,
    /// None of the daemon's methods are supported by this client.
    UnsupportedMethod,
    /// The daemon rejected the attempt for another reason.
    Rejected,
}

impl AuthFailure {
    /// Get the reason as a short string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::MissingCredentials => "missing credentials",
            AuthFailure::IncorrectPassword => "incorrect password",
            AuthFailure::CookieMismatch => "cookie mismatch",
            AuthFailure::UnreadableCookie => "unreadable cookie",
            AuthFailure::IncorrectCookieSize => "incorrect cookie size",
            AuthFailure::UnsupportedMethod => "unsupported method",
            AuthFailure::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tor reply status codes as defined in the control-spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 250 - OK
    Ok = 250,
    /// 251 - Operation was unnecessary
    OperationUnnecessary = 251,
    /// 252 - Resource exhausted (with additional info)
    ResourceExhaustedInfo = 252,
    /// 451 - Resource exhausted
    ResourceExhausted = 451,
    /// 500 - Syntax error: protocol
    SyntaxErrorProtocol = 500,
    /// 510 - Unrecognized command
    UnrecognizedCommand = 510,
    /// 511 - Unimplemented command
    UnimplementedCommand = 511,
    /// 512 - Syntax error in command argument
    SyntaxErrorArgument = 512,
    /// 513 - Unrecognized command argument
    UnrecognizedArgument = 513,
    /// 514 - Authentication required
    AuthenticationRequired = 514,
    /// 515 - Bad authentication
    BadAuthentication = 515,
    /// 550 - Unspecified Tor error
    UnspecifiedError = 550,
    /// 551 - Internal error
    InternalError = 551,
    /// 552 - Unrecognized entity
    UnrecognizedEntity = 552,
    /// 553 - Invalid configuration value
    InvalidConfigValue = 553,
    /// 554 - Invalid descriptor
    InvalidDescriptor = 554,
    /// 555 - Unmanaged entity
    UnmanagedEntity = 555,
    /// 650 - Asynchronous event notification
    AsyncEvent = 650,
    /// Unknown status code
    Unknown = 0,
}

impl StatusCode {
    /// Parse a status code from a u16 value.
    pub fn from_u16(code: u16) -> Self {
        match code {
            250 => StatusCode::Ok,
            251 => StatusCode::OperationUnnecessary,
            252 => StatusCode::ResourceExhaustedInfo,
            451 => StatusCode::ResourceExhausted,
            500 => StatusCode::SyntaxErrorProtocol,
            510 => StatusCode::UnrecognizedCommand,
            511 => StatusCode::UnimplementedCommand,
            512 => StatusCode::SyntaxErrorArgument,
            513 => StatusCode::UnrecognizedArgument,
            514 => StatusCode::AuthenticationRequired,
            515 => StatusCode::BadAuthentication,
            550 => StatusCode::UnspecifiedError,
            551 => StatusCode::InternalError,
            552 => StatusCode::UnrecognizedEntity,
            553 => StatusCode::InvalidConfigValue,
            554 => StatusCode::InvalidDescriptor,
            555 => StatusCode::UnmanagedEntity,
            650 => StatusCode::AsyncEvent,
            _ => StatusCode::Unknown,
        }
    }

    /// Check if this status code indicates success.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StatusCode::Ok | StatusCode::OperationUnnecessary | StatusCode::ResourceExhaustedInfo
        )
    }

    /// Check if this status code indicates an error.
    pub fn is_error(&self) -> bool {
        !self.is_success() && *self != StatusCode::AsyncEvent
    }

    /// Get the numeric value of this status code.
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode::from_u16(code)
    }
}

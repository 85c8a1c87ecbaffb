//! # Error Definitions
//!
//! `Error` is the protocol failing; `RemoteFailure` is a handler failing. The
//! first never reaches the caller as a reply, the second always does.

use std::fmt;

/// Operational failures within the RPC mechanism itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying codec failed (truncated buffer, unknown tag).
    Codec(cloudpack::Error),
    /// No handler is registered for the requested type identifier.
    HandlerNotFound(String),
    /// The call payload is structurally invalid (e.g. a chain of size 0).
    ProtocolViolation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "codec error: {}", e),
            Self::HandlerNotFound(name) => write!(f, "no rpc handler registered for '{}'", name),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<cloudpack::Error> for Error {
    fn from(e: cloudpack::Error) -> Self {
        Self::Codec(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A failure raised while executing a handler method.
///
/// Carries enough to print a diagnostic on the calling side, not to rebuild the
/// original error value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    pub type_name: String,
    pub message: String,
    /// Best-effort cause chain, outermost first.
    pub trace: Vec<String>,
}

impl RemoteFailure {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Captures an error value, walking its `source()` chain into `trace`.
    pub fn from_error<E: std::error::Error>(error: &E) -> Self {
        let mut trace = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            trace.push(cause.to_string());
            source = cause.source();
        }
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            trace,
        }
    }

    pub(crate) fn method_not_found(type_name: &str, method: &str, arity: usize) -> Self {
        Self::new(
            "MethodNotFound",
            format!("{} has no method {} taking {} argument(s)", type_name, method, arity),
        )
    }

    pub(crate) fn no_instance(type_name: &str, method: &str) -> Self {
        Self::new(
            "NoInstance",
            format!("no target instance available for {}#{}", type_name, method),
        )
    }

    pub(crate) fn wrong_instance(expected: &str, method: &str) -> Self {
        Self::new(
            "InstanceMismatch",
            format!("target instance of {}#{} is not a {}", expected, method, expected),
        )
    }

    pub(crate) fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_string());
        Self::new("panic", message)
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)?;
        for cause in &self.trace {
            write!(f, "\n  caused by: {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteFailure {}

/// Argument decoding failures surface as failures of the invoked method.
impl From<cloudpack::Error> for RemoteFailure {
    fn from(e: cloudpack::Error) -> Self {
        Self::from_error(&e)
    }
}

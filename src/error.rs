use std::{fmt, result};

use serde::{Deserialize, Serialize};

pub type Result<T> = result::Result<T, Error>;
pub type JsonRpcResult<T> = result::Result<T, JsonRpcError>;

/// Error taxonomy for every failure point in the core.
///
/// Each failure must map to exactly one of these kinds; see the propagation
/// policy documented alongside the drivers and the coordinator for how each
/// kind is handled at its call site.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum ErrorCode {
    /// Serial open/read/write failed at the OS layer.
    Io,
    /// An expected response window elapsed.
    Timeout,
    /// Bad sync byte, bad length, missing terminator, or a stuffing error.
    Framing,
    /// CRC or XOR checksum mismatch.
    Checksum,
    /// Unexpected opcode, out-of-order sequence, or bad encryption counter.
    Protocol,
    /// A well-formed device error code (jam, cassette-removed, cheated, solenoid, bill-end).
    DeviceFault,
    /// A precondition for the requested operation was not met.
    Precondition,
    /// The operation was cancelled by the caller.
    Cancelled,
    /// The state-store repository could not be reached.
    RepositoryUnavailable,
}

impl From<ErrorCode> for &'static str {
    fn from(e: ErrorCode) -> Self {
        match e {
            ErrorCode::Io => "io",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Framing => "framing",
            ErrorCode::Checksum => "checksum",
            ErrorCode::Protocol => "protocol",
            ErrorCode::DeviceFault => "device fault",
            ErrorCode::Precondition => "precondition",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::RepositoryUnavailable => "repository unavailable",
        }
    }
}

impl From<&ErrorCode> for &'static str {
    fn from(e: &ErrorCode) -> Self {
        (*e).into()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", <&'static str>::from(self))
    }
}

/// Basic error type used throughout the drivers and the coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    code: ErrorCode,
    message: String,
}

impl Error {
    pub fn new<S>(code: ErrorCode, message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn io<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(ErrorCode::Io, message)
    }

    pub fn timeout<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn framing<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(ErrorCode::Framing, message)
    }

    pub fn checksum<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(ErrorCode::Checksum, message)
    }

    pub fn protocol<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(ErrorCode::Protocol, message)
    }

    pub fn device_fault<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(ErrorCode::DeviceFault, message)
    }

    pub fn precondition<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(ErrorCode::Precondition, message)
    }

    pub fn cancelled<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(ErrorCode::Cancelled, message)
    }

    pub fn repository_unavailable<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(ErrorCode::RepositoryUnavailable, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Whether this error is retryable inside a poll loop (everything except
    /// `DeviceFault`, `Precondition`, and `Cancelled`).
    pub fn is_transport(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::Io | ErrorCode::Timeout | ErrorCode::Framing | ErrorCode::Checksum | ErrorCode::Protocol
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                Self::timeout(format!("{err}"))
            }
            _ => Self::io(format!("{err}")),
        }
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Self::io(format!("serial port error: {err}"))
    }
}

impl<T> From<std::sync::mpsc::SendError<T>> for Error {
    fn from(err: std::sync::mpsc::SendError<T>) -> Self {
        Self::io(format!("failed to send on an internal channel: {err}"))
    }
}

impl From<std::sync::mpsc::RecvTimeoutError> for Error {
    fn from(err: std::sync::mpsc::RecvTimeoutError) -> Self {
        Self::timeout(format!("{err}"))
    }
}

/// Error type for responses sent back over the command channel.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct JsonRpcError {
    code: ErrorCode,
    message: String,
}

impl JsonRpcError {
    pub fn new<S>(code: ErrorCode, message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a JsonRpcError with a generic protocol-failure code.
    pub fn failure<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(ErrorCode::Protocol, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn set_code(&mut self, code: ErrorCode) {
        self.code = code;
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn set_message<S>(&mut self, message: S)
    where
        S: Into<String>,
    {
        self.message = message.into();
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code[{}]: {}", self.code, self.message)
    }
}

impl From<std::io::Error> for JsonRpcError {
    fn from(err: std::io::Error) -> Self {
        Self::from(Error::from(err))
    }
}

impl From<serde_json::Error> for JsonRpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::Protocol, format!("JSON error: {err}"))
    }
}

impl From<&Error> for JsonRpcError {
    fn from(err: &Error) -> Self {
        Self::new(err.code(), err.message())
    }
}

impl From<Error> for JsonRpcError {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

impl From<&JsonRpcError> for Error {
    fn from(err: &JsonRpcError) -> Self {
        Self::new(err.code(), err.message())
    }
}

impl From<JsonRpcError> for Error {
    fn from(err: JsonRpcError) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_code_and_message() {
        let err = Error::timeout("no reply within 1s");
        assert_eq!(format!("{err}"), "[timeout] no reply within 1s");
    }

    #[test]
    fn transport_errors_are_retryable_device_faults_are_not() {
        assert!(Error::framing("bad sync").is_transport());
        assert!(!Error::device_fault("jam").is_transport());
        assert!(!Error::precondition("payment in progress").is_transport());
    }

    #[test]
    fn error_and_json_rpc_error_convert_round_trip() {
        let err = Error::device_fault("cassette removed");
        let rpc: JsonRpcError = err.clone().into();
        let back: Error = rpc.into();
        assert_eq!(err, back);
    }
}

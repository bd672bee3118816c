use thiserror::Error;
use tonic::{Code, Status};

/// Common error type for Nerves bridges and hubs.
#[derive(Debug, Error)]
pub enum Error {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("bridge not found: {0}")]
    BridgeNotFound(String),

    #[error("bridge already added: {0}")]
    BridgeAlreadyAdded(String),

    #[error("missing parameter: {0}")]
    MissingParam(&'static str),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("internal error: {0}")]
    Internal(String),

    /// Status returned by a remote bridge, kept intact so it can be handed
    /// back to our own caller unchanged.
    #[error("remote error: {}", .0.message())]
    Remote(Status),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Json5(#[from] json5::Error),
}

impl Error {
    /// Symbolic code used on the wire and in logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Error::BridgeNotFound(_) => "BRIDGE_NOT_FOUND",
            Error::BridgeAlreadyAdded(_) => "BRIDGE_ALREADY_ADDED",
            Error::MissingParam(_) => "MISSING_PARAM",
            Error::NotSupported(_) => "NOT_SUPPORTED",
            Error::NotImplemented(_) => "NOT_IMPLEMENTED",
            Error::Remote(_) => "REMOTE",
            Error::Internal(_) | Error::Config(_) | Error::Io(_) | Error::Json5(_) => "INTERNAL",
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn not_supported(what: impl Into<String>) -> Self {
        Error::NotSupported(what.into())
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Remote(status)
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        let code = match err {
            Error::Remote(status) => return status,
            Error::DeviceNotFound(_) | Error::BridgeNotFound(_) => Code::NotFound,
            Error::BridgeAlreadyAdded(_) => Code::AlreadyExists,
            Error::MissingParam(_) => Code::InvalidArgument,
            Error::NotSupported(_) => Code::FailedPrecondition,
            Error::NotImplemented(_) => Code::Unimplemented,
            Error::Internal(_) | Error::Config(_) | Error::Io(_) | Error::Json5(_) => {
                Code::Internal
            }
        };
        Status::new(code, format!("{}: {}", err.code(), err))
    }
}

/// Result type alias using Nerves' Error.
pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

/// Status-style discriminant for every failure the core can report.
///
/// These mirror a gRPC-like status taxonomy rather than one variant per
/// cause: the protocol, crypto, and FSM layers all need to collapse a wide
/// variety of causes down to a small set of caller-actionable outcomes (the
/// verifier only ever reacts to "unknown tag" vs. "unauthorized", never to
/// the specific reason).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    DataLoss,
    NotFound,
    PermissionDenied,
    Unauthenticated,
    OutOfRange,
    Aborted,
    Internal,
    ResourceExhausted,
    FailedPrecondition,
    Unimplemented,
    Unavailable,
    Unknown,
}

/// A core-level error: an [`ErrorKind`] plus a human-readable message.
#[derive(Debug, Error, Clone)]
#[error("{kind:?}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidArgument, message)
    }

    pub fn data_loss(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::DataLoss, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotFound, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::PermissionDenied, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Unauthenticated, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::OutOfRange, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Aborted, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Internal, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::FailedPrecondition, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Unimplemented, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Unavailable, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Unknown, message)
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

//! Error taxonomy for the greeter service.
//!
//! Every failure leaving the service handler is first mapped into the closed
//! [`ErrorCategory`] set by [`classify`]. Each transport then re-encodes the
//! category into its own representation: [`tonic::Status`] codes for RPC (via
//! `From<ClassifiedError> for Status`) and HTTP status codes in the gateway.
//!
//! ## Categories
//! - `NotFound`: A lookup found no matching record.
//! - `InvalidArgument`: Input was missing or malformed, or a stored record
//!   failed its structural checks.
//! - `PermissionDenied`: The caller lacks the required capability.
//! - `ResourceExhausted`: A quota or throttle rejected the call.
//! - `Internal`: Anything else. The message shown to callers is always
//!   [`INTERNAL_MESSAGE`]; the lower-layer error is kept as the cause.

use core::fmt;
use std::error::Error as StdError;
use std::sync::Arc;
use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, ClassifiedError>;

/// Boxed lower-layer error, as surfaced by storage and other collaborators.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The only message callers ever see for an `Internal` failure.
pub const INTERNAL_MESSAGE: &str = "internal error";

/// Closed set of outcome categories shared by both transports.
///
/// Adding or removing a variant requires updating [`ErrorCategory::code`],
/// [`ErrorCategory::from_code`], and the gateway's HTTP status table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Success,
    NotFound,
    InvalidArgument,
    PermissionDenied,
    ResourceExhausted,
    Internal,
}

impl ErrorCategory {
    /// Every category, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Success,
        Self::NotFound,
        Self::InvalidArgument,
        Self::PermissionDenied,
        Self::ResourceExhausted,
        Self::Internal,
    ];

    /// The gRPC status code carrying this category on the RPC transport.
    pub const fn code(self) -> Code {
        match self {
            Self::Success => Code::Ok,
            Self::NotFound => Code::NotFound,
            Self::InvalidArgument => Code::InvalidArgument,
            Self::PermissionDenied => Code::PermissionDenied,
            Self::ResourceExhausted => Code::ResourceExhausted,
            Self::Internal => Code::Internal,
        }
    }

    /// Recovers the category from a gRPC status code.
    ///
    /// Codes inside the taxonomy map back to their category unchanged. Codes
    /// outside it (transport failures such as `Unavailable` or
    /// `DeadlineExceeded`) have no category of their own and fall into
    /// `Internal`.
    pub const fn from_code(code: Code) -> Self {
        match code {
            Code::Ok => Self::Success,
            Code::NotFound => Self::NotFound,
            Code::InvalidArgument => Self::InvalidArgument,
            Code::PermissionDenied => Self::PermissionDenied,
            Code::ResourceExhausted => Self::ResourceExhausted,
            _ => Self::Internal,
        }
    }

    /// Stable upper-snake-case name, used in logs and metric attributes.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raised domain condition, prior to classification.
#[derive(Debug)]
pub enum Condition {
    /// No record of kind `resource` exists under `id`.
    RecordAbsent { resource: &'static str, id: String },
    /// A required request field was missing or empty.
    MissingField { field: &'static str },
    /// A request field was present but failed validation.
    MalformedField { field: &'static str },
    /// A record was found but violates its structural invariants.
    MalformedRecord { resource: &'static str },
    /// A request body could not be decoded.
    MalformedPayload(BoxError),
    /// No method is exposed at `path`.
    UnknownMethod { path: String },
    /// The caller lacks the capability needed for the call.
    PermissionDenied,
    /// A quota or throttle rejected the call.
    QuotaExceeded,
    /// A lower-layer failure, or anything the table does not recognise.
    Fault(BoxError),
}

/// A failure already mapped into the [`ErrorCategory`] taxonomy.
///
/// Only [`classify`] constructs values of this type, so the category is never
/// `Success` and the message never contains lower-layer error text. The
/// optional cause is for local diagnostics only; it is not part of
/// `Display` and is never sent to clients.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct ClassifiedError {
    category: ErrorCategory,
    message: String,
    #[source]
    cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl ClassifiedError {
    fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        debug_assert!(category != ErrorCategory::Success);
        Self {
            category,
            message: message.into(),
            cause: None,
        }
    }

    fn with_cause(mut self, cause: BoxError) -> Self {
        self.cause = Some(Arc::from(cause));
        self
    }

    pub const fn category(&self) -> ErrorCategory {
        self.category
    }

    /// The caller-visible message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The lower-layer error this classification was derived from, if any.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

/// Maps a domain condition to its category and caller-visible message.
///
/// | condition            | category            | message                              |
/// |----------------------|---------------------|--------------------------------------|
/// | `RecordAbsent`       | `NotFound`          | `<resource> <id> not found`          |
/// | `MissingField`       | `InvalidArgument`   | `<field> is required`                |
/// | `MalformedField`     | `InvalidArgument`   | `<field> is malformed`               |
/// | `MalformedRecord`    | `InvalidArgument`   | `invalid <resource> data`            |
/// | `MalformedPayload`   | `InvalidArgument`   | `request body is malformed`          |
/// | `UnknownMethod`      | `NotFound`          | `method <path> not found`            |
/// | `PermissionDenied`   | `PermissionDenied`  | `caller does not have permission`    |
/// | `QuotaExceeded`      | `ResourceExhausted` | `rate limit exceeded, retry later`   |
/// | `Fault`              | `Internal`          | [`INTERNAL_MESSAGE`]                 |
pub fn classify(condition: Condition) -> ClassifiedError {
    use ErrorCategory::*;

    match condition {
        Condition::RecordAbsent { resource, id } => {
            ClassifiedError::new(NotFound, format!("{resource} {id} not found"))
        }
        Condition::MissingField { field } => {
            ClassifiedError::new(InvalidArgument, format!("{field} is required"))
        }
        Condition::MalformedField { field } => {
            ClassifiedError::new(InvalidArgument, format!("{field} is malformed"))
        }
        Condition::MalformedRecord { resource } => {
            ClassifiedError::new(InvalidArgument, format!("invalid {resource} data"))
        }
        Condition::MalformedPayload(cause) => {
            ClassifiedError::new(InvalidArgument, "request body is malformed").with_cause(cause)
        }
        Condition::UnknownMethod { path } => {
            ClassifiedError::new(NotFound, format!("method {path} not found"))
        }
        Condition::PermissionDenied => {
            ClassifiedError::new(PermissionDenied, "caller does not have permission")
        }
        Condition::QuotaExceeded => {
            ClassifiedError::new(ResourceExhausted, "rate limit exceeded, retry later")
        }
        Condition::Fault(cause) => ClassifiedError::new(Internal, INTERNAL_MESSAGE).with_cause(cause),
    }
}

/// Classifies an arbitrary lower-layer error as an opaque `Internal` fault.
pub fn classify_fault<E>(err: E) -> ClassifiedError
where
    E: Into<BoxError>,
{
    classify(Condition::Fault(err.into()))
}

impl From<ClassifiedError> for Status {
    fn from(err: ClassifiedError) -> Self {
        Status::new(err.category.code(), err.message)
    }
}

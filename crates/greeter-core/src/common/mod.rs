//! Definitions shared by the RPC transport, the REST gateway, and clients.
//!
//! - [`error`] - The closed error taxonomy and the classifier that maps domain
//!   conditions into it.
//! - [`types`] - Domain records exchanged with the storage collaborator.
//! - [`proto`] - Generated protobuf messages, service traits, and clients.

pub mod error;
pub mod types;

pub use error::{
    BoxError, ClassifiedError, Condition, ErrorCategory, INTERNAL_MESSAGE, Result, classify,
    classify_fault,
};

/// Generated gRPC bindings for `proto/hello/v1/hello.proto` and
/// `proto/user/v1/user.proto`.
///
/// Messages derive `serde` traits using the proto3 JSON mapping (`camelCase`
/// names, absent fields default), so the same types serve as REST bodies.
pub mod proto {
    /// `hello.v1.GreeterService` and its messages.
    pub mod hello {
        tonic::include_proto!("hello.v1");
    }

    /// `user.v1.UserService` and its messages.
    pub mod user {
        tonic::include_proto!("user.v1");
    }

    /// Encoded descriptor set for both packages, served via reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("greeter_descriptor");
}

//! Service handler shared by both transports.
//!
//! ## Structure
//!
//! - [`handler`] - `ServiceHandler`, the implementation of
//!   `hello.v1.GreeterService` and `user.v1.UserService`.

pub mod handler;

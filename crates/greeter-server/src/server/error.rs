//! Startup and serving failures.
//!
//! Per-request failures never surface here; they are classified inside the
//! handler and returned to the caller. A [`ServeError`] always ends the
//! process.

use std::io;
use std::net::SocketAddr;
use tonic::Status;

/// A fatal failure of one of the transports.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// A listener could not be bound. Raised before anything is served.
    #[error("failed to bind {transport} listener on {addr}")]
    Bind {
        transport: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The reflection service could not be built from the descriptor set.
    #[error("failed to build reflection service")]
    Reflection(#[from] tonic_reflection::server::Error),

    /// The gateway never managed to attach to the RPC transport.
    #[error("gateway registration against {endpoint} failed after {attempts} attempt(s)")]
    Registration {
        endpoint: String,
        attempts: u32,
        #[source]
        source: RegistrationError,
    },

    /// `serve` was called on a gateway that was never registered.
    #[error("gateway is not registered with an RPC endpoint")]
    Unregistered,

    /// The RPC transport stopped with an error.
    #[error("RPC transport failed")]
    Rpc(#[from] tonic::transport::Error),

    /// The gateway's HTTP server stopped with an error.
    #[error("gateway transport failed")]
    Gateway(#[source] io::Error),

    /// A transport task panicked or was aborted.
    #[error("transport task did not complete")]
    Task(#[from] tokio::task::JoinError),
}

/// Why a single registration attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("could not connect")]
    Connect(#[source] tonic::transport::Error),

    /// The health service rejected the check, typically because the service
    /// is not registered on the endpoint.
    #[error("health check for {service} failed")]
    HealthCheck {
        service: &'static str,
        #[source]
        source: Status,
    },

    #[error("{service} is not serving")]
    NotServing { service: &'static str },
}

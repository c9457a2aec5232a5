//! The REST/JSON gateway.
//!
//! The gateway is a loopback client of the RPC transport: every HTTP request
//! is decoded, forwarded over a shared [`Channel`], and the reply (or status)
//! is translated back. It never calls the handler directly, so both
//! transports observe identical behavior.
//!
//! Registration connects the channel and asks the RPC transport's health
//! service whether each fronted service is SERVING. The RPC listener is bound
//! before registration starts, but its accept loop may not be running yet, so
//! registration is retried with linear backoff.

mod metadata;
mod response;
mod routes;

pub use metadata::parse_grpc_timeout;
pub use response::{GatewayError, http_status};
pub use routes::router;

use crate::server::{
    config::GatewayConfig,
    error::{RegistrationError, ServeError},
    rpc::{GreeterServer, UserServer},
};
use core::time::Duration;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::{
    server::NamedService,
    transport::{Channel, Endpoint},
};
use tonic_health::pb::{
    HealthCheckRequest, health_check_response::ServingStatus, health_client::HealthClient,
};

/// Services the gateway fronts. Registration requires all of them.
const FRONTED_SERVICES: [&str; 2] = [
    <GreeterServer as NamedService>::NAME,
    <UserServer as NamedService>::NAME,
];

pub struct GatewayTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: GatewayConfig,
    upstream: Option<Channel>,
}

impl GatewayTransport {
    /// Binds the HTTP listener.
    ///
    /// # Errors
    ///
    /// [`ServeError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, config: GatewayConfig) -> Result<Self, ServeError> {
        let bind_err = |source| ServeError::Bind {
            transport: "gateway",
            addr,
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        Ok(Self {
            listener,
            local_addr,
            config,
            upstream: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Attaches the gateway to the RPC transport listening on `rpc_addr`.
    ///
    /// An unspecified address (`0.0.0.0`, `::`) is dialed on loopback.
    ///
    /// # Errors
    ///
    /// [`ServeError::Registration`] with the last attempt's failure once all
    /// attempts are used up.
    pub async fn register_from_endpoint(&mut self, rpc_addr: SocketAddr) -> Result<(), ServeError> {
        let target = loopback_target(rpc_addr);
        let uri = format!("http://{target}");
        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|source| ServeError::Registration {
                endpoint: uri.clone(),
                attempts: 0,
                source: RegistrationError::Connect(source),
            })?
            .tcp_nodelay(true);

        let attempts = self.config.register_attempts.max(1);
        let mut attempt = 1;
        loop {
            match register_once(&endpoint).await {
                Ok(channel) => {
                    tracing::info!(endpoint = %uri, attempt, "gateway registered");
                    self.upstream = Some(channel);
                    return Ok(());
                }
                Err(source) if attempt >= attempts => {
                    return Err(ServeError::Registration {
                        endpoint: uri,
                        attempts,
                        source,
                    });
                }
                Err(err) => {
                    tracing::debug!(endpoint = %uri, attempt, error = %err, "gateway registration attempt failed");
                    tokio::time::sleep(backoff_delay(self.config.register_backoff, attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Serves HTTP until `shutdown` is cancelled. In-flight requests are
    /// allowed to finish.
    ///
    /// # Errors
    ///
    /// [`ServeError::Unregistered`] if called before a successful
    /// registration, or [`ServeError::Gateway`] if the server fails.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ServeError> {
        let channel = self.upstream.ok_or(ServeError::Unregistered)?;
        let app = router(channel, self.config.call_timeout);

        tracing::info!(addr = %self.local_addr, "gateway serving");
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(ServeError::Gateway)?;
        tracing::info!("gateway stopped");
        Ok(())
    }
}

async fn register_once(endpoint: &Endpoint) -> Result<Channel, RegistrationError> {
    let channel = endpoint
        .connect()
        .await
        .map_err(RegistrationError::Connect)?;

    let mut health = HealthClient::new(channel.clone());
    for service in FRONTED_SERVICES {
        let reply = health
            .check(HealthCheckRequest {
                service: service.to_owned(),
            })
            .await
            .map_err(|source| RegistrationError::HealthCheck { service, source })?;

        if reply.into_inner().status() != ServingStatus::Serving {
            return Err(RegistrationError::NotServing { service });
        }
    }

    Ok(channel)
}

/// Linear backoff: the n-th retry waits n times `base`, capped at
/// `Duration::MAX`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

fn loopback_target(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(v4) if v4.ip().is_unspecified() => {
            SocketAddr::from((Ipv4Addr::LOCALHOST, v4.port()))
        }
        SocketAddr::V6(v6) if v6.ip().is_unspecified() => {
            SocketAddr::from((Ipv6Addr::LOCALHOST, v6.port()))
        }
        other => other,
    }
}

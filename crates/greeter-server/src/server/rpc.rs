//! The native gRPC transport.
//!
//! [`RpcTransport`] owns the bound TCP listener. Serving adds, next to the
//! registered [`ServiceHandler`]:
//!
//! - `grpc.health.v1.Health`, reporting SERVING for both services while the
//!   transport runs and NOT_SERVING once shutdown starts;
//! - optional `grpc.reflection.v1` for tooling such as `grpcurl`;
//! - gRPC-Web over HTTP/1 with permissive CORS;
//! - zstd, gzip, and deflate compression in both directions.
//!
//! Each inbound call is dispatched as its own unit of work by tonic; there is
//! no ordering between calls.

use crate::server::{error::ServeError, service::handler::ServiceHandler};
use greeter_core::proto::{
    FILE_DESCRIPTOR_SET, hello::greeter_service_server::GreeterServiceServer,
    user::user_service_server::UserServiceServer,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

pub type GreeterServer = GreeterServiceServer<ServiceHandler>;
pub type UserServer = UserServiceServer<ServiceHandler>;

/// A bound, not yet serving, gRPC transport.
pub struct RpcTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Option<ServiceHandler>,
    reflection: bool,
}

impl RpcTransport {
    /// Binds the listener. Failing here is fatal: nothing has been served.
    ///
    /// # Errors
    ///
    /// [`ServeError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ServeError> {
        let bind_err = |source| ServeError::Bind {
            transport: "rpc",
            addr,
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        Ok(Self {
            listener,
            local_addr,
            handler: None,
            reflection: true,
        })
    }

    /// Registers the handler serving `GreeterService` and `UserService`.
    pub fn register(mut self, handler: ServiceHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Enables or disables the reflection service (enabled by default).
    pub fn with_reflection(mut self, enabled: bool) -> Self {
        self.reflection = enabled;
        self
    }

    /// The address actually bound, with any ephemeral port resolved.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until `shutdown` is cancelled or the server fails.
    ///
    /// # Errors
    ///
    /// Returns an error if reflection cannot be built or the server stops
    /// with a transport error.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ServeError> {
        let (health_reporter, health_service) = tonic_health::server::health_reporter();

        let reflection = if self.reflection {
            Some(
                Builder::configure()
                    .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
                    .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET)
                    .build_v1()?,
            )
        } else {
            None
        };

        let registered = self.handler.is_some();
        let (greeter, users) = match self.handler {
            Some(handler) => (
                Some(build_greeter_service(handler.clone())),
                Some(build_user_service(handler)),
            ),
            None => (None, None),
        };

        if registered {
            health_reporter.set_serving::<GreeterServer>().await;
            health_reporter.set_serving::<UserServer>().await;
        }

        tracing::info!(addr = %self.local_addr, reflection = self.reflection, "gRPC transport serving");

        let signal = async move {
            shutdown.cancelled().await;
            health_reporter.set_not_serving::<GreeterServer>().await;
            health_reporter.set_not_serving::<UserServer>().await;
            tracing::info!("gRPC transport draining");
        };

        Server::builder()
            .accept_http1(true)
            .http2_adaptive_window(Some(true))
            .layer(
                ServiceBuilder::new()
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    )
                    .layer(GrpcWebLayer::new()),
            )
            .add_service(health_service)
            .add_optional_service(reflection)
            .add_optional_service(greeter)
            .add_optional_service(users)
            .serve_with_incoming_shutdown(TcpListenerStream::new(self.listener), signal)
            .await?;

        tracing::info!("gRPC transport stopped");
        Ok(())
    }
}

fn build_greeter_service(handler: ServiceHandler) -> GreeterServer {
    GreeterServiceServer::new(handler)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

fn build_user_service(handler: ServiceHandler) -> UserServer {
    UserServiceServer::new(handler)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

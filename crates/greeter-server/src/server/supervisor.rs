//! Runs both transports as supervised tasks.
//!
//! Startup order:
//!
//! 1. Bind both listeners ([`Supervisor::bind`]). A bind failure is fatal and
//!    nothing is served.
//! 2. Spawn the RPC transport.
//! 3. Register the gateway against it.
//! 4. Spawn the gateway.
//!
//! Both tasks share one cancellation token. The first task to exit, for any
//! reason, cancels the token and the other task drains. The first error wins;
//! a cancellation triggered from outside (a signal) ends with `Ok(())`.

use crate::server::{
    config::ServerConfig,
    domain::{FixedWindowRateLimiter, InMemoryUserStore, StaticPermissions},
    error::ServeError,
    gateway::GatewayTransport,
    rpc::RpcTransport,
    service::handler::ServiceHandler,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type TaskResult = (&'static str, Result<(), ServeError>);

pub struct Supervisor {
    rpc: RpcTransport,
    gateway: GatewayTransport,
}

impl Supervisor {
    /// Binds both listeners and registers `handler` on the RPC transport.
    ///
    /// # Errors
    ///
    /// [`ServeError::Bind`] if either address cannot be bound.
    pub async fn bind(config: &ServerConfig, handler: ServiceHandler) -> Result<Self, ServeError> {
        let rpc = RpcTransport::bind(config.rpc_addr)
            .await?
            .with_reflection(config.enable_reflection)
            .register(handler);
        let gateway = GatewayTransport::bind(config.http_addr, config.gateway).await?;
        Ok(Self { rpc, gateway })
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc.local_addr()
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.gateway.local_addr()
    }

    /// Serves until `shutdown` is cancelled or either transport exits.
    ///
    /// # Errors
    ///
    /// The first transport failure. A registration failure is reported only
    /// if the RPC transport itself stopped cleanly.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServeError> {
        let Self { rpc, mut gateway } = self;
        let rpc_addr = rpc.local_addr();
        let token = shutdown.child_token();
        let mut tasks = JoinSet::new();

        let rpc_token = token.clone();
        tasks.spawn(async move { ("rpc", rpc.serve(rpc_token).await) });

        let registration = tokio::select! {
            registered = gateway.register_from_endpoint(rpc_addr) => Some(registered),
            () = token.cancelled() => None,
        };

        match registration {
            Some(Ok(())) => {
                let gateway_token = token.clone();
                tasks.spawn(async move { ("gateway", gateway.serve(gateway_token).await) });
            }
            Some(Err(err)) => {
                tracing::error!(error = %err, "gateway registration failed");
                token.cancel();
                return match drain(&mut tasks, &token).await {
                    Err(rpc_err) => Err(rpc_err),
                    Ok(()) => Err(err),
                };
            }
            None => tracing::info!("shutdown requested during gateway registration"),
        }

        drain(&mut tasks, &token).await
    }
}

/// Waits for every task, cancelling the rest as soon as one exits.
async fn drain(tasks: &mut JoinSet<TaskResult>, token: &CancellationToken) -> Result<(), ServeError> {
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let (name, result) = match joined {
            Ok(done) => done,
            Err(err) => ("unknown", Err(ServeError::from(err))),
        };
        if !token.is_cancelled() {
            tracing::warn!(task = name, "transport exited, shutting down");
            token.cancel();
        }
        match result {
            Ok(()) => tracing::debug!(task = name, "transport task finished"),
            Err(err) if first_error.is_none() => first_error = Some(err),
            Err(err) => tracing::warn!(task = name, error = %err, "additional transport failure"),
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// The handler wired to the bundled in-process collaborators.
pub fn default_handler(config: &ServerConfig) -> ServiceHandler {
    ServiceHandler::new(
        Arc::new(InMemoryUserStore::seeded()),
        Arc::new(StaticPermissions::new(config.granted_users.iter().cloned())),
        Arc::new(FixedWindowRateLimiter::new(config.rate_limit, config.rate_window)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{config::GatewayConfig, error::RegistrationError};
    use core::time::Duration;
    use std::net::TcpListener as StdListener;

    #[tokio::test]
    async fn first_failure_cancels_the_other_task_and_is_returned() {
        let token = CancellationToken::new();
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();

        let waiter = token.clone();
        tasks.spawn(async move {
            waiter.cancelled().await;
            ("gateway", Ok(()))
        });
        tasks.spawn(async { ("rpc", Err(ServeError::Unregistered)) });

        let outcome = tokio::time::timeout(Duration::from_secs(5), drain(&mut tasks, &token))
            .await
            .unwrap();

        assert!(token.is_cancelled());
        assert!(matches!(outcome, Err(ServeError::Unregistered)));
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn clean_exit_still_stops_the_other_task() {
        let token = CancellationToken::new();
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();

        let waiter = token.clone();
        tasks.spawn(async move {
            waiter.cancelled().await;
            ("gateway", Ok(()))
        });
        tasks.spawn(async { ("rpc", Ok(())) });

        let outcome = tokio::time::timeout(Duration::from_secs(5), drain(&mut tasks, &token))
            .await
            .unwrap();

        assert!(token.is_cancelled());
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn registration_failure_ends_the_run() {
        // No handler registered: health knows nothing of the fronted services.
        let rpc = RpcTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
            .with_reflection(false);
        let config = GatewayConfig {
            register_attempts: 2,
            register_backoff: Duration::from_millis(1),
            call_timeout: None,
        };
        let gateway = GatewayTransport::bind("127.0.0.1:0".parse().unwrap(), config)
            .await
            .unwrap();
        let supervisor = Supervisor { rpc, gateway };

        let shutdown = CancellationToken::new();
        let outcome = tokio::time::timeout(Duration::from_secs(10), supervisor.run(shutdown.clone()))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            Err(ServeError::Registration {
                attempts: 2,
                source: RegistrationError::HealthCheck { .. },
                ..
            })
        ));
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn bind_failure_serves_nothing() {
        let taken = StdListener::bind("127.0.0.1:0").unwrap();
        let mut config = ServerConfig::loopback();
        config.http_addr = taken.local_addr().unwrap();

        let err = Supervisor::bind(&config, default_handler(&config))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServeError::Bind { transport: "gateway", .. }));
    }

    #[tokio::test]
    async fn external_cancellation_stops_both_transports_cleanly() {
        let config = ServerConfig::loopback();
        let supervisor = Supervisor::bind(&config, default_handler(&config)).await.unwrap();
        assert_ne!(supervisor.rpc_addr().port(), 0);
        assert_ne!(supervisor.http_addr().port(), 0);

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(supervisor.run(shutdown.clone()));

        tokio::time::sleep(core::time::Duration::from_millis(200)).await;
        shutdown.cancel();

        let outcome = tokio::time::timeout(core::time::Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_ok());
    }
}

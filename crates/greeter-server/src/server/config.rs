use anyhow::{Context, bail};
use clap::{ArgAction, Parser, ValueEnum};
use core::time::Duration;
use std::net::SocketAddr;

/// Runtime configuration for the `greeter-server` binary.
///
/// These settings control where the two transports listen, how the gateway
/// attaches to the RPC transport, and how the bundled domain collaborators
/// behave. All values are parsed from CLI arguments or environment variables
/// (a `.env` file is honored), with defaults suitable for local development.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "greeter-server",
    version,
    about = "A gRPC greeter and user service with a REST/JSON gateway"
)]
pub struct CliArgs {
    /// Address the gRPC transport listens on.
    ///
    /// Environment variable: `RPC_ADDR`
    #[arg(long, env = "RPC_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub rpc_addr: String,

    /// Address the REST gateway listens on.
    ///
    /// Environment variable: `HTTP_ADDR`
    #[arg(long, env = "HTTP_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub http_addr: String,

    /// Expose the gRPC reflection service (for `grpcurl` and similar tools).
    ///
    /// Environment variable: `ENABLE_REFLECTION`
    #[arg(long, env = "ENABLE_REFLECTION", default_value_t = true, action = ArgAction::Set)]
    pub enable_reflection: bool,

    /// How many times the gateway tries to reach the gRPC transport before
    /// giving up at startup.
    ///
    /// The gRPC socket is bound before the gateway registers, but its accept
    /// loop may not be running yet; a few retries absorb that window.
    ///
    /// Environment variable: `REGISTER_ATTEMPTS`
    #[arg(long, env = "REGISTER_ATTEMPTS", default_value_t = 5)]
    pub register_attempts: u32,

    /// Delay between registration attempts, in milliseconds. The n-th retry
    /// waits n times this value. At most 60000.
    ///
    /// Environment variable: `REGISTER_BACKOFF_MS`
    #[arg(long, env = "REGISTER_BACKOFF_MS", default_value_t = 100)]
    pub register_backoff_ms: u64,

    /// Deadline applied to each gateway call into the gRPC transport, in
    /// milliseconds, unless the HTTP request carries its own `grpc-timeout`.
    /// Zero disables the default deadline.
    ///
    /// Environment variable: `GATEWAY_TIMEOUT_MS`
    #[arg(long, env = "GATEWAY_TIMEOUT_MS", default_value_t = 10_000)]
    pub gateway_timeout_ms: u64,

    /// User IDs granted the capability checked by `CheckPermission`.
    ///
    /// Environment variable: `GRANTED_USERS` (comma separated)
    #[arg(long, env = "GRANTED_USERS", value_delimiter = ',')]
    pub granted_users: Vec<String>,

    /// Calls to `RateLimitCheck` allowed per user within one window.
    ///
    /// Environment variable: `RATE_LIMIT`
    #[arg(long, env = "RATE_LIMIT", default_value_t = 60)]
    pub rate_limit: u32,

    /// Length of the rate limiting window, in seconds.
    ///
    /// Environment variable: `RATE_WINDOW_SECS`
    #[arg(long, env = "RATE_WINDOW_SECS", default_value_t = 60)]
    pub rate_window_secs: u64,

    /// Log output format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Upper bound for `REGISTER_BACKOFF_MS` (one minute).
pub const MAX_REGISTER_BACKOFF_MS: u64 = 60_000;

/// Console log format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable output.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Validated settings for the gateway's connection to the gRPC transport.
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub register_attempts: u32,
    pub register_backoff: Duration,
    /// `None` leaves calls without a default deadline.
    pub call_timeout: Option<Duration>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            register_attempts: 5,
            register_backoff: Duration::from_millis(100),
            call_timeout: Some(Duration::from_secs(10)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub rpc_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub enable_reflection: bool,
    pub gateway: GatewayConfig,
    pub granted_users: Vec<String>,
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// A configuration listening on ephemeral loopback ports, with the
    /// default collaborator settings.
    pub fn loopback() -> Self {
        Self {
            rpc_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            http_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            enable_reflection: true,
            gateway: GatewayConfig::default(),
            granted_users: Vec::new(),
            rate_limit: 60,
            rate_window: Duration::from_secs(60),
            log_format: LogFormat::Pretty,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let rpc_addr: SocketAddr = args
            .rpc_addr
            .parse()
            .with_context(|| format!("RPC_ADDR ({}) is not a socket address", args.rpc_addr))?;
        let http_addr: SocketAddr = args
            .http_addr
            .parse()
            .with_context(|| format!("HTTP_ADDR ({}) is not a socket address", args.http_addr))?;

        if rpc_addr.port() != 0 && rpc_addr == http_addr {
            bail!("RPC_ADDR and HTTP_ADDR must differ (both are {rpc_addr})");
        }

        if args.register_attempts == 0 {
            bail!("REGISTER_ATTEMPTS must be greater than 0");
        }

        if args.register_backoff_ms > MAX_REGISTER_BACKOFF_MS {
            bail!("REGISTER_BACKOFF_MS must be at most {MAX_REGISTER_BACKOFF_MS}");
        }

        if args.rate_limit == 0 {
            bail!("RATE_LIMIT must be greater than 0");
        }

        if args.rate_window_secs == 0 {
            bail!("RATE_WINDOW_SECS must be greater than 0");
        }

        let granted_users = args
            .granted_users
            .into_iter()
            .map(|user| user.trim().to_string())
            .filter(|user| !user.is_empty())
            .collect();

        Ok(Self {
            rpc_addr,
            http_addr,
            enable_reflection: args.enable_reflection,
            gateway: GatewayConfig {
                register_attempts: args.register_attempts,
                register_backoff: Duration::from_millis(args.register_backoff_ms),
                call_timeout: (args.gateway_timeout_ms > 0)
                    .then(|| Duration::from_millis(args.gateway_timeout_ms)),
            },
            granted_users,
            rate_limit: args.rate_limit,
            rate_window: Duration::from_secs(args.rate_window_secs),
            log_format: args.log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let argv = std::iter::once("greeter-server").chain(args.iter().copied());
        ServerConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn defaults_match_the_documented_ports() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.rpc_addr.port(), 50051);
        assert_eq!(config.http_addr.port(), 8080);
        assert!(config.enable_reflection);
        assert_eq!(config.gateway.register_attempts, 5);
        assert_eq!(config.gateway.call_timeout, Some(Duration::from_secs(10)));
        assert!(config.granted_users.is_empty());
    }

    #[test]
    fn granted_users_are_split_and_trimmed() {
        let config = parse(&["--granted-users", "alice, bob,,"]).unwrap();
        assert_eq!(config.granted_users, vec!["alice", "bob"]);
    }

    #[test]
    fn zero_gateway_timeout_disables_the_deadline() {
        let config = parse(&["--gateway-timeout-ms", "0"]).unwrap();
        assert_eq!(config.gateway.call_timeout, None);
    }

    #[test]
    fn reflection_can_be_switched_off() {
        let config = parse(&["--enable-reflection", "false"]).unwrap();
        assert!(!config.enable_reflection);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(parse(&["--rpc-addr", "not-an-addr"]).is_err());
        assert!(parse(&["--register-attempts", "0"]).is_err());
        assert!(parse(&["--rate-limit", "0"]).is_err());
        assert!(parse(&["--register-backoff-ms", "18446744073709551615"]).is_err());
        assert!(parse(&["--rate-window-secs", "0"]).is_err());
        assert!(parse(&["--rpc-addr", "127.0.0.1:9000", "--http-addr", "127.0.0.1:9000"]).is_err());
    }
}

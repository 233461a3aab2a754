use clap::Parser;
use std::net::SocketAddr;

/// Shared-secret value the server refuses to validate without overriding.
pub const DEFAULT_TOKEN: &str = "change-this-token";

/// CLI arguments for the relay daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "relayd")]
#[command(about = "Session-pairing WebSocket relay")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "127.0.0.1:8787", env = "RELAY_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "RELAY_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Shared secret peers must present in the `token` query parameter.
    #[arg(long, default_value = DEFAULT_TOKEN, env = "RELAY_SHARED_TOKEN")]
    pub token: String,
    /// Maximum total concurrent connections.
    #[arg(long, default_value = "100000", env = "RELAY_MAX_CONNS")]
    pub max_conns: usize,
    /// Seconds a connection may take to deliver its upgrade request head.
    #[arg(long, default_value = "10", env = "RELAY_UPGRADE_TIMEOUT")]
    pub upgrade_timeout: u64,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Shared secret peers must present in the `token` query parameter.
    pub token: String,
    /// Maximum total concurrent connections.
    pub max_conns: usize,
    /// Seconds a connection may take to deliver its upgrade request head.
    pub upgrade_timeout: u64,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated bound.
    pub fn validate(&self) -> Result<(), String> {
        if self.token.is_empty() {
            return Err("token must not be empty".to_string());
        }

        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        if self.upgrade_timeout == 0 {
            return Err("upgrade_timeout must be greater than 0".to_string());
        }
        if self.upgrade_timeout > 300 {
            return Err("upgrade_timeout exceeds reasonable limit (300 seconds)".to_string());
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            metrics_addr: args.metrics_addr,
            token: args.token,
            max_conns: args.max_conns,
            upgrade_timeout: args.upgrade_timeout,
        }
    }
}

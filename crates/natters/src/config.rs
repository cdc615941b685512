use clap::{Parser, ValueEnum};
use natter_common::frame::MAX_FRAME_SIZE;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Friend store backend.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Process-local, lost on restart.
    Memory,
    /// SQLite database at `--db-path`.
    Sqlite,
}

/// CLI arguments for the messaging server.
#[derive(Parser, Debug, Clone)]
#[command(name = "natters")]
#[command(about = "natter messaging server")]
#[command(version)]
pub struct Args {
    /// Socket address for WebSocket sessions.
    #[arg(long, default_value = "0.0.0.0:8090", env = "NATTER_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the friend management HTTP API.
    #[arg(long, default_value = "0.0.0.0:8081", env = "NATTER_API_ADDR")]
    pub api_addr: SocketAddr,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "NATTER_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Maximum total concurrent connections.
    #[arg(long, default_value = "100000", env = "NATTER_MAX_CONNS")]
    pub max_conns: usize,
    /// Maximum encoded frame size in bytes.
    #[arg(long, default_value = "65536", env = "NATTER_MAX_FRAME_SIZE")]
    pub max_frame_size: usize,
    /// Per-connection outbound queue depth, in frames.
    #[arg(long, default_value = "256", env = "NATTER_OUTBOUND_QUEUE")]
    pub outbound_queue: usize,
    /// Seconds a new connection has to send its login frame.
    #[arg(long, default_value = "10", env = "NATTER_LOGIN_TIMEOUT")]
    pub login_timeout: u64,
    /// Interval between WebSocket pings in seconds.
    #[arg(long, default_value = "30", env = "NATTER_PING_INTERVAL")]
    pub ping_interval: u64,
    /// Secret used to sign and verify tokens. Random per process when unset.
    #[arg(long, env = "NATTER_TOKEN_SECRET", hide_env_values = true)]
    pub token_secret: Option<String>,
    /// Token validity window in seconds.
    #[arg(long, default_value = "86400", env = "NATTER_TOKEN_TTL")]
    pub token_ttl: u64,
    /// Friend store backend.
    #[arg(long, value_enum, default_value = "memory", env = "NATTER_STORE")]
    pub store: StoreKind,
    /// SQLite database path, used with `--store sqlite`.
    #[arg(long, default_value = "natter.db", env = "NATTER_DB_PATH")]
    pub db_path: PathBuf,
    /// Push a chat alert notification alongside each delivered message.
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        env = "NATTER_CHAT_ALERTS"
    )]
    pub chat_alerts: bool,
    /// Print a token for the given user identity and exit.
    #[arg(long, value_name = "UID")]
    pub issue_token: Option<String>,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for WebSocket sessions.
    pub listen: SocketAddr,
    /// Socket address for the friend management HTTP API.
    pub api_addr: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Maximum total concurrent connections.
    pub max_conns: usize,
    /// Maximum encoded frame size in bytes.
    pub max_frame_size: usize,
    /// Per-connection outbound queue depth, in frames.
    pub outbound_queue: usize,
    /// Seconds a new connection has to send its login frame.
    pub login_timeout: u64,
    /// Interval between WebSocket pings in seconds.
    pub ping_interval: u64,
    /// Token validity window in seconds.
    pub token_ttl: u64,
    /// Friend store backend.
    pub store: StoreKind,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Push a chat alert notification alongside each delivered message.
    pub chat_alerts: bool,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        // Must not exceed what the codec will parse
        if self.max_frame_size < 64 {
            return Err("max_frame_size must be at least 64 bytes".to_string());
        }
        if self.max_frame_size > MAX_FRAME_SIZE {
            return Err(format!(
                "max_frame_size exceeds maximum allowed ({MAX_FRAME_SIZE} bytes)"
            ));
        }

        if self.outbound_queue == 0 {
            return Err("outbound_queue must be greater than 0".to_string());
        }
        if self.outbound_queue > 65_536 {
            return Err("outbound_queue exceeds reasonable limit (65,536 frames)".to_string());
        }

        if self.login_timeout == 0 {
            return Err("login_timeout must be greater than 0".to_string());
        }
        if self.login_timeout > 300 {
            return Err("login_timeout exceeds reasonable limit (300 seconds)".to_string());
        }

        if self.ping_interval == 0 {
            return Err("ping_interval must be greater than 0".to_string());
        }
        if self.ping_interval > 3600 {
            return Err("ping_interval exceeds reasonable limit (3600 seconds)".to_string());
        }

        if self.token_ttl == 0 {
            return Err("token_ttl must be greater than 0".to_string());
        }
        if self.token_ttl > 30 * 86_400 {
            return Err("token_ttl exceeds reasonable limit (30 days)".to_string());
        }

        if self.store == StoreKind::Sqlite && self.db_path.as_os_str().is_empty() {
            return Err("db_path must be set for the sqlite store".to_string());
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            api_addr: args.api_addr,
            metrics_addr: args.metrics_addr,
            max_conns: args.max_conns,
            max_frame_size: args.max_frame_size,
            outbound_queue: args.outbound_queue,
            login_timeout: args.login_timeout,
            ping_interval: args.ping_interval,
            token_ttl: args.token_ttl,
            store: args.store,
            db_path: args.db_path,
            chat_alerts: args.chat_alerts,
        }
    }
}

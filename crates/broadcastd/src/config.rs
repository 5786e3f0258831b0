//! Configuration for broadcastd

use clap::Parser;
use std::time::Duration;

/// broadcastd - epidemic broadcast node
#[derive(Parser, Debug, Clone)]
#[command(name = "broadcastd")]
#[command(
    author,
    version,
    about = "Epidemic broadcast node speaking JSON messages on stdin/stdout",
    long_about = None
)]
pub struct Config {
    /// Gossip round interval in milliseconds
    #[arg(long, env = "BROADCASTD_GOSSIP_INTERVAL_MS", default_value = "200")]
    pub gossip_interval_ms: u64,

    /// Time to wait for a peer's reply before a push counts as failed (ms)
    #[arg(long, env = "BROADCASTD_RPC_TIMEOUT_MS", default_value = "1000")]
    pub rpc_timeout_ms: u64,

    /// Maximum values per sync push
    #[arg(long, env = "BROADCASTD_MAX_SYNC_VALUES", default_value = "1024")]
    pub max_sync_values: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, env = "BROADCASTD_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gossip_interval_ms: 200,
            rpc_timeout_ms: 1000,
            max_sync_values: 1024,
            verbose: false,
            log_format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.gossip_interval_ms == 0 {
            anyhow::bail!("Gossip interval must be positive");
        }
        if self.rpc_timeout_ms == 0 {
            anyhow::bail!("RPC timeout must be positive");
        }
        if self.max_sync_values == 0 {
            anyhow::bail!("Max sync values must be positive");
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            anyhow::bail!("Unknown log format: {}", self.log_format);
        }
        Ok(())
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

use crate::types::{FetchConfig, RelayError, Result};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "press-relay", version, about = "Scrapes press releases and relays them as event streams")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub settings: Settings,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll every source and serve the event streams (default).
    Serve,
    /// Print the configured topics.
    Topics,
    /// Scrape one source and print what it finds, without touching the store.
    Check {
        topic: String,
        /// One line per release instead of the full content.
        #[arg(short, long)]
        brief: bool,
    },
    /// Run a single ingestion cycle for one topic against the store.
    RunOnce { topic: String },
}

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Address the stream server listens on.
    #[arg(long, env = "PRESS_RELAY_LISTEN", default_value = "0.0.0.0:9998", global = true)]
    pub listen: SocketAddr,

    /// Seconds between two polls of the same source.
    #[arg(long, env = "PRESS_RELAY_INTERVAL", default_value_t = 600, global = true)]
    pub interval: u64,

    /// SQLite file holding stored releases.
    #[arg(long, env = "PRESS_RELAY_DATABASE", default_value = "./prstore.db", global = true)]
    pub database: PathBuf,

    /// JSON file with extra source definitions.
    #[arg(long, env = "PRESS_RELAY_SOURCES", global = true)]
    pub sources: Option<PathBuf>,

    /// Leave out the built-in sources.
    #[arg(long, global = true)]
    pub no_builtin: bool,

    /// Events a subscriber may fall behind before it is disconnected.
    #[arg(long, env = "PRESS_RELAY_SUBSCRIBER_BUFFER", default_value_t = 256, global = true)]
    pub subscriber_buffer: usize,

    /// Drop replayable events older than this many days.
    #[arg(long, env = "PRESS_RELAY_RETENTION_DAYS", global = true)]
    pub retention_days: Option<u32>,

    #[arg(long, env = "PRESS_RELAY_USER_AGENT", default_value = "press-relay/0.1", global = true)]
    pub user_agent: String,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout: u64,

    /// Extra attempts for a failed fetch.
    #[arg(long, default_value_t = 3, global = true)]
    pub max_retries: u32,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(RelayError::Config("interval must be at least one second".into()));
        }
        if self.subscriber_buffer == 0 {
            return Err(RelayError::Config("subscriber buffer cannot be 0".into()));
        }
        if self.timeout == 0 {
            return Err(RelayError::Config("timeout cannot be 0".into()));
        }
        if self.retention_days == Some(0) {
            return Err(RelayError::Config("retention must be at least one day".into()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(RelayError::Config("user agent cannot be empty".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        self.retention_days.map(|days| chrono::Duration::days(i64::from(days)))
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            user_agent: self.user_agent.clone(),
            timeout_seconds: self.timeout,
            max_retries: self.max_retries,
            ..FetchConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cli = Cli::parse_from(["press-relay"]);
        assert!(cli.command.is_none());
        assert!(cli.settings.validate().is_ok());
        assert_eq!(cli.settings.poll_interval(), Duration::from_secs(600));
        assert_eq!(cli.settings.listen.port(), 9998);
    }

    #[test]
    fn rejects_zero_interval() {
        let cli = Cli::parse_from(["press-relay", "--interval", "0", "topics"]);
        assert!(matches!(cli.command, Some(Command::Topics)));
        assert!(matches!(cli.settings.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn check_takes_topic_and_brief() {
        let cli = Cli::parse_from(["press-relay", "check", "waitrose", "--brief"]);
        match cli.command {
            Some(Command::Check { topic, brief }) => {
                assert_eq!(topic, "waitrose");
                assert!(brief);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}

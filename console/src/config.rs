//! Command-line options and the coordinator's timing configuration

use crate::retry::RetryPolicy;
use anyhow::{bail, Result};
use clap::Parser;
use std::time::Duration;
use tracing::Level;

/// Timing and retry behavior of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// How long a drive key keeps the robot moving after its last repeat
    pub watchdog_interval: Duration,
    /// Mission clock polling interval
    pub clock_interval: Duration,
    /// `toggle_control` / `toggle_motors`
    pub toggle_retry: RetryPolicy,
    /// `zero_turntable`
    pub zero_retry: RetryPolicy,
    /// Cancel-and-poll loop used when changing modes
    pub drain: RetryPolicy,
    /// Emit a warning every this many drain polls
    pub drain_warn_every: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            watchdog_interval: Duration::from_millis(300),
            clock_interval: Duration::from_millis(500),
            toggle_retry: RetryPolicy::unbounded(Duration::from_millis(100)),
            zero_retry: RetryPolicy::unbounded(Duration::from_millis(100)),
            drain: RetryPolicy::unbounded(Duration::from_millis(10)),
            drain_warn_every: 500,
        }
    }
}

/// Operator console for the mining robot
#[derive(Debug, Parser, Clone)]
#[command(name = "mission-control", about, version)]
pub struct Args {
    /// Address of the robot's command executor
    #[arg(long, default_value = "127.0.0.1:44444")]
    pub executor: String,

    /// Run against the built-in simulated executor
    #[arg(long, default_value_t = false)]
    pub sim: bool,

    /// Motor watchdog interval (milliseconds)
    #[arg(long = "watchdog-ms", default_value_t = 300)]
    pub watchdog_ms: u64,

    /// Mission clock polling interval (milliseconds)
    #[arg(long = "clock-ms", default_value_t = 500)]
    pub clock_ms: u64,

    /// Delay between toggle and zeroing retries (milliseconds)
    #[arg(long = "retry-ms", default_value_t = 100)]
    pub retry_ms: u64,

    /// Delay between drain polls when switching modes (milliseconds)
    #[arg(long = "drain-ms", default_value_t = 10)]
    pub drain_ms: u64,

    /// Give up draining a channel after this many polls (default: never)
    #[arg(long = "drain-attempts")]
    pub drain_attempts: Option<u32>,

    /// How long to wait for a service reply from the executor (milliseconds)
    #[arg(long = "service-timeout-ms", default_value_t = 2000)]
    pub service_timeout_ms: u64,

    /// Maximum log level
    #[arg(long = "log-level", default_value_t = Level::INFO)]
    pub log_level: Level,
}

impl Args {
    /// Parse CLI arguments and validate them right away
    pub fn parse_args() -> Result<Self> {
        let args = Self::parse();
        args.validate()?;
        Ok(args)
    }

    pub fn validate(&self) -> Result<()> {
        if self.watchdog_ms == 0 {
            bail!("--watchdog-ms must be greater than 0");
        }
        if self.clock_ms == 0 {
            bail!("--clock-ms must be greater than 0");
        }
        if self.service_timeout_ms == 0 {
            bail!("--service-timeout-ms must be greater than 0");
        }
        if self.drain_attempts == Some(0) {
            bail!("--drain-attempts must be at least 1");
        }

        Ok(())
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        let retry = Duration::from_millis(self.retry_ms);
        let drain_interval = Duration::from_millis(self.drain_ms);

        CoordinatorConfig {
            watchdog_interval: Duration::from_millis(self.watchdog_ms),
            clock_interval: Duration::from_millis(self.clock_ms),
            toggle_retry: RetryPolicy::unbounded(retry),
            zero_retry: RetryPolicy::unbounded(retry),
            drain: RetryPolicy {
                interval: drain_interval,
                max_attempts: self.drain_attempts,
            },
            ..CoordinatorConfig::default()
        }
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service_timeout_ms)
    }
}

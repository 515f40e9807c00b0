use std::sync::OnceLock;

use clap::{ArgGroup, Parser};

/// Keeps the MT5 terminal container alive for the trading engine.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["daemon", "restart_now", "health_check"])
))]
pub struct Args {
    /// Run as a daemon with scheduled restarts and health monitoring.
    #[arg(long)]
    pub daemon: bool,
    /// Restart the container immediately and exit.
    #[arg(long)]
    pub restart_now: bool,
    /// Run a single health check and exit.
    #[arg(long)]
    pub health_check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Daemon,
    RestartNow,
    HealthCheck,
}

impl Args {
    pub fn mode(&self) -> Mode {
        if self.restart_now {
            Mode::RestartNow
        } else if self.health_check {
            Mode::HealthCheck
        } else {
            Mode::Daemon
        }
    }
}

static ARGS: OnceLock<Args> = OnceLock::new();

pub fn get_cli_args() -> &'static Args {
    ARGS.get_or_init(Args::parse)
}

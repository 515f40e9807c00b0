//! Lifecycle controller for the managed container.
//!
//! Every tick re-derives what to do from the clock and a fresh health check.
//! Nothing but the time of the last restart is kept between ticks, so a
//! supervisor killed at any point resumes without a stuck state.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local};

use crate::config::SupervisorConfig;
use crate::health::HealthChecker;
use crate::notify::{RESTART_MESSAGE, RestartNotifier};
use crate::probe::RuntimeGate;
use crate::runtime::RuntimeCommand;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartTrigger {
    Schedule,
    Health,
    Manual,
}

/// Which rung of the fallback ladder brought the container back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPath {
    Native,
    StopStart,
    Recreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RestartError {
    #[error("container runtime is not available")]
    RuntimeUnavailable,
    #[error("every restart strategy failed")]
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Restarted {
        trigger: RestartTrigger,
        result: Result<RestartPath, RestartError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPath {
    Existing,
    Created,
}

pub struct LifecycleController {
    runtime: Arc<RuntimeGate>,
    health: HealthChecker,
    notifier: Arc<dyn RestartNotifier>,
    clock: Arc<dyn Clock>,
    container_name: String,
    config: SupervisorConfig,
    last_restart: DateTime<Local>,
}

impl LifecycleController {
    pub fn new(
        config: SupervisorConfig,
        runtime: Arc<RuntimeGate>,
        notifier: Arc<dyn RestartNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let health = HealthChecker::new(&config, runtime.clone());
        let last_restart = clock.now();
        Self {
            runtime,
            health,
            notifier,
            clock,
            container_name: config.container_name.clone(),
            config,
            last_restart,
        }
    }

    pub fn last_restart(&self) -> DateTime<Local> {
        self.last_restart
    }

    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    pub fn runtime(&self) -> &RuntimeGate {
        &self.runtime
    }

    fn restart_due(&self, now: DateTime<Local>) -> bool {
        // A clock that went backwards counts as no time elapsed
        let elapsed = (now - self.last_restart).to_std().unwrap_or(Duration::ZERO);
        elapsed >= self.config.restart_interval
    }

    /// One evaluation of the schedule and, failing that, of health.
    pub async fn tick(&mut self) -> TickOutcome {
        let now = self.clock.now();

        let trigger = if self.restart_due(now) {
            log::info!(
                "Scheduled restart time reached (last restart at {})",
                self.last_restart.to_rfc3339()
            );
            RestartTrigger::Schedule
        } else if !self.health.is_healthy().await {
            log::warn!("Health check failed, restarting container");
            RestartTrigger::Health
        } else {
            return TickOutcome::Idle;
        };

        let result = self.restart(trigger).await;
        self.last_restart = now;
        TickOutcome::Restarted { trigger, result }
    }

    /// Bring the container back, from the cheapest strategy to the most
    /// invasive one. Settles and notifies once at the end.
    pub async fn restart(&self, trigger: RestartTrigger) -> Result<RestartPath, RestartError> {
        if !self.runtime.is_available() {
            log::error!(
                "Cannot restart {}: container runtime is not available",
                self.container_name
            );
            return Err(RestartError::RuntimeUnavailable);
        }

        log::info!(
            "Restarting MT5 container {} ({:?})",
            self.container_name,
            trigger
        );

        let path = if self.restart_native().await {
            Some(RestartPath::Native)
        } else {
            self.restart_manually().await
        };

        let Some(path) = path else {
            log::error!(
                "Failed to restart MT5 container {}; will retry on the next check",
                self.container_name
            );
            return Err(RestartError::Exhausted);
        };

        if !self.config.settle_delay.is_zero() {
            log::info!(
                "Waiting {:?} for the MT5 container to settle",
                self.config.settle_delay
            );
            tokio::time::sleep(self.config.settle_delay).await;
        }
        self.notifier.notify(self.clock.now(), RESTART_MESSAGE).await;

        log::info!(
            "MT5 container {} restarted successfully ({:?})",
            self.container_name,
            path
        );
        Ok(path)
    }

    async fn restart_native(&self) -> bool {
        let result = self
            .runtime
            .execute(&RuntimeCommand::Restart {
                name: self.container_name.clone(),
            })
            .await;
        if !result.success {
            log::warn!(
                "Native restart of {} failed: {}",
                self.container_name,
                result.stderr.trim()
            );
        }
        result.success
    }

    async fn restart_manually(&self) -> Option<RestartPath> {
        log::info!("Falling back to stop and start for {}", self.container_name);
        if !self.stop_container().await {
            log::warn!(
                "Could not stop {}, attempting to start it anyway",
                self.container_name
            );
        }
        tokio::time::sleep(self.config.stop_pause).await;

        match self.start_container().await? {
            StartPath::Existing => Some(RestartPath::StopStart),
            StartPath::Created => Some(RestartPath::Recreate),
        }
    }

    async fn start_or_create(&self) -> Option<StartPath> {
        let result = self
            .runtime
            .execute(&RuntimeCommand::Start {
                name: self.container_name.clone(),
            })
            .await;
        if result.success {
            log::info!("Container {} started successfully", self.container_name);
            return Some(StartPath::Existing);
        }

        log::warn!(
            "Could not start existing container {}: {}",
            self.container_name,
            result.stderr.trim()
        );
        self.create_container().await.then_some(StartPath::Created)
    }

    /// Start the container, creating it from the configured image when it
    /// cannot be started as is. Starting a running container succeeds.
    pub async fn start_container(&self) -> Option<StartPath> {
        if !self.runtime.is_available() {
            log::error!(
                "Cannot start {}: container runtime is not available",
                self.container_name
            );
            return None;
        }
        self.start_or_create().await
    }

    /// Stopping a stopped or missing container succeeds.
    pub async fn stop_container(&self) -> bool {
        log::info!("Stopping container {}", self.container_name);
        let result = self
            .runtime
            .execute(&RuntimeCommand::Stop {
                name: self.container_name.clone(),
            })
            .await;
        if result.success {
            log::info!("Container {} stopped successfully", self.container_name);
            true
        } else if result.is_missing_container() || result.is_not_running() {
            log::info!("Container {} already stopped", self.container_name);
            true
        } else {
            log::error!("Failed to stop container: {}", result.stderr.trim());
            false
        }
    }

    pub async fn remove_container(&self) -> bool {
        log::info!("Removing container {}", self.container_name);
        let result = self
            .runtime
            .execute(&RuntimeCommand::Remove {
                name: self.container_name.clone(),
            })
            .await;
        if result.success {
            log::info!("Container {} removed successfully", self.container_name);
        } else {
            log::warn!(
                "Failed to remove container (may not exist): {}",
                result.stderr.trim()
            );
        }
        result.success
    }

    /// Create a brand new container, clearing any stale one holding the name.
    pub async fn create_container(&self) -> bool {
        // A failed removal usually means nothing was there
        let _ = self.remove_container().await;

        let spec = self.config.run_spec();
        log::info!("Creating container {} from {}", spec.name, spec.image);
        let result = self.runtime.execute(&RuntimeCommand::Run(spec)).await;
        if result.success {
            log::info!("Container {} created successfully", self.container_name);
        } else {
            log::error!("Failed to create container: {}", result.stderr.trim());
        }
        result.success
    }
}

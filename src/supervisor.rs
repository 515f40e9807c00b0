//! Process-level harness: the daemon loop and the one-shot invocations.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use futures_util::FutureExt;
use tokio::sync::watch;

use crate::config::SupervisorConfig;
use crate::health::ContainerState;
use crate::lifecycle::{LifecycleController, RestartTrigger, TickOutcome};

pub struct Supervisor {
    controller: LifecycleController,
    health_check_interval: Duration,
    loop_error_delay: Duration,
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

impl Supervisor {
    pub fn new(controller: LifecycleController, config: &SupervisorConfig) -> Self {
        Self {
            controller,
            health_check_interval: config.health_check_interval,
            loop_error_delay: config.loop_error_delay,
        }
    }

    /// Restart once. True when the container came back.
    pub async fn restart_now(&self) -> bool {
        log::info!("Force restart requested");
        match self.controller.restart(RestartTrigger::Manual).await {
            Ok(_) => true,
            Err(e) => {
                log::error!("Restart failed: {e}");
                false
            }
        }
    }

    /// Check once and print the verdict. True when healthy.
    pub async fn health_check(&self) -> bool {
        let state = self.controller.health().check().await;
        match state {
            ContainerState::Running => {
                println!("Health check: PASSED");
                true
            }
            state => {
                println!("Health check: FAILED ({state})");
                false
            }
        }
    }

    /// Run ticks until `shutdown` turns true. Shutdown is only observed
    /// between ticks.
    pub async fn run_daemon(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
        reprobe: &AtomicBool,
    ) {
        log::info!(
            "Monitoring MT5 container every {:?}",
            self.health_check_interval
        );
        let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]);

        loop {
            if reprobe.swap(false, Ordering::SeqCst) {
                log::info!("Re-probing container runtime availability");
                self.controller.runtime().probe().await;
                let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]);
            }

            let delay = match AssertUnwindSafe(self.controller.tick()).catch_unwind().await {
                Ok(outcome) => {
                    match outcome {
                        TickOutcome::Idle => log::debug!("MT5 container healthy, nothing to do"),
                        TickOutcome::Restarted { trigger, result } => log::info!(
                            "{trigger:?} restart finished with {result:?}, schedule reset at {}",
                            self.controller.last_restart().to_rfc3339()
                        ),
                    }
                    self.health_check_interval
                }
                Err(panic) => {
                    log::error!("Error in monitoring loop: {}", panic_message(panic.as_ref()));
                    self.loop_error_delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Ok(_) = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        log::info!("Monitoring stopped by user");
    }
}

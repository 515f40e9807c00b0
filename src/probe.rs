//! Runtime availability.
//!
//! Availability is decided once at start up and cached in a [`RuntimeGate`].
//! While the runtime is considered unavailable every command short-circuits to
//! a failure without reaching the runtime.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::runtime::{CommandResult, ContainerRuntime, RuntimeCommand};

/// Stderr reported for commands refused by the gate.
pub const RUNTIME_UNAVAILABLE: &str = "container runtime unavailable";

/// The runtime is available when a version query succeeds and answers
/// something.
pub async fn check_available(runtime: &dyn ContainerRuntime) -> bool {
    let result = runtime.execute(&RuntimeCommand::Version).await;
    if result.success && !result.stdout.trim().is_empty() {
        log::info!("Container runtime available (version {})", result.stdout.trim());
        true
    } else {
        log::error!(
            "Container runtime is not available: {}",
            result.stderr.trim()
        );
        false
    }
}

pub struct RuntimeGate {
    runtime: Arc<dyn ContainerRuntime>,
    available: AtomicBool,
}

impl RuntimeGate {
    /// A gate that refuses everything until [`RuntimeGate::probe`] runs.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            available: AtomicBool::new(false),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Query the runtime and cache the answer.
    pub async fn probe(&self) -> bool {
        let available = check_available(self.runtime.as_ref()).await;
        self.available.store(available, Ordering::SeqCst);
        available
    }

    pub async fn execute(&self, command: &RuntimeCommand) -> CommandResult {
        if !self.is_available() {
            log::error!(
                "Skipping {}: container runtime is not available",
                command.describe()
            );
            return CommandResult::failure(RUNTIME_UNAVAILABLE);
        }
        self.runtime.execute(command).await
    }
}

//! Container runtime gateway.
//!
//! Every interaction with the container runtime goes through
//! [`ContainerRuntime::execute`], which turns a [`RuntimeCommand`] into a
//! [`CommandResult`]. Failures of any kind (non-zero exit, spawn error,
//! timeout) are reported inside the result, never as an `Err`.

use async_trait::async_trait;

pub mod api;
pub mod cli;

pub use api::DockerApi;
pub use cli::DockerCli;

/// Stderr reported when a command exceeds its timeout.
pub const TIMED_OUT: &str = "Command timed out";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn timed_out() -> Self {
        Self::failure(TIMED_OUT)
    }

    /// The runtime reported that no container of that name exists.
    pub fn is_missing_container(&self) -> bool {
        self.stderr.contains("No such container")
    }

    /// The runtime reported that the container is already stopped.
    pub fn is_not_running(&self) -> bool {
        self.stderr.contains("is not running")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// Everything needed to create a brand new container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub ports: Vec<PortMapping>,
    pub env: Vec<(String, String)>,
    pub restart_policy: RestartPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

impl RestartPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }
}

impl std::str::FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "no" => Ok(RestartPolicy::No),
            "always" => Ok(RestartPolicy::Always),
            "on-failure" => Ok(RestartPolicy::OnFailure),
            "unless-stopped" => Ok(RestartPolicy::UnlessStopped),
            other => Err(format!("unknown restart policy '{other}'")),
        }
    }
}

/// A single operation against the container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCommand {
    /// Server version query, used to decide availability.
    Version,
    /// All containers whose name matches `name`, one `name<TAB>state` per line.
    List { name: String },
    Start { name: String },
    Stop { name: String },
    Restart { name: String },
    Remove { name: String },
    Run(RunSpec),
}

impl RuntimeCommand {
    pub fn describe(&self) -> String {
        match self {
            RuntimeCommand::Version => "version".to_string(),
            RuntimeCommand::List { name } => format!("list {name}"),
            RuntimeCommand::Start { name } => format!("start {name}"),
            RuntimeCommand::Stop { name } => format!("stop {name}"),
            RuntimeCommand::Restart { name } => format!("restart {name}"),
            RuntimeCommand::Remove { name } => format!("remove {name}"),
            RuntimeCommand::Run(spec) => format!("run {} from {}", spec.name, spec.image),
        }
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn execute(&self, command: &RuntimeCommand) -> CommandResult;
}

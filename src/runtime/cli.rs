//! Runtime gateway that shells out to the `docker` command line.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandResult, ContainerRuntime, RunSpec, RuntimeCommand};

pub struct DockerCli {
    binary: String,
    timeout: Duration,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn exec(&self, args: &[String]) -> CommandResult {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed out child is killed when its future is dropped
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::error!("Failed to invoke {} {}: {}", self.binary, args.join(" "), e);
                return CommandResult::failure(e.to_string());
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => CommandResult {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(e)) => {
                log::error!("Error running {} {}: {}", self.binary, args.join(" "), e);
                CommandResult::failure(e.to_string())
            }
            Err(_) => {
                log::error!(
                    "Command timed out after {:?}: {} {}",
                    self.timeout,
                    self.binary,
                    args.join(" ")
                );
                CommandResult::timed_out()
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn execute(&self, command: &RuntimeCommand) -> CommandResult {
        self.exec(&command_args(command)).await
    }
}

fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
    ];
    for port in &spec.ports {
        args.push("-p".to_string());
        args.push(format!("{}:{}", port.host, port.container));
    }
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push("--restart".to_string());
    args.push(spec.restart_policy.as_str().to_string());
    args.push(spec.image.clone());
    args
}

/// Arguments passed to the runtime binary for each command.
fn command_args(command: &RuntimeCommand) -> Vec<String> {
    let args: Vec<&str> = match command {
        RuntimeCommand::Version => vec!["version", "--format", "{{.Server.Version}}"],
        RuntimeCommand::List { name } => {
            return vec![
                "ps".to_string(),
                "-a".to_string(),
                "--filter".to_string(),
                format!("name={name}"),
                "--format".to_string(),
                "{{.Names}}\t{{.State}}".to_string(),
            ];
        }
        RuntimeCommand::Start { name } => vec!["start", name.as_str()],
        RuntimeCommand::Stop { name } => vec!["stop", name.as_str()],
        RuntimeCommand::Restart { name } => vec!["restart", name.as_str()],
        RuntimeCommand::Remove { name } => vec!["rm", "-f", name.as_str()],
        RuntimeCommand::Run(spec) => return run_args(spec),
    };
    args.into_iter().map(String::from).collect()
}

//! Runtime gateway backed by the Docker Engine API through bollard.
//!
//! Produces the same [`CommandResult`]s as the command line backend so the
//! rest of the supervisor cannot tell the two apart.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{
    ContainerCreateBody, HostConfig, PortBinding, RestartPolicy as DockerRestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptions, CreateContainerOptionsBuilder, CreateImageOptions,
    CreateImageOptionsBuilder, InspectContainerOptions, InspectContainerOptionsBuilder,
    RemoveContainerOptions, RemoveContainerOptionsBuilder, RestartContainerOptions,
    RestartContainerOptionsBuilder, StartContainerOptions, StartContainerOptionsBuilder,
    StopContainerOptions, StopContainerOptionsBuilder,
};
use futures_util::StreamExt;

use super::{CommandResult, ContainerRuntime, RestartPolicy, RunSpec, RuntimeCommand};

/// Seconds the daemon waits for a graceful stop before killing.
const STOP_GRACE_SECS: i32 = 10;

pub struct DockerApi {
    docker: Docker,
    timeout: Duration,
}

impl DockerApi {
    /// Connect using the default local method (Unix socket on Linux/macOS,
    /// named pipe on Windows).
    pub fn connect(timeout: Duration) -> Result<Self, bollard::errors::Error> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker, timeout })
    }

    async fn dispatch(&self, command: &RuntimeCommand) -> CommandResult {
        match command {
            RuntimeCommand::Version => self.version().await,
            RuntimeCommand::List { name } => self.list(name).await,
            RuntimeCommand::Start { name } => self.start(name).await,
            RuntimeCommand::Stop { name } => self.stop(name).await,
            RuntimeCommand::Restart { name } => self.restart(name).await,
            RuntimeCommand::Remove { name } => self.remove(name).await,
            RuntimeCommand::Run(spec) => self.run(spec).await,
        }
    }

    async fn version(&self) -> CommandResult {
        match self.docker.version().await {
            Ok(version) => CommandResult::ok(version.version.unwrap_or_default()),
            Err(e) => CommandResult::failure(e.to_string()),
        }
    }

    async fn list(&self, name: &str) -> CommandResult {
        let options: InspectContainerOptions = InspectContainerOptionsBuilder::new().build();

        match self.docker.inspect_container(name, Some(options)).await {
            Ok(info) => {
                let running = info
                    .state
                    .and_then(|state| state.running)
                    .unwrap_or(false);
                let actual_name = info.name.unwrap_or_else(|| name.to_string());
                let state = if running { "running" } else { "exited" };
                CommandResult::ok(format!(
                    "{}\t{}\n",
                    actual_name.trim_start_matches('/'),
                    state
                ))
            }
            // Nothing matches, which is an empty listing rather than an error
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => CommandResult::ok(""),
            Err(e) => CommandResult::failure(e.to_string()),
        }
    }

    async fn start(&self, name: &str) -> CommandResult {
        let options: StartContainerOptions = StartContainerOptionsBuilder::new().build();

        match self.docker.start_container(name, Some(options)).await {
            Ok(_) => CommandResult::ok(name),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                log::info!("Container {} already running", name);
                CommandResult::ok(name)
            }
            Err(e) => container_error(name, e),
        }
    }

    async fn stop(&self, name: &str) -> CommandResult {
        let options: StopContainerOptions = StopContainerOptionsBuilder::new()
            .t(STOP_GRACE_SECS)
            .build();

        match self.docker.stop_container(name, Some(options)).await {
            Ok(_) => CommandResult::ok(name),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                log::info!("Container {} already stopped", name);
                CommandResult::ok(name)
            }
            Err(e) => container_error(name, e),
        }
    }

    async fn restart(&self, name: &str) -> CommandResult {
        let options: RestartContainerOptions = RestartContainerOptionsBuilder::new()
            .t(STOP_GRACE_SECS)
            .build();

        match self.docker.restart_container(name, Some(options)).await {
            Ok(_) => CommandResult::ok(name),
            Err(e) => container_error(name, e),
        }
    }

    async fn remove(&self, name: &str) -> CommandResult {
        let options: RemoveContainerOptions =
            RemoveContainerOptionsBuilder::new().force(true).build();

        match self.docker.remove_container(name, Some(options)).await {
            Ok(_) => CommandResult::ok(name),
            Err(e) => container_error(name, e),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), bollard::errors::Error> {
        log::info!("Pulling image: {}", image);
        let (from_image, tag) = parse_image_reference(image);

        let mut builder = CreateImageOptionsBuilder::new().from_image(from_image);
        if let Some(tag) = tag {
            builder = builder.tag(tag);
        }
        let options: CreateImageOptions = builder.build();

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(status) = info.status {
                log::debug!("Pull status: {}", status);
            }
        }
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> CommandResult {
        if let Err(e) = self.pull_image(&spec.image).await {
            // A cached image may still be usable, so creation is attempted anyway
            log::warn!("Failed to pull image {}: {}", spec.image, e);
        }

        let exposed_ports = exposed_ports(spec);
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for (container_port, port) in exposed_ports.iter().zip(&spec.ports) {
            port_bindings.insert(
                container_port.clone(),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(port.host.to_string()),
                }]),
            );
        }

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = HostConfig {
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            restart_policy: Some(DockerRestartPolicy {
                name: Some(restart_policy_name(spec.restart_policy)),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let config = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let options: CreateContainerOptions =
            CreateContainerOptionsBuilder::new().name(&spec.name).build();

        if let Err(e) = self.docker.create_container(Some(options), config).await {
            return CommandResult::failure(e.to_string());
        }

        let started = self.start(&spec.name).await;
        if !started.success {
            return started;
        }
        CommandResult::ok(spec.name.clone())
    }
}

#[async_trait]
impl ContainerRuntime for DockerApi {
    async fn execute(&self, command: &RuntimeCommand) -> CommandResult {
        match tokio::time::timeout(self.timeout, self.dispatch(command)).await {
            Ok(result) => result,
            Err(_) => {
                log::error!(
                    "Docker API call timed out after {:?}: {}",
                    self.timeout,
                    command.describe()
                );
                CommandResult::timed_out()
            }
        }
    }
}

/// Map daemon errors to the wording the command line would have produced.
fn container_error(name: &str, e: bollard::errors::Error) -> CommandResult {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => CommandResult::failure(format!("No such container: {name}")),
        e => CommandResult::failure(e.to_string()),
    }
}

fn restart_policy_name(policy: RestartPolicy) -> RestartPolicyNameEnum {
    match policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    }
}

/// Container side of every published port, in the engine's `port/proto` form.
fn exposed_ports(spec: &RunSpec) -> Vec<String> {
    spec.ports
        .iter()
        .map(|port| format!("{}/tcp", port.container))
        .collect()
}

/// Split an image into the `fromImage` and `tag` pull parameters. Digest
/// references are pulled whole and carry no tag.
fn parse_image_reference(image: &str) -> (&str, Option<&str>) {
    if image.contains('@') {
        return (image, None);
    }

    // A colon followed by a slash belongs to a registry port, not a tag
    if let Some(colon_pos) = image.rfind(':') {
        let after_colon = &image[colon_pos + 1..];
        if !after_colon.contains('/') {
            return (&image[..colon_pos], Some(after_colon));
        }
    }

    (image, Some("latest"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::PortMapping;

    #[test]
    fn test_parse_image_reference() {
        assert_eq!(
            parse_image_reference("gmag11/metatrader5_vnc"),
            ("gmag11/metatrader5_vnc", Some("latest"))
        );
        assert_eq!(
            parse_image_reference("gmag11/metatrader5_vnc:1.0"),
            ("gmag11/metatrader5_vnc", Some("1.0"))
        );
        assert_eq!(
            parse_image_reference("localhost:5000/mt5"),
            ("localhost:5000/mt5", Some("latest"))
        );
    }

    #[test]
    fn test_digest_reference_is_pulled_without_tag() {
        assert_eq!(
            parse_image_reference("gmag11/metatrader5_vnc@sha256:abcd"),
            ("gmag11/metatrader5_vnc@sha256:abcd", None)
        );
        assert_eq!(
            parse_image_reference("localhost:5000/mt5@sha256:abcd"),
            ("localhost:5000/mt5@sha256:abcd", None)
        );
    }

    #[test]
    fn test_exposed_ports_follow_published_ports() {
        let spec = RunSpec {
            image: "gmag11/metatrader5_vnc".to_string(),
            name: "mt5_user".to_string(),
            ports: vec![
                PortMapping {
                    host: 8001,
                    container: 8001,
                },
                PortMapping {
                    host: 3000,
                    container: 3001,
                },
            ],
            env: Vec::new(),
            restart_policy: RestartPolicy::UnlessStopped,
        };
        assert_eq!(exposed_ports(&spec), vec!["8001/tcp", "3001/tcp"]);
    }

    #[test]
    fn test_not_found_reads_like_the_cli() {
        let result = container_error(
            "mt5_user",
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message: "gone".to_string(),
            },
        );
        assert!(!result.success);
        assert!(result.is_missing_container());
    }

    #[test]
    fn test_restart_policy_mapping() {
        assert_eq!(
            restart_policy_name(RestartPolicy::UnlessStopped),
            RestartPolicyNameEnum::UNLESS_STOPPED
        );
        assert_eq!(
            restart_policy_name(RestartPolicy::OnFailure),
            RestartPolicyNameEnum::ON_FAILURE
        );
    }
}

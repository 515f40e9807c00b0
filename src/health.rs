//! Health of the managed container: running according to the runtime, and
//! accepting TCP connections on its published port.

use std::{sync::Arc, time::Duration};

use tokio::net::TcpStream;

use crate::config::SupervisorConfig;
use crate::probe::RuntimeGate;
use crate::runtime::RuntimeCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// The runtime could not tell.
    Unknown,
    NotFound,
    Stopped,
    Running,
    /// Running, but the port refuses connections.
    Unhealthy,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerState::Unknown => "unknown",
            ContainerState::NotFound => "not found",
            ContainerState::Stopped => "stopped",
            ContainerState::Running => "running",
            ContainerState::Unhealthy => "port not accessible",
        };
        f.write_str(s)
    }
}

/// Parse `name<TAB>state` lines. A line without a state column lists a
/// running container.
fn parse_listing(output: &str) -> Vec<(&str, &str)> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('\t') {
            Some((name, state)) => (name.trim(), state.trim()),
            None => (line, "running"),
        })
        .collect()
}

pub struct HealthChecker {
    runtime: Arc<RuntimeGate>,
    container_name: String,
    host: String,
    port: u16,
    probe_timeout: Duration,
}

impl HealthChecker {
    pub fn new(config: &SupervisorConfig, runtime: Arc<RuntimeGate>) -> Self {
        Self {
            runtime,
            container_name: config.container_name.clone(),
            host: config.probe_host.clone(),
            port: config.port,
            probe_timeout: config.probe_timeout,
        }
    }

    /// Where the container stands according to the runtime alone.
    pub async fn runtime_state(&self) -> ContainerState {
        let result = self
            .runtime
            .execute(&RuntimeCommand::List {
                name: self.container_name.clone(),
            })
            .await;
        if !result.success {
            log::warn!("Unable to list containers: {}", result.stderr.trim());
            return ContainerState::Unknown;
        }

        // The runtime filter matches substrings, so compare names exactly
        match parse_listing(&result.stdout)
            .into_iter()
            .find(|(name, _)| *name == self.container_name)
        {
            Some((_, "running")) => ContainerState::Running,
            Some(_) => ContainerState::Stopped,
            None => ContainerState::NotFound,
        }
    }

    pub async fn port_open(&self) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(self.probe_timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                log::debug!("Connection to {}:{} failed: {}", self.host, self.port, e);
                false
            }
            Err(_) => {
                log::debug!(
                    "Connection to {}:{} timed out after {:?}",
                    self.host,
                    self.port,
                    self.probe_timeout
                );
                false
            }
        }
    }

    pub async fn check(&self) -> ContainerState {
        let state = self.runtime_state().await;
        if state != ContainerState::Running {
            log::warn!("MT5 container {} is not running ({})", self.container_name, state);
            return state;
        }

        if self.port_open().await {
            log::debug!("MT5 health check passed");
            ContainerState::Running
        } else {
            log::warn!("MT5 port {}:{} is not accessible", self.host, self.port);
            ContainerState::Unhealthy
        }
    }

    pub async fn is_healthy(&self) -> bool {
        self.check().await == ContainerState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SimulatedDocker, closed_port, open_port, test_config};

    async fn checker(docker: Arc<SimulatedDocker>, port: u16) -> HealthChecker {
        let gate = Arc::new(RuntimeGate::new(docker));
        gate.probe().await;
        HealthChecker::new(&test_config(port), gate)
    }

    #[test]
    fn test_parse_listing() {
        let listing = "mt5_user_old\texited\nmt5_user\trunning\n\nplain_name\n";
        assert_eq!(
            parse_listing(listing),
            vec![
                ("mt5_user_old", "exited"),
                ("mt5_user", "running"),
                ("plain_name", "running"),
            ]
        );
    }

    #[tokio::test]
    async fn test_running_with_open_port_is_healthy() {
        let (_listener, port) = open_port();
        let health = checker(Arc::new(SimulatedDocker::running()), port).await;
        assert_eq!(health.check().await, ContainerState::Running);
        assert!(health.is_healthy().await);
    }

    #[tokio::test]
    async fn test_running_with_closed_port_is_unhealthy() {
        let health = checker(Arc::new(SimulatedDocker::running()), closed_port()).await;
        assert_eq!(health.check().await, ContainerState::Unhealthy);
    }

    #[tokio::test]
    async fn test_not_running_skips_port_probe() {
        // The port is open, so a probe would have reported healthy
        let (_listener, port) = open_port();
        let stopped = checker(Arc::new(SimulatedDocker::stopped()), port).await;
        assert_eq!(stopped.check().await, ContainerState::Stopped);

        let missing = checker(Arc::new(SimulatedDocker::missing()), port).await;
        assert_eq!(missing.check().await, ContainerState::NotFound);
    }

    #[tokio::test]
    async fn test_name_prefix_is_not_a_match() {
        let (_listener, port) = open_port();
        let docker = Arc::new(SimulatedDocker::missing());
        docker.add_other_container("mt5_user_backup", true);
        let health = checker(docker, port).await;
        assert_eq!(health.check().await, ContainerState::NotFound);
    }

    #[tokio::test]
    async fn test_list_failure_is_unknown() {
        let docker = Arc::new(SimulatedDocker::running());
        let health = checker(docker.clone(), closed_port()).await;
        docker.set_daemon_up(false);
        assert_eq!(health.check().await, ContainerState::Unknown);
        assert!(!health.is_healthy().await);
    }

    #[tokio::test]
    async fn test_unavailable_runtime_is_never_queried() {
        let (_listener, port) = open_port();
        let docker = Arc::new(SimulatedDocker::unavailable());
        let health = checker(docker.clone(), port).await;
        assert!(!health.is_healthy().await);
        assert_eq!(docker.calls(), vec![RuntimeCommand::Version]);
    }
}

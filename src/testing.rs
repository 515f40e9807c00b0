//! Test doubles shared by the unit tests.

use std::{net::TcpListener, sync::Mutex, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::config::{RuntimeBackend, SupervisorConfig};
use crate::lifecycle::Clock;
use crate::notify::RestartNotifier;
use crate::runtime::{CommandResult, ContainerRuntime, RestartPolicy, RuntimeCommand};

pub const CONTAINER: &str = "mt5_user";

/// Configuration with every delay removed, probing `127.0.0.1:<port>`.
pub fn test_config(port: u16) -> SupervisorConfig {
    SupervisorConfig {
        container_name: CONTAINER.to_string(),
        image: "gmag11/metatrader5_vnc".to_string(),
        port,
        probe_host: "127.0.0.1".to_string(),
        restart_interval: Duration::from_secs(12 * 3600),
        health_check_interval: Duration::from_secs(300),
        trading_engine_url: url::Url::parse("http://127.0.0.1:5001").expect("valid url"),
        command_timeout: Duration::from_secs(5),
        settle_delay: Duration::ZERO,
        notify_timeout: Duration::from_secs(1),
        probe_timeout: Duration::from_secs(1),
        stop_pause: Duration::ZERO,
        loop_error_delay: Duration::ZERO,
        restart_policy: RestartPolicy::UnlessStopped,
        container_env: Vec::new(),
        runtime_backend: RuntimeBackend::Cli,
        runtime_binary: "docker".to_string(),
        log_file: None,
    }
}

/// A listening port. Connections succeed while the listener is alive.
pub fn open_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    let port = listener.local_addr().expect("No local address").port();
    (listener, port)
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let (listener, port) = open_port();
    drop(listener);
    port
}

#[derive(Debug)]
struct SimState {
    daemon_up: bool,
    version_output: String,
    exists: bool,
    running: bool,
    fail_restart: bool,
    fail_run: bool,
    others: Vec<(String, bool)>,
}

/// In-memory stand-in for a Docker daemon managing one container, following
/// the command line's answers for each operation.
pub struct SimulatedDocker {
    state: Mutex<SimState>,
    calls: Mutex<Vec<RuntimeCommand>>,
}

impl SimulatedDocker {
    fn with(daemon_up: bool, exists: bool, running: bool) -> Self {
        Self {
            state: Mutex::new(SimState {
                daemon_up,
                version_output: "27.3.1\n".to_string(),
                exists,
                running,
                fail_restart: false,
                fail_run: false,
                others: Vec::new(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn running() -> Self {
        Self::with(true, true, true)
    }

    pub fn stopped() -> Self {
        Self::with(true, true, false)
    }

    pub fn missing() -> Self {
        Self::with(true, false, false)
    }

    pub fn unavailable() -> Self {
        Self::with(false, false, false)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("Poisoned mutex")
    }

    pub fn set_daemon_up(&self, up: bool) {
        self.state().daemon_up = up;
    }

    pub fn set_version_output(&self, output: &str) {
        self.state().version_output = output.to_string();
    }

    pub fn set_fail_restart(&self, fail: bool) {
        self.state().fail_restart = fail;
    }

    pub fn set_fail_run(&self, fail: bool) {
        self.state().fail_run = fail;
    }

    pub fn add_other_container(&self, name: &str, running: bool) {
        self.state().others.push((name.to_string(), running));
    }

    pub fn set_running(&self, running: bool) {
        self.state().running = running;
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn calls(&self) -> Vec<RuntimeCommand> {
        self.calls.lock().expect("Poisoned mutex").clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().expect("Poisoned mutex").clear();
    }
}

fn no_such_container(name: &str) -> CommandResult {
    CommandResult::failure(format!(
        "Error response from daemon: No such container: {name}"
    ))
}

#[async_trait]
impl ContainerRuntime for SimulatedDocker {
    async fn execute(&self, command: &RuntimeCommand) -> CommandResult {
        self.calls
            .lock()
            .expect("Poisoned mutex")
            .push(command.clone());

        let mut state = self.state();
        if !state.daemon_up {
            return CommandResult::failure(
                "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
            );
        }

        match command {
            RuntimeCommand::Version => CommandResult::ok(state.version_output.clone()),
            RuntimeCommand::List { name } => {
                let mut listing = String::new();
                let ours = state.exists.then(|| (CONTAINER.to_string(), state.running));
                for (other, running) in ours.iter().chain(state.others.iter()) {
                    if other.contains(name.as_str()) {
                        let status = if *running { "running" } else { "exited" };
                        listing.push_str(&format!("{other}\t{status}\n"));
                    }
                }
                CommandResult::ok(listing)
            }
            RuntimeCommand::Start { name } | RuntimeCommand::Stop { name }
                if !state.exists =>
            {
                no_such_container(name)
            }
            RuntimeCommand::Start { name } => {
                state.running = true;
                CommandResult::ok(name.clone())
            }
            RuntimeCommand::Stop { name } => {
                state.running = false;
                CommandResult::ok(name.clone())
            }
            RuntimeCommand::Restart { name } => {
                if state.fail_restart {
                    CommandResult::failure("Error response from daemon: Cannot restart container")
                } else if !state.exists {
                    no_such_container(name)
                } else {
                    state.running = true;
                    CommandResult::ok(name.clone())
                }
            }
            RuntimeCommand::Remove { name } => {
                if !state.exists {
                    return no_such_container(name);
                }
                state.exists = false;
                state.running = false;
                CommandResult::ok(name.clone())
            }
            RuntimeCommand::Run(spec) => {
                if state.fail_run {
                    CommandResult::failure("Unable to find image locally")
                } else if state.exists {
                    CommandResult::failure(format!(
                        "Conflict. The container name \"/{}\" is already in use",
                        spec.name
                    ))
                } else {
                    state.exists = true;
                    state.running = true;
                    CommandResult::ok("4f3c2b1a\n")
                }
            }
        }
    }
}

pub struct FakeClock {
    now: Mutex<DateTime<Local>>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Local::now()),
        }
    }
}

impl FakeClock {
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("Poisoned mutex");
        *now += chrono::Duration::from_std(by).expect("Duration out of range");
    }

    pub fn rewind(&self, by: Duration) {
        let mut now = self.now.lock().expect("Poisoned mutex");
        *now -= chrono::Duration::from_std(by).expect("Duration out of range");
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().expect("Poisoned mutex")
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(DateTime<Local>, String)>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.sent.lock().expect("Poisoned mutex").len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .expect("Poisoned mutex")
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl RestartNotifier for RecordingNotifier {
    async fn notify(&self, timestamp: DateTime<Local>, message: &str) {
        self.sent
            .lock()
            .expect("Poisoned mutex")
            .push((timestamp, message.to_string()));
    }
}

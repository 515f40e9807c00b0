use std::process::ExitCode;
use std::sync::Arc;

use cli::Mode;
use config::{RuntimeBackend, SupervisorConfig};
use lifecycle::{LifecycleController, SystemClock};
use notify::HttpNotifier;
use probe::RuntimeGate;
use runtime::{ContainerRuntime, DockerApi, DockerCli};
use supervisor::Supervisor;

mod cli;
mod config;
mod health;
mod lifecycle;
mod logging;
mod notify;
mod probe;
mod runtime;
mod signals;
mod supervisor;
#[cfg(test)]
mod testing;

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = cli::get_cli_args();

    // Environment files are optional
    let _ = dotenv::dotenv();

    let config = match SupervisorConfig::init_from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = logging::init(config.log_file.as_deref()) {
        eprintln!("Unable to open log file: {err}");
        return ExitCode::FAILURE;
    }

    log::info!(
        "Managing container {} ({}) on port {}",
        config.container_name,
        config.image,
        config.port
    );

    let runtime: Arc<dyn ContainerRuntime> = match config.runtime_backend {
        RuntimeBackend::Cli => Arc::new(DockerCli::new(
            &config.runtime_binary,
            config.command_timeout,
        )),
        RuntimeBackend::Api => match DockerApi::connect(config.command_timeout) {
            Ok(api) => Arc::new(api),
            Err(err) => {
                log::error!("Unable to set up the Docker API client: {err}");
                return ExitCode::FAILURE;
            }
        },
    };

    let gate = Arc::new(RuntimeGate::new(runtime));
    gate.probe().await;

    let notifier = match HttpNotifier::new(config.notification_endpoint(), config.notify_timeout)
    {
        Ok(notifier) => notifier,
        Err(err) => {
            log::error!("Unable to build the notification client: {err}");
            return ExitCode::FAILURE;
        }
    };

    let controller = LifecycleController::new(
        config.clone(),
        gate,
        Arc::new(notifier),
        Arc::new(SystemClock),
    );
    let mut supervisor = Supervisor::new(controller, &config);

    match args.mode() {
        Mode::RestartNow => exit_code(supervisor.restart_now().await),
        Mode::HealthCheck => exit_code(supervisor.health_check().await),
        Mode::Daemon => {
            let shutdown = match signals::handle_shutdown() {
                Ok(shutdown) => shutdown,
                Err(err) => {
                    log::error!("Unable to install signal handlers: {err}");
                    return ExitCode::FAILURE;
                }
            };
            let reprobe = match signals::handle_reprobe() {
                Ok(reprobe) => reprobe,
                Err(err) => {
                    log::error!("Unable to install signal handlers: {err}");
                    return ExitCode::FAILURE;
                }
            };
            supervisor.run_daemon(shutdown, &reprobe).await;
            ExitCode::SUCCESS
        }
    }
}

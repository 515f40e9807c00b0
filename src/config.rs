use std::{path::PathBuf, time::Duration};

use envconfig::Envconfig;
use url::Url;

use crate::runtime::{PortMapping, RestartPolicy, RunSpec};

/// Raw process environment, read once at start up.
#[derive(Envconfig, Debug, Clone)]
pub struct EnvConfig {
    #[envconfig(from = "MT5_CONTAINER_NAME", default = "mt5_user")]
    pub container_name: String,
    #[envconfig(from = "MT5_IMAGE", default = "gmag11/metatrader5_vnc")]
    pub image: String,
    #[envconfig(from = "MT5_PORT", default = "8001")]
    pub port: u16,
    #[envconfig(from = "MT5_HOST", default = "localhost")]
    pub host: String,
    #[envconfig(from = "TRADING_ENGINE_URL", default = "http://localhost:5001")]
    pub trading_engine_url: String,
    /// 12 hours
    #[envconfig(from = "MT5_RESTART_INTERVAL_SECS", default = "43200")]
    pub restart_interval_secs: u64,
    #[envconfig(from = "MT5_HEALTH_CHECK_INTERVAL_SECS", default = "300")]
    pub health_check_interval_secs: u64,
    #[envconfig(from = "MT5_COMMAND_TIMEOUT_SECS", default = "30")]
    pub command_timeout_secs: u64,
    #[envconfig(from = "MT5_SETTLE_DELAY_SECS", default = "30")]
    pub settle_delay_secs: u64,
    #[envconfig(from = "MT5_NOTIFY_TIMEOUT_SECS", default = "10")]
    pub notify_timeout_secs: u64,
    #[envconfig(from = "MT5_PROBE_TIMEOUT_SECS", default = "5")]
    pub probe_timeout_secs: u64,
    #[envconfig(from = "MT5_STOP_PAUSE_SECS", default = "5")]
    pub stop_pause_secs: u64,
    #[envconfig(from = "MT5_LOOP_ERROR_DELAY_SECS", default = "60")]
    pub loop_error_delay_secs: u64,
    #[envconfig(from = "MT5_RESTART_POLICY", default = "unless-stopped")]
    pub restart_policy: String,
    #[envconfig(from = "MT5_RUNTIME_BACKEND", default = "cli")]
    pub runtime_backend: String,
    #[envconfig(from = "MT5_RUNTIME_BINARY", default = "docker")]
    pub runtime_binary: String,
    #[envconfig(from = "VNC_USER")]
    pub vnc_user: Option<String>,
    #[envconfig(from = "VNC_PASSWORD")]
    pub vnc_password: Option<String>,
    #[envconfig(from = "MT5_LOG_FILE")]
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeBackend {
    /// Shell out to the runtime binary.
    Cli,
    /// Talk to the Docker Engine API directly.
    Api,
}

impl std::str::FromStr for RuntimeBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cli" => Ok(RuntimeBackend::Cli),
            "api" => Ok(RuntimeBackend::Api),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment error: {0}")]
    Env(#[from] envconfig::Error),
    #[error("Container name must not be empty")]
    EmptyContainerName,
    #[error("Invalid trading engine URL {0:?}: {1}")]
    TradingEngineUrl(String, url::ParseError),
    #[error("Unknown runtime backend {0:?}, expected \"cli\" or \"api\"")]
    RuntimeBackend(String),
    #[error("Invalid restart policy: {0}")]
    RestartPolicy(String),
    #[error("Trading engine URL {0:?} must use http or https")]
    TradingEngineScheme(String),
    #[error("Health check interval must be at least one second")]
    ZeroHealthCheckInterval,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub container_name: String,
    pub image: String,
    /// Published on the host and probed for health. The only port setting.
    pub port: u16,
    pub probe_host: String,
    pub restart_interval: Duration,
    pub health_check_interval: Duration,
    pub trading_engine_url: Url,
    pub command_timeout: Duration,
    pub settle_delay: Duration,
    pub notify_timeout: Duration,
    pub probe_timeout: Duration,
    pub stop_pause: Duration,
    pub loop_error_delay: Duration,
    pub restart_policy: RestartPolicy,
    pub container_env: Vec<(String, String)>,
    pub runtime_backend: RuntimeBackend,
    pub runtime_binary: String,
    pub log_file: Option<PathBuf>,
}

impl SupervisorConfig {
    pub fn init_from_env() -> Result<Self, ConfigError> {
        Self::try_from_env(EnvConfig::init_from_env()?)
    }

    pub fn try_from_env(env: EnvConfig) -> Result<Self, ConfigError> {
        let container_name = env.container_name.trim().to_string();
        if container_name.is_empty() {
            return Err(ConfigError::EmptyContainerName);
        }

        let trading_engine_url = Url::parse(&env.trading_engine_url)
            .map_err(|e| ConfigError::TradingEngineUrl(env.trading_engine_url.clone(), e))?;
        if !matches!(trading_engine_url.scheme(), "http" | "https") {
            return Err(ConfigError::TradingEngineScheme(env.trading_engine_url));
        }

        // The daemon sleeps this long between ticks
        if env.health_check_interval_secs == 0 {
            return Err(ConfigError::ZeroHealthCheckInterval);
        }

        let runtime_backend = env
            .runtime_backend
            .parse::<RuntimeBackend>()
            .map_err(ConfigError::RuntimeBackend)?;

        let restart_policy = env
            .restart_policy
            .parse::<RestartPolicy>()
            .map_err(ConfigError::RestartPolicy)?;

        // The image reads its VNC login from these variables
        let mut container_env = Vec::new();
        if let Some(user) = env.vnc_user {
            container_env.push(("CUSTOM_USER".to_string(), user));
        }
        if let Some(password) = env.vnc_password {
            container_env.push(("PASSWORD".to_string(), password));
        }

        Ok(Self {
            container_name,
            image: env.image,
            port: env.port,
            probe_host: env.host,
            restart_interval: Duration::from_secs(env.restart_interval_secs),
            health_check_interval: Duration::from_secs(env.health_check_interval_secs),
            trading_engine_url,
            command_timeout: Duration::from_secs(env.command_timeout_secs),
            settle_delay: Duration::from_secs(env.settle_delay_secs),
            notify_timeout: Duration::from_secs(env.notify_timeout_secs),
            probe_timeout: Duration::from_secs(env.probe_timeout_secs),
            stop_pause: Duration::from_secs(env.stop_pause_secs),
            loop_error_delay: Duration::from_secs(env.loop_error_delay_secs),
            restart_policy,
            container_env,
            runtime_backend,
            runtime_binary: env.runtime_binary,
            log_file: env.log_file.map(PathBuf::from),
        })
    }

    /// How a replacement container is created. Publishes the same port the
    /// health probe connects to.
    pub fn run_spec(&self) -> RunSpec {
        RunSpec {
            image: self.image.clone(),
            name: self.container_name.clone(),
            ports: vec![PortMapping {
                host: self.port,
                container: self.port,
            }],
            env: self.container_env.clone(),
            restart_policy: self.restart_policy,
        }
    }

    pub fn notification_endpoint(&self) -> String {
        format!(
            "{}/api/mt5-restart-notification",
            self.trading_engine_url.as_str().trim_end_matches('/')
        )
    }
}

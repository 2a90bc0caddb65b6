use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use domain::services::{AnomalyConfig, PathLossModel, RetryPolicy, TrilaterationConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub trilateration: TrilaterationSettings,
    #[serde(default)]
    pub movement: MovementConfig,
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub anomaly: AnomalySettings,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub processors: ProcessorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Largest batch accepted by the observation ingest endpoint.
    #[serde(default = "default_max_ingest_batch")]
    pub max_ingest_batch: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn pool_config(&self) -> persistence::db::DatabaseConfig {
        persistence::db::DatabaseConfig {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            connect_timeout_secs: self.connect_timeout_secs,
            idle_timeout_secs: self.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Log-distance path-loss parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    #[serde(default = "default_reference_power")]
    pub reference_power_dbm: f64,

    #[serde(default = "default_reference_distance")]
    pub reference_distance_m: f64,

    #[serde(default = "default_path_loss_exponent")]
    pub path_loss_exponent: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            reference_power_dbm: default_reference_power(),
            reference_distance_m: default_reference_distance(),
            path_loss_exponent: default_path_loss_exponent(),
        }
    }
}

impl SignalConfig {
    pub fn model(&self) -> PathLossModel {
        PathLossModel {
            reference_power_dbm: self.reference_power_dbm,
            reference_distance_m: self.reference_distance_m,
            path_loss_exponent: self.path_loss_exponent,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrilaterationSettings {
    #[serde(default = "default_min_gateways")]
    pub min_gateways: usize,

    #[serde(default = "default_single_gateway_max_confidence")]
    pub single_gateway_max_confidence: f64,

    #[serde(default = "default_trilateration_min_confidence")]
    pub trilateration_min_confidence: f64,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default = "default_true")]
    pub constrain_to_hull: bool,
}

impl Default for TrilaterationSettings {
    fn default() -> Self {
        Self {
            min_gateways: default_min_gateways(),
            single_gateway_max_confidence: default_single_gateway_max_confidence(),
            trilateration_min_confidence: default_trilateration_min_confidence(),
            max_iterations: default_max_iterations(),
            constrain_to_hull: true,
        }
    }
}

impl TrilaterationSettings {
    pub fn engine_config(&self) -> TrilaterationConfig {
        TrilaterationConfig {
            min_gateways: self.min_gateways,
            single_gateway_max_confidence: self.single_gateway_max_confidence,
            trilateration_min_confidence: self.trilateration_min_confidence,
            max_iterations: self.max_iterations,
            constrain_to_hull: self.constrain_to_hull,
            ..TrilaterationConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MovementConfig {
    /// Previous estimates older than this are ignored.
    #[serde(default = "default_staleness")]
    pub staleness_secs: u64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            staleness_secs: default_staleness(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceConfig {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnomalySettings {
    /// Scores at or above this raise an alert.
    #[serde(default = "default_anomaly_threshold")]
    pub threshold: f64,

    /// Previous estimates kept per asset for scoring.
    #[serde(default = "default_history_len")]
    pub history_len: usize,

    #[serde(default = "default_max_speed")]
    pub max_speed_mps: f64,

    #[serde(default = "default_jump_distance")]
    pub jump_distance_m: f64,

    #[serde(default = "default_jump_window")]
    pub jump_window_secs: f64,

    #[serde(default = "default_confidence_drop")]
    pub confidence_drop: f64,

    #[serde(default = "default_max_rssi_variance")]
    pub max_rssi_variance: f64,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            threshold: default_anomaly_threshold(),
            history_len: default_history_len(),
            max_speed_mps: default_max_speed(),
            jump_distance_m: default_jump_distance(),
            jump_window_secs: default_jump_window(),
            confidence_drop: default_confidence_drop(),
            max_rssi_variance: default_max_rssi_variance(),
        }
    }
}

impl AnomalySettings {
    pub fn scorer_config(&self) -> AnomalyConfig {
        AnomalyConfig {
            max_speed_mps: self.max_speed_mps,
            jump_distance_m: self.jump_distance_m,
            jump_window_secs: self.jump_window_secs,
            confidence_drop: self.confidence_drop,
            max_rssi_variance: self.max_rssi_variance,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// One alert per (asset, alert type) within this window.
    #[serde(default = "default_throttle_window")]
    pub throttle_window_secs: u64,

    #[serde(default = "default_low_battery_threshold")]
    pub low_battery_threshold: i32,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            throttle_window_secs: default_throttle_window(),
            low_battery_threshold: default_low_battery_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorsConfig {
    /// Length of the per-asset sighting window, fractions allowed.
    #[serde(default = "default_estimation_window")]
    pub estimation_window_secs: f64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_poll_wait_ms")]
    pub poll_wait_ms: u64,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,

    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,

    /// Start every processor when the binary boots.
    #[serde(default = "default_true")]
    pub autostart: bool,
}

impl Default for ProcessorsConfig {
    fn default() -> Self {
        Self {
            estimation_window_secs: default_estimation_window(),
            batch_size: default_batch_size(),
            poll_wait_ms: default_poll_wait_ms(),
            stop_timeout_secs: default_stop_timeout(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_backoff_ms: default_retry_initial_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            autostart: true,
        }
    }
}

impl ProcessorsConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_ingest_batch() -> usize {
    1000
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_reference_power() -> f64 {
    -59.0
}

fn default_reference_distance() -> f64 {
    1.0
}

fn default_path_loss_exponent() -> f64 {
    2.0
}

fn default_min_gateways() -> usize {
    3
}

fn default_single_gateway_max_confidence() -> f64 {
    30.0
}

fn default_trilateration_min_confidence() -> f64 {
    40.0
}

fn default_max_iterations() -> usize {
    25
}

fn default_true() -> bool {
    true
}

fn default_staleness() -> u64 {
    600
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_anomaly_threshold() -> f64 {
    0.7
}

fn default_history_len() -> usize {
    10
}

fn default_max_speed() -> f64 {
    10.0
}

fn default_jump_distance() -> f64 {
    100.0
}

fn default_jump_window() -> f64 {
    10.0
}

fn default_confidence_drop() -> f64 {
    40.0
}

fn default_max_rssi_variance() -> f64 {
    150.0
}

fn default_throttle_window() -> u64 {
    300
}

fn default_low_battery_threshold() -> i32 {
    15
}

fn default_estimation_window() -> f64 {
    60.0
}

fn default_batch_size() -> usize {
    100
}

fn default_poll_wait_ms() -> u64 {
    500
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_initial_backoff_ms() -> u64 {
    100
}

fn default_retry_max_backoff_ms() -> u64 {
    5000
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with AT__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("AT").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Defaults are embedded so tests do not depend on the working directory.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30
            max_ingest_batch = 1000

            [database]
            url = ""
            max_connections = 20
            min_connections = 5
            connect_timeout_secs = 10
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "json"

            [signal]
            reference_power_dbm = -59.0
            reference_distance_m = 1.0
            path_loss_exponent = 2.0

            [trilateration]
            min_gateways = 3
            single_gateway_max_confidence = 30.0
            trilateration_min_confidence = 40.0

            [geofence]
            cache_ttl_secs = 3600

            [anomaly]
            threshold = 0.7

            [alerts]
            throttle_window_secs = 300
            low_battery_threshold = 15

            [processors]
            estimation_window_secs = 60.0
            batch_size = 100
            poll_wait_ms = 500
            stop_timeout_secs = 10
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        // Skip validation in tests to allow partial configs
        Ok(cfg)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "AT__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        self.signal
            .model()
            .validate()
            .map_err(|e| ConfigValidationError::InvalidValue(e.to_string()))?;

        self.trilateration
            .engine_config()
            .validate()
            .map_err(|e| ConfigValidationError::InvalidValue(e.to_string()))?;

        if !(0.0..=1.0).contains(&self.anomaly.threshold) {
            return Err(ConfigValidationError::InvalidValue(
                "anomaly.threshold must be between 0 and 1".to_string(),
            ));
        }

        if !(0..=100).contains(&self.alerts.low_battery_threshold) {
            return Err(ConfigValidationError::InvalidValue(
                "alerts.low_battery_threshold must be between 0 and 100".to_string(),
            ));
        }

        if self.alerts.throttle_window_secs == 0 || self.geofence.cache_ttl_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "alerts.throttle_window_secs and geofence.cache_ttl_secs must be positive"
                    .to_string(),
            ));
        }

        let processors = &self.processors;
        if !(processors.estimation_window_secs.is_finite()
            && processors.estimation_window_secs > 0.0)
        {
            return Err(ConfigValidationError::InvalidValue(
                "processors.estimation_window_secs must be positive".to_string(),
            ));
        }
        if processors.batch_size == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "processors.batch_size must be at least 1".to_string(),
            ));
        }
        if processors.retry_initial_backoff_ms > processors.retry_max_backoff_ms {
            return Err(ConfigValidationError::InvalidValue(
                "retry_initial_backoff_ms cannot exceed retry_max_backoff_ms".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

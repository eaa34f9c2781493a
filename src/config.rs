use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FfwardenConfig {
    pub process: ProcessConfig,
    pub buffers: BufferConfig,
    pub monitor: MonitorConfig,
    pub logs: LogConfig,
    pub query: QueryConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProcessConfig {
    /// Encoder binary name or absolute path
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Working directory holding the progress pipes and status files
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// Flag inserted after the binary to redirect progress reports
    #[serde(default = "default_progress_flag")]
    pub progress_flag: String,

    /// Upper bound for killing the encoder and joining reader tasks
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BufferConfig {
    /// Progress records kept in memory (100k is roughly 14 hours)
    #[serde(default = "default_buffer_capacity")]
    pub progress_capacity: usize,

    /// Output lines kept in memory
    #[serde(default = "default_buffer_capacity")]
    pub stdout_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorConfig {
    /// Delay between monitor ticks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before the first tick
    #[serde(default = "default_start_delay_secs")]
    pub start_delay_secs: u64,

    /// Enable fps/speed evaluation
    #[serde(default = "default_encoding_check")]
    pub encoding_check: bool,

    /// Grace period after process start before fps/speed are evaluated
    #[serde(default = "default_encoding_check_delay_secs")]
    pub encoding_check_delay_secs: u64,

    /// Speed under which encoding is considered failing
    #[serde(default = "default_min_speed")]
    pub min_speed: f64,

    /// Subtracted from a slow baseline speed to get a lenient floor
    #[serde(default = "default_delta_speed")]
    pub delta_speed: f64,

    /// Subtracted from the baseline fps to get the fps floor
    #[serde(default = "default_delta_fps")]
    pub delta_fps: f64,

    /// Floor used when the baseline fps is already below it
    #[serde(default = "default_min_base_fps")]
    pub min_base_fps: f64,

    /// How long both metrics may stay invalid before shutdown
    #[serde(default = "default_max_error_secs")]
    pub max_error_secs: u64,

    /// How long the output stream may stay silent before shutdown
    #[serde(default = "default_max_stdout_stuck_secs")]
    pub max_stdout_stuck_secs: u64,

    /// Age after which an unchanged progress record counts as invalid
    #[serde(default = "default_progress_stale_secs")]
    pub progress_stale_secs: u64,

    /// Treat a non-zero exit as a crash instead of waiting for the stuck check
    #[serde(default = "default_direct_exit_check")]
    pub direct_exit_check: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogConfig {
    /// Persist encoder output to rotating files
    #[serde(default = "default_file_log")]
    pub file_log: bool,

    /// Base directory for log files
    #[serde(default = "default_logs_path")]
    pub path: String,

    /// Rotation mode: "daily", "hourly", "minutely", "size" or "never"
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// Rotated files to keep; in size mode, the numbered backups
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// File size that triggers a rollover in size mode
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Delay between sink drains
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    /// Also write the wrapper's own log to the log directory
    #[serde(default = "default_wrapper_log")]
    pub wrapper_log: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueryConfig {
    /// Serve the HTTP status interface
    #[serde(default = "default_query_enabled")]
    pub enabled: bool,

    /// IP address to bind to
    #[serde(default = "default_query_host")]
    pub host: String,

    /// First port to try
    #[serde(default = "default_query_port")]
    pub port: u16,

    /// Ports tried after the configured one is busy
    #[serde(default = "default_port_search_limit")]
    pub port_search_limit: u16,

    /// Lines returned by log endpoints without a count parameter
    #[serde(default = "default_count")]
    pub default_count: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Optional container name used for the log directory
    #[serde(default)]
    pub container_name: Option<String>,

    /// Output lines printed when the wrapper exits
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
}

/// Encoder log rotation period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Minutely,
    Hourly,
    Daily,
    Size,
    Never,
}

impl FfwardenConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("ffwarden.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("process.binary", default_binary())?
            .set_default("process.workdir", default_workdir())?
            .set_default("process.progress_flag", default_progress_flag())?
            .set_default(
                "process.shutdown_timeout_secs",
                default_shutdown_timeout_secs() as i64,
            )?
            .set_default(
                "buffers.progress_capacity",
                default_buffer_capacity() as i64,
            )?
            .set_default("buffers.stdout_capacity", default_buffer_capacity() as i64)?
            .set_default("monitor.poll_interval_ms", default_poll_interval_ms() as i64)?
            .set_default("monitor.start_delay_secs", default_start_delay_secs() as i64)?
            .set_default("monitor.encoding_check", default_encoding_check())?
            .set_default(
                "monitor.encoding_check_delay_secs",
                default_encoding_check_delay_secs() as i64,
            )?
            .set_default("monitor.min_speed", default_min_speed())?
            .set_default("monitor.delta_speed", default_delta_speed())?
            .set_default("monitor.delta_fps", default_delta_fps())?
            .set_default("monitor.min_base_fps", default_min_base_fps())?
            .set_default("monitor.max_error_secs", default_max_error_secs() as i64)?
            .set_default(
                "monitor.max_stdout_stuck_secs",
                default_max_stdout_stuck_secs() as i64,
            )?
            .set_default("monitor.progress_stale_secs", default_progress_stale_secs() as i64)?
            .set_default("monitor.direct_exit_check", default_direct_exit_check())?
            .set_default("logs.file_log", default_file_log())?
            .set_default("logs.path", default_logs_path())?
            .set_default("logs.rotation", default_rotation())?
            .set_default("logs.max_files", default_max_files() as i64)?
            .set_default("logs.max_bytes", default_max_bytes() as i64)?
            .set_default("logs.drain_interval_ms", default_drain_interval_ms() as i64)?
            .set_default("logs.wrapper_log", default_wrapper_log())?
            .set_default("query.enabled", default_query_enabled())?
            .set_default("query.host", default_query_host())?
            .set_default("query.port", default_query_port() as i64)?
            .set_default("query.port_search_limit", default_port_search_limit() as i64)?
            .set_default("query.default_count", default_count())?
            .set_default("system.tail_lines", default_tail_lines() as i64)?
            .add_source(File::with_name(&path_str).required(false))
            // FFWARDEN_MONITOR__MIN_SPEED=0.5
            .add_source(
                Environment::with_prefix("FFWARDEN")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: FfwardenConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.process.binary.trim().is_empty() {
            return Err(ConfigError::Message(
                "Encoder binary must not be empty".to_string(),
            ));
        }

        if self.buffers.progress_capacity == 0 || self.buffers.stdout_capacity == 0 {
            return Err(ConfigError::Message(
                "Buffer capacities must be greater than 0".to_string(),
            ));
        }

        if self.monitor.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Monitor poll interval must be greater than 0".to_string(),
            ));
        }

        if self.monitor.min_speed < 0.0 || self.monitor.delta_speed < 0.0 {
            return Err(ConfigError::Message(
                "Speed thresholds must not be negative".to_string(),
            ));
        }

        if self.monitor.min_base_fps < 0.0 || self.monitor.delta_fps < 0.0 {
            return Err(ConfigError::Message(
                "Fps thresholds must not be negative".to_string(),
            ));
        }

        if self.logs.rotation()? == LogRotation::Size && self.logs.max_bytes == 0 {
            return Err(ConfigError::Message(
                "logs.max_bytes must be greater than 0 in size rotation".to_string(),
            ));
        }

        if self.logs.max_files == 0 {
            return Err(ConfigError::Message(
                "logs.max_files must be greater than 0".to_string(),
            ));
        }

        if self.logs.drain_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Log drain interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Directory holding the progress FIFOs
    pub fn pipes_dir(&self) -> PathBuf {
        Path::new(&self.process.workdir).join("pipes")
    }

    /// Directory holding one file per status field
    pub fn status_dir(&self) -> PathBuf {
        Path::new(&self.process.workdir).join("status")
    }

    /// Per-instance log directory, keyed by container name, container id or pid
    pub fn logs_dir(&self, container_id: &str, pid: u32) -> PathBuf {
        let suffix = match (&self.system.container_name, container_id) {
            (Some(name), _) if !name.is_empty() => name.clone(),
            (_, id) if !id.is_empty() => id.chars().take(13).collect(),
            _ => pid.to_string(),
        };
        Path::new(&self.logs.path).join(format!("ffwarden_{}", suffix))
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_secs)
    }

    pub fn encoding_check_delay(&self) -> Duration {
        Duration::from_secs(self.encoding_check_delay_secs)
    }

    pub fn max_error(&self) -> Duration {
        Duration::from_secs(self.max_error_secs)
    }

    pub fn max_stdout_stuck(&self) -> Duration {
        Duration::from_secs(self.max_stdout_stuck_secs)
    }

    pub fn progress_stale(&self) -> Duration {
        Duration::from_secs(self.progress_stale_secs)
    }
}

impl LogConfig {
    pub fn rotation(&self) -> Result<LogRotation, ConfigError> {
        match self.rotation.to_ascii_lowercase().as_str() {
            "minutely" => Ok(LogRotation::Minutely),
            "hourly" => Ok(LogRotation::Hourly),
            "daily" | "days" => Ok(LogRotation::Daily),
            "size" => Ok(LogRotation::Size),
            "never" => Ok(LogRotation::Never),
            other => Err(ConfigError::Message(format!(
                "Wrong logs.rotation value ({})",
                other
            ))),
        }
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }
}

impl Default for FfwardenConfig {
    fn default() -> Self {
        Self {
            process: ProcessConfig {
                binary: default_binary(),
                workdir: default_workdir(),
                progress_flag: default_progress_flag(),
                shutdown_timeout_secs: default_shutdown_timeout_secs(),
            },
            buffers: BufferConfig {
                progress_capacity: default_buffer_capacity(),
                stdout_capacity: default_buffer_capacity(),
            },
            monitor: MonitorConfig {
                poll_interval_ms: default_poll_interval_ms(),
                start_delay_secs: default_start_delay_secs(),
                encoding_check: default_encoding_check(),
                encoding_check_delay_secs: default_encoding_check_delay_secs(),
                min_speed: default_min_speed(),
                delta_speed: default_delta_speed(),
                delta_fps: default_delta_fps(),
                min_base_fps: default_min_base_fps(),
                max_error_secs: default_max_error_secs(),
                max_stdout_stuck_secs: default_max_stdout_stuck_secs(),
                progress_stale_secs: default_progress_stale_secs(),
                direct_exit_check: default_direct_exit_check(),
            },
            logs: LogConfig {
                file_log: default_file_log(),
                path: default_logs_path(),
                rotation: default_rotation(),
                max_files: default_max_files(),
                max_bytes: default_max_bytes(),
                drain_interval_ms: default_drain_interval_ms(),
                wrapper_log: default_wrapper_log(),
            },
            query: QueryConfig {
                enabled: default_query_enabled(),
                host: default_query_host(),
                port: default_query_port(),
                port_search_limit: default_port_search_limit(),
                default_count: default_count(),
            },
            system: SystemConfig {
                container_name: None,
                tail_lines: default_tail_lines(),
            },
        }
    }
}

// Default value functions
fn default_binary() -> String {
    "ffmpeg".to_string()
}
fn default_workdir() -> String {
    "/tmp/ffwarden".to_string()
}
fn default_progress_flag() -> String {
    "-progress".to_string()
}
fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_buffer_capacity() -> usize {
    100_000
}

fn default_poll_interval_ms() -> u64 {
    500
}
fn default_start_delay_secs() -> u64 {
    5
}
fn default_encoding_check() -> bool {
    true
}
fn default_encoding_check_delay_secs() -> u64 {
    55
}
fn default_min_speed() -> f64 {
    0.80
}
fn default_delta_speed() -> f64 {
    0.20
}
fn default_delta_fps() -> f64 {
    10.0
}
fn default_min_base_fps() -> f64 {
    14.0
}
fn default_max_error_secs() -> u64 {
    10
}
fn default_max_stdout_stuck_secs() -> u64 {
    15
}
fn default_progress_stale_secs() -> u64 {
    5
}
fn default_direct_exit_check() -> bool {
    true
}

fn default_file_log() -> bool {
    true
}
fn default_logs_path() -> String {
    "/var/log/ffmpeg".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_max_files() -> usize {
    3
}
fn default_max_bytes() -> u64 {
    25_000 * 1024
}
fn default_drain_interval_ms() -> u64 {
    500
}
fn default_wrapper_log() -> bool {
    false
}

fn default_query_enabled() -> bool {
    true
}
fn default_query_host() -> String {
    "0.0.0.0".to_string()
}
fn default_query_port() -> u16 {
    8080
}
fn default_port_search_limit() -> u16 {
    100
}
fn default_count() -> i64 {
    20
}

fn default_tail_lines() -> usize {
    100
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemorphError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = TelemorphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(TelemorphError::Config(format!("unknown log format: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub otlp_grpc_addr: String,
    pub otlp_http_addr: String,
    pub api_addr: String,
    pub grpc_enabled: bool,
    pub http_enabled: bool,
    pub retention_days: u32,
    pub retention_interval: Duration,
    pub write_batch_size: usize,
    pub write_channel_capacity: usize,
    pub query_timeout: Duration,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/telemorph.duckdb"),
            otlp_grpc_addr: "127.0.0.1:4317".to_string(),
            otlp_http_addr: "127.0.0.1:4318".to_string(),
            api_addr: "127.0.0.1:8080".to_string(),
            grpc_enabled: true,
            http_enabled: true,
            retention_days: 30,
            retention_interval: Duration::from_secs(60 * 60),
            write_batch_size: 1000,
            write_channel_capacity: 8192,
            query_timeout: Duration::from_secs(30),
            log_format: LogFormat::Compact,
        }
    }
}

impl Config {
    /// Defaults, then the config file (explicit path or the XDG location),
    /// then `TELEMORPH_*` environment variables.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = explicit_path
            .map(Path::to_path_buf)
            .unwrap_or_else(config_file_path);
        match load_file_overrides(&config_path)? {
            Some(file_overrides) => apply_overrides(&mut cfg, file_overrides, "config file")?,
            None if explicit_path.is_some() => {
                return Err(TelemorphError::Config(format!(
                    "config file not found: {}",
                    config_path.display()
                )));
            }
            None => {}
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention_days == 0 {
            return Err(TelemorphError::Config(
                "retention_days must be at least 1".to_string(),
            ));
        }
        if self.write_batch_size == 0 {
            return Err(TelemorphError::Config(
                "write_batch_size must be at least 1".to_string(),
            ));
        }
        if self.write_channel_capacity == 0 {
            return Err(TelemorphError::Config(
                "write_channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.retention_interval.is_zero() {
            return Err(TelemorphError::Config(
                "retention_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigOverrides {
    db_path: Option<PathBuf>,
    otlp_grpc_addr: Option<String>,
    otlp_http_addr: Option<String>,
    api_addr: Option<String>,
    grpc_enabled: Option<bool>,
    http_enabled: Option<bool>,
    retention_days: Option<u32>,
    retention_interval: Option<String>,
    write_batch_size: Option<usize>,
    write_channel_capacity: Option<usize>,
    query_timeout: Option<String>,
    log_format: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("TELEMORPH_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("telemorph/config.toml")
}

fn load_file_overrides(path: &Path) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| TelemorphError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| TelemorphError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn env_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| TelemorphError::Config(format!("bad {name} in environment: {e}"))),
        Err(_) => Ok(None),
    }
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        db_path: env::var("TELEMORPH_DB_PATH").ok().map(PathBuf::from),
        otlp_grpc_addr: env::var("TELEMORPH_OTLP_GRPC_ADDR").ok(),
        otlp_http_addr: env::var("TELEMORPH_OTLP_HTTP_ADDR").ok(),
        api_addr: env::var("TELEMORPH_API_ADDR").ok(),
        grpc_enabled: env_parsed("TELEMORPH_GRPC_ENABLED")?,
        http_enabled: env_parsed("TELEMORPH_HTTP_ENABLED")?,
        retention_days: env_parsed("TELEMORPH_RETENTION_DAYS")?,
        retention_interval: env::var("TELEMORPH_RETENTION_INTERVAL").ok(),
        write_batch_size: env_parsed("TELEMORPH_WRITE_BATCH_SIZE")?,
        write_channel_capacity: env_parsed("TELEMORPH_WRITE_CHANNEL_CAPACITY")?,
        query_timeout: env::var("TELEMORPH_QUERY_TIMEOUT").ok(),
        log_format: env::var("TELEMORPH_LOG_FORMAT").ok(),
    })
}

fn parse_duration_field(field: &str, value: &str, source: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| {
        TelemorphError::Config(format!("bad {field} in {source}: {e} (value={value})"))
    })
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.otlp_grpc_addr {
        cfg.otlp_grpc_addr = v;
    }
    if let Some(v) = overrides.otlp_http_addr {
        cfg.otlp_http_addr = v;
    }
    if let Some(v) = overrides.api_addr {
        cfg.api_addr = v;
    }
    if let Some(v) = overrides.grpc_enabled {
        cfg.grpc_enabled = v;
    }
    if let Some(v) = overrides.http_enabled {
        cfg.http_enabled = v;
    }
    if let Some(v) = overrides.retention_days {
        cfg.retention_days = v;
    }
    if let Some(v) = overrides.retention_interval {
        cfg.retention_interval = parse_duration_field("retention_interval", &v, source)?;
    }
    if let Some(v) = overrides.write_batch_size {
        cfg.write_batch_size = v;
    }
    if let Some(v) = overrides.write_channel_capacity {
        cfg.write_channel_capacity = v;
    }
    if let Some(v) = overrides.query_timeout {
        cfg.query_timeout = parse_duration_field("query_timeout", &v, source)?;
    }
    if let Some(v) = overrides.log_format {
        cfg.log_format = v
            .parse()
            .map_err(|e| TelemorphError::Config(format!("bad log_format in {source}: {e}")))?;
    }
    Ok(())
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use atlas::{CityEntry, ClusterOptions};
use serde::{Deserialize, Serialize};

use crate::explorer::ExplorerOptions;
use crate::ingest::AdmissionPolicy;
use crate::markers::MarkerOptions;

pub const CONFIG_VERSION: u32 = 2;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_STREAM_ENDPOINT: &str = "https://map.deejay.tools/stream";
const DEFAULT_SOURCE_URL: &str = "https://verraco.bandcamp.com/album/breathe-godspeed";
const DEFAULT_USER_AGENT: &str = "cratemap/0.1";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub version: u32,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<String>,
    pub stream_endpoint: String,
    pub default_source_url: String,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub title_timeout_secs: u64,
    pub max_frame_bytes: usize,
    pub per_source_cap: usize,
    pub admit_probability: f64,
    pub quiet_period_secs: u64,
    pub settle_delay_ms: u64,
    pub cluster_radius_px: f64,
    pub cluster_max_zoom: u8,
    pub focus_zoom: f64,
    pub initial_zoom: f64,
    pub event_buffer: usize,
    pub command_buffer: usize,
    pub extra_cities: Vec<CityEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            port: DEFAULT_PORT,
            bind_addr: None,
            stream_endpoint: DEFAULT_STREAM_ENDPOINT.to_string(),
            default_source_url: DEFAULT_SOURCE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout_secs: 10,
            title_timeout_secs: 8,
            max_frame_bytes: 1 << 20,
            per_source_cap: 20,
            admit_probability: 0.9,
            quiet_period_secs: 30,
            settle_delay_ms: 1000,
            cluster_radius_px: 30.0,
            cluster_max_zoom: 16,
            focus_zoom: 10.0,
            initial_zoom: 2.0,
            event_buffer: 256,
            command_buffer: 64,
            extra_cities: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn explorer_options(&self) -> ExplorerOptions {
        ExplorerOptions {
            admission: AdmissionPolicy {
                per_source_cap: self.per_source_cap,
                admit_probability: self.admit_probability,
            },
            quiet_period: Duration::from_secs(self.quiet_period_secs),
            markers: MarkerOptions {
                cluster: ClusterOptions {
                    radius_px: self.cluster_radius_px,
                    max_zoom: self.cluster_max_zoom,
                },
                focus_zoom: self.focus_zoom,
                settle_delay: Duration::from_millis(self.settle_delay_ms),
            },
            initial_zoom: self.initial_zoom,
        }
    }

    /// Replaces unusable values with defaults.
    fn normalize(&mut self) {
        let defaults = ServerConfig::default();
        if self.version < CONFIG_VERSION {
            self.version = CONFIG_VERSION;
        }
        if self.port == 0 {
            if let Some(port) = self.bind_addr.as_deref().and_then(parse_port) {
                self.port = port;
            }
            if self.port == 0 {
                self.port = DEFAULT_PORT;
            }
        }
        self.bind_addr = None;
        if self.stream_endpoint.trim().is_empty() {
            self.stream_endpoint = defaults.stream_endpoint;
        }
        if self.default_source_url.trim().is_empty() {
            self.default_source_url = defaults.default_source_url;
        }
        if self.user_agent.trim().is_empty() {
            self.user_agent = defaults.user_agent;
        }
        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = defaults.connect_timeout_secs;
        }
        if self.title_timeout_secs == 0 {
            self.title_timeout_secs = defaults.title_timeout_secs;
        }
        if self.max_frame_bytes == 0 {
            self.max_frame_bytes = defaults.max_frame_bytes;
        }
        if self.per_source_cap == 0 {
            self.per_source_cap = defaults.per_source_cap;
        }
        if !self.admit_probability.is_finite() || self.admit_probability <= 0.0 {
            self.admit_probability = defaults.admit_probability;
        }
        self.admit_probability = self.admit_probability.min(1.0);
        if self.quiet_period_secs == 0 {
            self.quiet_period_secs = defaults.quiet_period_secs;
        }
        if !self.cluster_radius_px.is_finite() || self.cluster_radius_px <= 0.0 {
            self.cluster_radius_px = defaults.cluster_radius_px;
        }
        if self.cluster_max_zoom == 0 {
            self.cluster_max_zoom = defaults.cluster_max_zoom;
        }
        if !self.focus_zoom.is_finite() || self.focus_zoom <= 0.0 {
            self.focus_zoom = defaults.focus_zoom;
        }
        if !self.initial_zoom.is_finite() || self.initial_zoom < 0.0 {
            self.initial_zoom = defaults.initial_zoom;
        }
        if self.event_buffer == 0 {
            self.event_buffer = defaults.event_buffer;
        }
        if self.command_buffer == 0 {
            self.command_buffer = defaults.command_buffer;
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("CRATEMAP_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ServerConfig = if contents.trim().is_empty() {
            ServerConfig::default()
        } else {
            serde_yaml::from_str(&contents)?
        };
        config.normalize();
        return Ok((config, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

fn parse_port(value: &str) -> Option<u16> {
    let port = value.rsplit(':').next()?.trim();
    port.parse::<u16>().ok()
}

use crate::directory::DEFAULT_ENDPOINT;
use crate::metadata::PollSettings;
use crate::station::Station;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR: &str = "tag-radio";

/// Settings read from `config.toml`. Every field has a default and the file
/// is optional; the program never writes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub default_station: DefaultStationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound for a single title poll.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultStationConfig {
    #[serde(default = "default_station_name")]
    pub name: String,
    #[serde(default = "default_station_url")]
    pub url: String,
    #[serde(default = "default_station_tags")]
    pub tags: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            cache_file: default_cache_file(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for DefaultStationConfig {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            url: default_station_url(),
            tags: default_station_tags(),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_cache_file() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("stations.json")
}

fn default_poll_interval() -> u64 {
    7
}

fn default_request_timeout() -> u64 {
    5
}

fn default_user_agent() -> String {
    format!("tag_radio_tui/{}", env!("CARGO_PKG_VERSION"))
}

fn default_http_timeout() -> u64 {
    60
}

fn default_station_name() -> String {
    "12 punks (default)".to_string()
}

fn default_station_url() -> String {
    "https://rautemusik-de-hz-fal-stream15.radiohost.de/12punks?ref=radiobrowser".to_string()
}

fn default_station_tags() -> String {
    "punk".to_string()
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Loads the config file, falling back to defaults when it does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            every: Duration::from_secs(self.metadata.poll_interval_secs.max(1)),
            timeout: Duration::from_secs(self.metadata.request_timeout_secs.max(1)),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn default_station(&self) -> Station {
        let s = &self.default_station;
        Station::new(s.name.clone(), s.url.clone(), s.tags.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.directory.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.metadata.poll_interval_secs, 7);
        assert!(config.directory.cache_file.ends_with("stations.json"));
        assert_eq!(config.default_station().tags, "punk");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [metadata]
            poll_interval_secs = 15

            [default_station]
            name = "Jazz"
            url = "http://jazz.example/stream"
            "#,
        )
        .unwrap();

        assert_eq!(config.poll_settings().every, Duration::from_secs(15));
        assert_eq!(config.poll_settings().timeout, Duration::from_secs(5));
        let station = config.default_station();
        assert_eq!(station.name, "Jazz");
        assert_eq!(station.tags, "punk");
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::from_toml("[metadata\npoll_interval_secs = ").is_err());
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub globe: GlobeConfig,
}

/// radio-browser request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Mirror base URLs; one is picked at random per fetch.
    #[serde(default = "default_mirrors")]
    pub mirrors: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_true")]
    pub hide_broken: bool,
    #[serde(default = "default_order")]
    pub order: String,
    /// Descending when true.
    #[serde(default = "default_true")]
    pub reverse: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobeConfig {
    #[serde(default = "default_globe_radius")]
    pub radius: f64,
    #[serde(default = "default_marker_radius")]
    pub marker_radius: f64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            mirrors: default_mirrors(),
            limit: default_limit(),
            hide_broken: true,
            order: default_order(),
            reverse: true,
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

impl Default for GlobeConfig {
    fn default() -> Self {
        Self {
            radius: default_globe_radius(),
            marker_radius: default_marker_radius(),
        }
    }
}

fn default_mirrors() -> Vec<String> {
    vec![
        "https://de1.api.radio-browser.info".to_string(),
        "https://de2.api.radio-browser.info".to_string(),
        "https://fi1.api.radio-browser.info".to_string(),
    ]
}

fn default_limit() -> u32 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_order() -> String {
    "votes".to_string()
}

fn default_user_agent() -> String {
    format!("radio-globe/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_volume() -> f32 {
    crate::playback::DEFAULT_VOLUME
}

fn default_globe_radius() -> f64 {
    crate::geo::GLOBE_RADIUS
}

fn default_marker_radius() -> f64 {
    crate::geo::MARKER_RADIUS
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.directory.limit, 1000);
        assert!(config.directory.hide_broken);
        assert!(config.directory.reverse);
        assert_eq!(config.directory.order, "votes");
        assert!(config.directory.mirrors.iter().all(|m| m.starts_with("https://")));
        assert_eq!(config.playback.default_volume, 0.7);
        assert_eq!(config.globe.marker_radius, 2.05);
        assert!(Config::config_path().ends_with("radio-globe/config.toml"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [directory]
            limit = 50
            mirrors = ["http://localhost:9000"]

            [playback]
            default_volume = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(config.directory.limit, 50);
        assert_eq!(config.directory.mirrors, vec!["http://localhost:9000"]);
        assert_eq!(config.directory.order, "votes");
        assert_eq!(config.playback.default_volume, 0.25);
        assert_eq!(config.http.port, 8990);
    }

    #[test]
    fn test_round_trip_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back = Config::from_toml_str(&text).unwrap();
        assert_eq!(back.directory.mirrors, Config::default().directory.mirrors);
    }
}

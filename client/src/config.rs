use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};
use url::Url;

use crate::channel::ChannelOptions;
use crate::constants::{
    DEFAULT_HTTP_SERVER, DEFAULT_WS_SERVER, HTTP_SERVER_ENV, WEBSOCKET_SERVER_ENV,
};

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub websocket_server: Url,
    pub http_server: Url,
    pub keepalive_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

/// On-disk overrides; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    websocket_server: Option<String>,
    http_server: Option<String>,
    keepalive_secs: Option<u64>,
    reconnect_base_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
}

impl ClientConfig {
    /// Built-in values pointing at a relay on localhost.
    pub fn defaults() -> Result<Self> {
        let options = ChannelOptions::default();
        Ok(Self {
            websocket_server: parse_server(DEFAULT_WS_SERVER)?,
            http_server: parse_server(DEFAULT_HTTP_SERVER)?,
            keepalive_interval: options.keepalive_interval,
            reconnect_base_delay: options.reconnect_base_delay,
            reconnect_max_delay: options.reconnect_max_delay,
        })
    }

    /// Defaults, then `config.toml` from the data directory, then environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::defaults()?;
        if let Some(path) = config_path().filter(|p| p.exists()) {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            config
                .apply_toml(&raw)
                .with_context(|| format!("Invalid config file {}", path.display()))?;
            tracing::debug!("Loaded config from {}", path.display());
        }
        config.apply_env()?;
        Ok(config)
    }

    fn apply_toml(&mut self, raw: &str) -> Result<()> {
        let file: FileConfig = toml::from_str(raw)?;
        if let Some(server) = file.websocket_server {
            self.websocket_server = parse_server(&server)?;
        }
        if let Some(server) = file.http_server {
            self.http_server = parse_server(&server)?;
        }
        if let Some(secs) = file.keepalive_secs {
            self.keepalive_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = file.reconnect_base_ms {
            self.reconnect_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.reconnect_max_ms {
            self.reconnect_max_delay = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(server) = env::var(WEBSOCKET_SERVER_ENV) {
            self.websocket_server =
                parse_server(&server).with_context(|| format!("Invalid {WEBSOCKET_SERVER_ENV}"))?;
        }
        if let Ok(server) = env::var(HTTP_SERVER_ENV) {
            self.http_server =
                parse_server(&server).with_context(|| format!("Invalid {HTTP_SERVER_ENV}"))?;
        }
        Ok(())
    }

    pub fn with_websocket_server(mut self, server: &str) -> Result<Self> {
        self.websocket_server = parse_server(server)?;
        Ok(self)
    }

    pub fn with_http_server(mut self, server: &str) -> Result<Self> {
        self.http_server = parse_server(server)?;
        Ok(self)
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            keepalive_interval: self.keepalive_interval,
            reconnect_base_delay: self.reconnect_base_delay,
            reconnect_max_delay: self.reconnect_max_delay,
        }
    }

    /// Websocket endpoint of one room.
    pub fn room_endpoint(&self, room_id: &str) -> Result<Url, url::ParseError> {
        self.websocket_server.join(&urlencoding::encode(room_id))
    }
}

/// Parses a server base URL, forcing a trailing slash so room paths join
/// beneath it instead of replacing its last segment.
fn parse_server(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim()).with_context(|| format!("Invalid server URL {raw}"))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Check if the app is running in portable mode
pub fn is_portable_mode() -> bool {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("portable.txt").exists()))
        .unwrap_or(false)
}

/// Get the data directory path
pub fn get_data_directory() -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let exe_dir = exe_path.parent()?;

    // Check for portable marker file
    if exe_dir.join("portable.txt").exists() {
        return Some(exe_dir.join("data"));
    }

    ProjectDirs::from("com", "syncroom", "SyncRoom").map(|dirs| dirs.config_dir().to_path_buf())
}

fn config_path() -> Option<PathBuf> {
    get_data_directory().map(|dir| dir.join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_relay() {
        let config = ClientConfig::defaults().unwrap();
        assert_eq!(config.websocket_server.as_str(), "ws://localhost:3005/");
        assert_eq!(config.http_server.as_str(), "http://localhost:3005/");
        assert_eq!(config.keepalive_interval, Duration::from_secs(15));
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let mut config = ClientConfig::defaults().unwrap();
        config
            .apply_toml(
                r#"
                websocket_server = "wss://relay.example.com/rooms"
                keepalive_secs = 20
                reconnect_max_ms = 5000
                "#,
            )
            .unwrap();
        assert_eq!(config.websocket_server.as_str(), "wss://relay.example.com/rooms/");
        assert_eq!(config.http_server.as_str(), "http://localhost:3005/");
        assert_eq!(config.keepalive_interval, Duration::from_secs(20));
        assert_eq!(config.reconnect_max_delay, Duration::from_millis(5000));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut config = ClientConfig::defaults().unwrap();
        assert!(config.apply_toml("websocket = \"ws://x/\"").is_err());
    }

    #[test]
    fn room_endpoint_nests_under_server_path() {
        let config = ClientConfig::defaults().unwrap()
            .with_websocket_server("wss://relay.example.com/rooms")
            .unwrap();
        assert_eq!(
            config.room_endpoint("Ab3_x9").unwrap().as_str(),
            "wss://relay.example.com/rooms/Ab3_x9"
        );
    }
}

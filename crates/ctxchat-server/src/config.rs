//! Server configuration: TOML file + CLI overrides.

use crate::transport::websocket::MAX_WS_FRAME_SIZE;
use ctxchat_core::{ChatError, ChatResult, ProtocolVersion};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub chat: ChatSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// `[chat]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatSection {
    #[serde(default)]
    pub protocol: ProtocolVersion,
}

/// `[logging]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub debug: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9000
}
fn default_max_frame_size() -> usize {
    MAX_WS_FRAME_SIZE
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_frame_size: usize,
    pub protocol: ProtocolVersion,
    pub debug: bool,
    /// File the settings were read from, if one existed.
    pub source: Option<PathBuf>,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_host: Option<&str>,
        cli_port: Option<u16>,
        cli_protocol: Option<ProtocolVersion>,
        cli_debug: bool,
    ) -> ChatResult<Self> {
        let (file_config, source) = match config_path.map(expand_tilde) {
            Some(expanded) if expanded.exists() => {
                let content = std::fs::read_to_string(&expanded)?;
                let parsed = toml::from_str::<ConfigFile>(&content).map_err(|e| {
                    ChatError::Config(format!("{}: {e}", expanded.display()))
                })?;
                (parsed, Some(expanded))
            }
            _ => (ConfigFile::default(), None),
        };

        Ok(Self {
            host: cli_host
                .map(|s| s.to_string())
                .unwrap_or(file_config.server.host),
            port: cli_port.unwrap_or(file_config.server.port),
            max_frame_size: file_config.server.max_frame_size,
            protocol: cli_protocol.unwrap_or(file_config.chat.protocol),
            debug: cli_debug || file_config.logging.debug,
            source,
        })
    }

    /// Address the WebSocket listener binds to.
    pub fn bind_addr(&self) -> ChatResult<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|e| ChatError::Config(format!("invalid host {}: {e}", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let file = ConfigFile::default();
        Self {
            host: file.server.host,
            port: file.server.port,
            max_frame_size: file.server.max_frame_size,
            protocol: file.chat.protocol,
            debug: file.logging.debug,
            source: None,
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config =
            ServerConfig::load(Some(Path::new("/nonexistent/ctxchat.toml")), None, None, None, false)
                .unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.protocol, ProtocolVersion::V2);
        assert_eq!(config.max_frame_size, MAX_WS_FRAME_SIZE);
        assert!(!config.debug);
        assert!(config.source.is_none());
    }

    #[test]
    fn file_values_are_read() {
        let file = write_config(
            r#"
            [server]
            host = "0.0.0.0"
            port = 9100
            max_frame_size = 4096

            [chat]
            protocol = "v1"

            [logging]
            debug = true
            "#,
        );
        let config = ServerConfig::load(Some(file.path()), None, None, None, false).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9100);
        assert_eq!(config.max_frame_size, 4096);
        assert_eq!(config.protocol, ProtocolVersion::V1);
        assert!(config.debug);
        assert_eq!(config.source.as_deref(), Some(file.path()));
    }

    #[test]
    fn cli_overrides_file() {
        let file = write_config("[server]\nport = 9100\n[chat]\nprotocol = \"v1\"\n");
        let config = ServerConfig::load(
            Some(file.path()),
            Some("::1"),
            Some(7000),
            Some(ProtocolVersion::Unversioned),
            true,
        )
        .unwrap();
        assert_eq!(config.host, "::1");
        assert_eq!(config.port, 7000);
        assert_eq!(config.protocol, ProtocolVersion::Unversioned);
        assert!(config.debug);
        assert_eq!(config.bind_addr().unwrap(), "[::1]:7000".parse().unwrap());
    }

    #[test]
    fn invalid_file_is_a_config_error() {
        let file = write_config("[chat]\nprotocol = \"v9\"\n");
        let err = ServerConfig::load(Some(file.path()), None, None, None, false).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn bind_addr_parses_host_and_port() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr().unwrap(), "127.0.0.1:9000".parse().unwrap());

        let bad = ServerConfig {
            host: "not a host".into(),
            ..ServerConfig::default()
        };
        assert!(matches!(bad.bind_addr(), Err(ChatError::Config(_))));
    }
}

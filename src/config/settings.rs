//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.
//! Every section is optional; missing fields take their defaults.

use std::net::SocketAddr;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mcp::protocol::{MCP_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Client settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_addr("server.listen", &self.server.listen)?;
        validate_addr("client.connect", &self.client.connect)?;

        if self.server.name.trim().is_empty() {
            return Err(invalid("server.name must not be empty".to_string()));
        }

        if self.client.request_timeout_secs == 0 {
            return Err(invalid(
                "client.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&self.client.protocol_version.as_str()) {
            return Err(invalid(format!(
                "Unsupported protocol version '{}'. Must be one of: {}",
                self.client.protocol_version,
                SUPPORTED_PROTOCOL_VERSIONS.join(", ")
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }
}

const fn invalid(message: String) -> ConfigError {
    ConfigError::ValidationError { message }
}

fn validate_addr(field: &str, value: &str) -> Result<(), ConfigError> {
    value
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|e| invalid(format!("{field} '{value}' is not a socket address: {e}")))
}

/// Transport a server listens on or a client dials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-framed envelopes over TCP.
    #[default]
    Tcp,
    /// HTTP: `GET /sse` event stream plus `POST /messages`.
    Sse,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the listener binds to.
    #[serde(default = "default_addr")]
    pub listen: String,

    /// Transport served on `listen`.
    #[serde(default)]
    pub transport: TransportKind,

    /// Server name reported during initialisation.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Usage hints returned to clients during initialisation.
    #[serde(default = "default_instructions")]
    pub instructions: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_addr(),
            transport: TransportKind::default(),
            name: default_server_name(),
            instructions: default_instructions(),
        }
    }
}

fn default_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_server_name() -> String {
    "SimpleMCPServer".to_string()
}

fn default_instructions() -> Option<String> {
    Some("A simple MCP server with basic tools and resources.".to_string())
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Address of the server to dial.
    #[serde(default = "default_addr")]
    pub connect: String,

    /// Transport used to reach `connect`.
    #[serde(default)]
    pub transport: TransportKind,

    /// Seconds a call waits for its response.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Protocol version requested during initialisation.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect: default_addr(),
            transport: TransportKind::default(),
            request_timeout_secs: default_request_timeout(),
            protocol_version: default_protocol_version(),
        }
    }
}

const fn default_request_timeout() -> u64 {
    30
}

fn default_protocol_version() -> String {
    MCP_PROTOCOL_VERSION.to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r"{}";
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.listen, "127.0.0.1:8000");
        assert_eq!(config.server.name, "SimpleMCPServer");
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "server": {
                "listen": "0.0.0.0:9000",
                "name": "TestServer",
                "instructions": "Be nice."
            },
            "client": {
                "connect": "10.0.0.2:9000",
                "request_timeout_secs": 5,
                "protocol_version": "2024-11-05"
            },
            "logging": {
                "level": "debug"
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.name, "TestServer");
        assert_eq!(config.server.instructions.as_deref(), Some("Be nice."));
        assert_eq!(config.client.connect, "10.0.0.2:9000");
        assert_eq!(config.client.request_timeout_secs, 5);
        assert_eq!(config.client.protocol_version, "2024-11-05");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn transport_defaults_to_tcp() {
        let config: Config = serde_json::from_str(r#"{ "server": { "transport": "sse" } }"#).unwrap();
        assert_eq!(config.server.transport, TransportKind::Sse);
        assert_eq!(config.client.transport, TransportKind::Tcp);

        let bad = serde_json::from_str::<Config>(r#"{ "client": { "transport": "carrier-pigeon" } }"#);
        assert!(bad.is_err());
    }

    #[test]
    fn client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect, "127.0.0.1:8000");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.protocol_version, MCP_PROTOCOL_VERSION);
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
    }

    #[test]
    fn reject_bad_listen_address() {
        let json = r#"{ "server": { "listen": "localhost" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_zero_timeout() {
        let json = r#"{ "client": { "request_timeout_secs": 0 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unsupported_protocol_version() {
        let json = r#"{ "client": { "protocol_version": "2023-01-01" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("validation failed"));
    }

    #[test]
    fn reject_unknown_log_level() {
        let json = r#"{ "logging": { "level": "loud" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{
            "unknown_field": "value"
        }"#;

        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());

        let json = r#"{ "server": { "port": 8000 } }"#;
        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}

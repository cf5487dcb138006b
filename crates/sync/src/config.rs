//! TOML config file loading and validation for the store connection.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "plant-sync".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.store.host.trim().is_empty() {
            errors.push("store.host is empty".to_string());
        }
        if self.store.port == 0 {
            errors.push("store.port must be non-zero".to_string());
        }
        if self.store.client_id.trim().is_empty() {
            errors.push("store.client_id is empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.store.host, "127.0.0.1");
        assert_eq!(config.store.port, 1883);
        assert_eq!(config.store.client_id, "plant-sync");
        config.validate().unwrap();
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[store]
host = "broker.lan"
port = 8883
client_id = "greenhouse-1"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.host, "broker.lan");
        assert_eq!(config.store.port, 8883);
        assert_eq!(config.store.client_id, "greenhouse-1");
        config.validate().unwrap();
    }

    #[test]
    fn partial_store_section_keeps_other_defaults() {
        let config: Config = toml::from_str("[store]\nhost = \"10.0.0.5\"\n").unwrap();
        assert_eq!(config.store.host, "10.0.0.5");
        assert_eq!(config.store.port, 1883);
    }

    #[test]
    fn empty_host_rejected() {
        let mut config = Config::default();
        config.store.host = "  ".to_string();
        assert_validation_err(&config, "store.host is empty");
    }

    #[test]
    fn zero_port_rejected() {
        let mut config = Config::default();
        config.store.port = 0;
        assert_validation_err(&config, "store.port must be non-zero");
    }

    #[test]
    fn empty_client_id_rejected() {
        let mut config = Config::default();
        config.store.client_id = String::new();
        assert_validation_err(&config, "store.client_id is empty");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut config = Config::default();
        config.store.host = String::new();
        config.store.port = 0;
        config.store.client_id = String::new();

        let err = config.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("3 errors"), "got: {msg}");
        assert!(msg.contains("store.host"), "got: {msg}");
        assert!(msg.contains("store.port"), "got: {msg}");
        assert!(msg.contains("store.client_id"), "got: {msg}");
    }
}

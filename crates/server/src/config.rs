//! Bridge configuration management

use crate::session::DEFAULT_BASE_SESSION_ID;
use crate::usb::PermissionPolicy;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub permission: PermissionSettings,
    #[serde(default)]
    pub sessions: SessionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID allow-list; empty exposes every device
    #[serde(default)]
    pub filters: Vec<String>,
    /// Timeout of one libusb event-loop iteration in milliseconds
    #[serde(default = "UsbSettings::default_event_poll_ms")]
    pub event_poll_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            event_poll_ms: Self::default_event_poll_ms(),
        }
    }
}

impl UsbSettings {
    fn default_event_poll_ms() -> u64 {
        100
    }

    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(self.event_poll_ms)
    }
}

/// Answer given to permission prompts for devices not pre-approved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptAnswer {
    #[default]
    Deny,
    Grant,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionSettings {
    /// VID:PID patterns granted without prompting
    #[serde(default)]
    pub approved_devices: Vec<String>,
    #[serde(default)]
    pub prompt: PromptAnswer,
}

impl PermissionSettings {
    pub fn policy(&self) -> PermissionPolicy {
        PermissionPolicy {
            approved: self.approved_devices.clone(),
            grant_unapproved: self.prompt == PromptAnswer::Grant,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// First session id handed out
    #[serde(default = "SessionSettings::default_base_id")]
    pub base_id: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            base_id: Self::default_base_id(),
        }
    }
}

impl SessionSettings {
    fn default_base_id() -> u32 {
        DEFAULT_BASE_SESSION_ID
    }
}

impl BridgeConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path, the standard locations are tried in order.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-serial-bridge/bridge.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: BridgeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-serial-bridge").join("bridge.toml")
        } else {
            PathBuf::from(".config/usb-serial-bridge/bridge.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        for filter in self
            .usb
            .filters
            .iter()
            .chain(&self.permission.approved_devices)
        {
            Self::validate_filter(filter)?;
        }

        if self.usb.event_poll_ms == 0 {
            return Err(anyhow!("usb.event_poll_ms must be greater than 0"));
        }

        if self.sessions.base_id == 0 {
            return Err(anyhow!("sessions.base_id must be greater than 0"));
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    pub fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x0403:0x6001' or '0x0403:*')",
                filter
            ));
        }

        let (vid, pid) = (parts[0], parts[1]);

        if vid != "*" {
            Self::validate_hex_id(vid, "VID")?;
        }

        if pid != "*" {
            Self::validate_hex_id(pid, "PID")?;
        }

        Ok(())
    }

    /// Validate a hex ID (VID or PID)
    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x0403')",
                name,
                id
            ));
        };

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}

/// Expand `~` in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(raw) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.usb.event_poll_ms, 100);
        assert_eq!(config.sessions.base_id, 100);
        assert_eq!(config.permission.prompt, PromptAnswer::Deny);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_filter_valid() {
        assert!(BridgeConfig::validate_filter("0x1234:0x5678").is_ok());
        assert!(BridgeConfig::validate_filter("0x1234:*").is_ok());
        assert!(BridgeConfig::validate_filter("*:0x5678").is_ok());
        assert!(BridgeConfig::validate_filter("*:*").is_ok());
        assert!(BridgeConfig::validate_filter("0xABCD:0xEF01").is_ok());
    }

    #[test]
    fn test_validate_filter_invalid() {
        assert!(BridgeConfig::validate_filter("1234:5678").is_err());
        assert!(BridgeConfig::validate_filter("0x1234").is_err());
        assert!(BridgeConfig::validate_filter("0x1234:0x5678:0x9abc").is_err());
        assert!(BridgeConfig::validate_filter("0xGHIJ:0x5678").is_err());
        assert!(BridgeConfig::validate_filter("0x12345:0x5678").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_base_id() {
        let mut config = BridgeConfig::default();
        config.sessions.base_id = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_approved_devices() {
        let mut config = BridgeConfig::default();
        config.permission.approved_devices = vec!["ftdi".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = PermissionSettings {
            approved_devices: vec!["0x0403:*".to_string()],
            prompt: PromptAnswer::Grant,
        };
        let policy = settings.policy();
        assert_eq!(policy.approved, vec!["0x0403:*".to_string()]);
        assert!(policy.grant_unapproved);
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path(Path::new("~/bridge.toml"));
        assert!(!expanded.to_string_lossy().starts_with('~') || dirs::home_dir().is_none());
    }
}

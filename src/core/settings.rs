use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub autostart: AutostartMode,
    pub source: SourceSettings,
    pub refresh: RefreshSettings,
    pub idle: IdleSettings,
    pub multi_idle: MultiIdleSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            autostart: AutostartMode::None,
            source: SourceSettings::default(),
            refresh: RefreshSettings::default(),
            idle: IdleSettings::default(),
            multi_idle: MultiIdleSettings::default(),
        }
    }
}

/// What to start automatically once the first snapshot arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutostartMode {
    None,
    Idle,
    MultiIdle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Endpoint of the remote library service returning the app list.
    pub endpoint: String,
    /// Optional bearer token for the endpoint.
    pub token: Option<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    /// Poll cadence while no session is running.
    pub default_secs: u64,
    /// Slower cadence while an idle session is active.
    pub idling_secs: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            default_secs: 300,
            idling_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleSettings {
    /// Simulated-play delay between drop checks while more than one drop
    /// remains.
    pub tick_secs: u64,
    /// Shorter delay once an app is down to its last drop.
    pub final_tick_secs: u64,
}

impl Default for IdleSettings {
    fn default() -> Self {
        Self {
            tick_secs: 900,
            final_tick_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiIdleSettings {
    /// Minimum number of refund-eligible apps required to start multi-idle.
    pub threshold: usize,
}

impl Default for MultiIdleSettings {
    fn default() -> Self {
        Self { threshold: 2 }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("card-idler").join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path().context("Could not determine config directory")?;

        if !path.exists() {
            tracing::info!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!(?path, "Loaded config");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.endpoint.is_empty() {
            anyhow::bail!("source.endpoint must be set");
        }
        if self.refresh.default_secs == 0 || self.refresh.idling_secs == 0 {
            anyhow::bail!("refresh intervals must be non-zero");
        }
        if self.idle.tick_secs == 0 || self.idle.final_tick_secs == 0 {
            anyhow::bail!("idle tick intervals must be non-zero");
        }
        if self.multi_idle.threshold == 0 {
            anyhow::bail!(
                "multi_idle.threshold must be at least 1, got {}",
                self.multi_idle.threshold
            );
        }
        Ok(())
    }

    pub fn default_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.default_secs)
    }

    pub fn idling_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.idling_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.autostart, AutostartMode::None);
        assert!(settings.source.endpoint.is_empty());
        assert_eq!(settings.refresh.default_secs, 300);
        assert_eq!(settings.refresh.idling_secs, 900);
        assert_eq!(settings.idle.tick_secs, 900);
        assert_eq!(settings.idle.final_tick_secs, 300);
        assert_eq!(settings.multi_idle.threshold, 2);
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        // Default endpoint is empty, so the daemon refuses to start with it
        assert!(settings.validate().is_err());

        settings.source.endpoint = "https://library.example.com/badges".to_string();
        assert!(settings.validate().is_ok());

        settings.multi_idle.threshold = 0;
        assert!(settings.validate().is_err());

        settings.multi_idle.threshold = 2;
        settings.refresh.default_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            autostart = "multi-idle"

            [source]
            endpoint = "https://library.example.com/badges"
            token = "s3cret"

            [refresh]
            default_secs = 120
            idling_secs = 600

            [idle]
            tick_secs = 450
            final_tick_secs = 90

            [multi_idle]
            threshold = 3
        "#;

        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.autostart, AutostartMode::MultiIdle);
        assert_eq!(settings.source.endpoint, "https://library.example.com/badges");
        assert_eq!(settings.source.token.as_deref(), Some("s3cret"));
        assert_eq!(settings.refresh.default_secs, 120);
        assert_eq!(settings.refresh.idling_secs, 600);
        assert_eq!(settings.idle.tick_secs, 450);
        assert_eq!(settings.idle.final_tick_secs, 90);
        assert_eq!(settings.multi_idle.threshold, 3);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let toml = r#"
            [source]
            endpoint = "https://library.example.com/badges"
        "#;

        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.autostart, AutostartMode::None);
        assert_eq!(settings.refresh.default_secs, 300);
        assert_eq!(settings.multi_idle.threshold, 2);
        assert!(settings.validate().is_ok());
    }
}

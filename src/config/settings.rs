use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::nats::container::{RunSettings, DEFAULT_IMAGE};
use crate::utils::paths;

/// Global natsbox settings stored in ~/.natsbox/settings.yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Image used when `--image` is not given
    #[serde(default = "default_image")]
    pub image: String,

    /// Host name clients use to reach published ports
    #[serde(default = "default_host")]
    pub host: String,

    /// How long to wait for the server to accept clients once started.
    /// Pulling a missing image happens before and is not counted.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_startup_timeout() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image: default_image(),
            host: default_host(),
            startup_timeout_secs: default_startup_timeout(),
        }
    }
}

impl Settings {
    /// Load settings from disk, creating default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::get_settings_file()?)
    }

    pub fn load_from(settings_path: &Path) -> Result<Self> {
        if !settings_path.exists() {
            let settings = Self::default();
            settings.save_to(settings_path)?;
            return Ok(settings);
        }

        let content = std::fs::read_to_string(settings_path)
            .with_context(|| format!("Failed to read settings: {}", settings_path.display()))?;

        let settings: Settings = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse settings file")?;

        Ok(settings)
    }

    /// Save settings to disk
    pub fn save_to(&self, settings_path: &Path) -> Result<()> {
        // Ensure directory exists
        if let Some(parent) = settings_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)?;
        std::fs::write(settings_path, content)
            .with_context(|| format!("Failed to write settings: {}", settings_path.display()))?;

        Ok(())
    }

    /// Launch settings, with `image` overriding the configured one when given
    pub fn run_settings(&self, image: Option<&str>, name: Option<&str>) -> RunSettings {
        RunSettings {
            image: image.unwrap_or(&self.image).to_string(),
            name: name.map(str::to_string),
            host: self.host.clone(),
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.yaml");

        let settings = Settings::load_from(&path).unwrap();

        assert_eq!(settings, Settings::default());
        assert!(path.exists());
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "image: nats:2.10\n").unwrap();

        let settings = Settings::load_from(&path).unwrap();

        assert_eq!(settings.image, "nats:2.10");
        assert_eq!(settings.host, "localhost");
        assert_eq!(settings.startup_timeout_secs, 60);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "startup_timeout_secs: [soon]\n").unwrap();

        let err = Settings::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse settings file"));
    }

    #[test]
    fn image_flag_overrides_configured_image() {
        let settings = Settings {
            startup_timeout_secs: 5,
            ..Settings::default()
        };

        let run = settings.run_settings(Some("nats:latest"), Some("bus"));
        assert_eq!(run.image, "nats:latest");
        assert_eq!(run.name.as_deref(), Some("bus"));
        assert_eq!(run.startup_timeout, Duration::from_secs(5));

        let run = settings.run_settings(None, None);
        assert_eq!(run.image, DEFAULT_IMAGE);
        assert!(run.name.is_none());
    }
}

//! Application settings persistence
//!
//! Settings are stored as JSON at ~/.config/confab/settings.json

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
// Transcribing a long recording can take minutes
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// User-configurable application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    /// Preferred input device node id
    pub input_device: Option<u32>,
    /// Preferred output device node id
    pub output_device: Option<u32>,
    /// Overrides the default recordings directory
    pub recordings_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            input_device: None,
            output_device: None,
            recordings_dir: None,
        }
    }
}

impl Settings {
    /// HTTP timeout for the transcription client
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("confab")
            .join("settings.json")
    }

    /// Load settings, writing the defaults on first run
    ///
    /// A broken file falls back to defaults without overwriting it.
    pub fn load_or_init() -> Self {
        let path = Self::default_path();
        if !path.exists() {
            let settings = Self::default();
            if let Err(e) = settings.save() {
                warn!("Failed to write default settings: {:#}", e);
            }
            return settings;
        }
        Self::load_from(&path)
    }

    fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path)
            .context("read")
            .and_then(|contents| serde_json::from_str(&contents).context("parse"))
        {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

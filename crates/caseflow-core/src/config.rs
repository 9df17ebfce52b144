//! Configuration management for Caseflow.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use crate::types::SelectionPolicy;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Main bot configuration.
///
/// This is loaded from `~/.config/caseflow/config.toml` (or platform
/// equivalent). If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Target portal addresses
    pub portal: PortalConfig,
    /// Browser automation settings
    pub browser: BrowserConfig,
    /// Monitoring loop settings
    pub monitor: MonitorConfig,
    /// CAPTCHA resolution settings
    pub captcha: CaptchaConfig,
    /// OCR engine settings
    pub ocr: OcrConfig,
}

impl BotConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(&config_path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `CASEFLOW_HEADLESS`: Override browser headless mode (true/false)
    /// - `CASEFLOW_POLL_INTERVAL_SECS`: Override monitoring poll interval
    /// - `CASEFLOW_TESSERACT_CMD`: Override the OCR binary path
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;

        if let Ok(val) = std::env::var("CASEFLOW_HEADLESS") {
            if let Ok(headless) = val.parse() {
                config.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("CASEFLOW_POLL_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.monitor.poll_interval_secs = secs;
                tracing::debug!("Override monitor.poll_interval_secs from env: {}", secs);
            }
        }

        if let Ok(val) = std::env::var("CASEFLOW_TESSERACT_CMD") {
            config.ocr.tesseract_cmd = val.clone();
            tracing::debug!("Override ocr.tesseract_cmd from env: {}", val);
        }

        Ok(config)
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/caseflow/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "caseflow", "caseflow").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    /// Returns error if a field holds a value the bot cannot operate with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.portal.app_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "portal.app_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.portal.login_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "portal.login_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.captcha.code_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "captcha.code_length".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.captcha.manual_min_length > self.captcha.code_length {
            return Err(ConfigError::InvalidValue {
                field: "captcha.manual_min_length".to_string(),
                reason: format!(
                    "must not exceed code_length ({})",
                    self.captcha.code_length
                ),
            });
        }
        if self.captcha.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "captcha.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Target portal addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Address of the authenticated case queue
    pub app_url: String,
    /// Address of the login form
    pub login_url: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            app_url: "https://portal.example.com/cases".to_string(),
            login_url: "https://portal.example.com/login".to_string(),
        }
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            navigation_timeout_secs: 30,
        }
    }
}

/// Monitoring loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between polling cycles
    pub poll_interval_secs: u64,
    /// Back-off after a failed re-authentication, in seconds
    pub auth_backoff_secs: u64,
    /// Sleep after an unexpected cycle failure, in seconds
    pub recovery_sleep_secs: u64,
    /// Wait after navigation for asynchronous rendering, in milliseconds
    pub page_settle_ms: u64,
    /// Wait between scroll-into-view and click, in milliseconds
    pub action_settle_ms: u64,
    /// How many pending cases to select per cycle
    pub selection_policy: SelectionPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1,
            auth_backoff_secs: 10,
            recovery_sleep_secs: 5,
            page_settle_ms: 1000,
            action_settle_ms: 200,
            selection_policy: SelectionPolicy::SelectFirst,
        }
    }
}

impl MonitorConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Auth back-off as a [`Duration`].
    #[must_use]
    pub fn auth_backoff(&self) -> Duration {
        Duration::from_secs(self.auth_backoff_secs)
    }

    /// Recovery sleep as a [`Duration`].
    #[must_use]
    pub fn recovery_sleep(&self) -> Duration {
        Duration::from_secs(self.recovery_sleep_secs)
    }

    /// Page settle delay as a [`Duration`].
    #[must_use]
    pub fn page_settle(&self) -> Duration {
        Duration::from_millis(self.page_settle_ms)
    }

    /// Action settle delay as a [`Duration`].
    #[must_use]
    pub fn action_settle(&self) -> Duration {
        Duration::from_millis(self.action_settle_ms)
    }
}

/// CAPTCHA resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptchaConfig {
    /// Required length of an OCR-derived code
    pub code_length: usize,
    /// Minimum accepted length for a manually supplied code
    pub manual_min_length: usize,
    /// Total resolution attempts before falling back to manual entry
    pub max_attempts: u32,
    /// Wait between scrolling the graphic into view and capturing it, in milliseconds
    pub capture_settle_ms: u64,
    /// Wait after refreshing the CAPTCHA graphic, in milliseconds
    pub refresh_settle_ms: u64,
    /// How long to wait for a manually supplied code, in seconds
    pub manual_wait_secs: u64,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            code_length: 4,
            manual_min_length: 3,
            max_attempts: 3,
            capture_settle_ms: 1000,
            refresh_settle_ms: 2000,
            manual_wait_secs: 120,
        }
    }
}

impl CaptchaConfig {
    /// Capture settle delay as a [`Duration`].
    #[must_use]
    pub fn capture_settle(&self) -> Duration {
        Duration::from_millis(self.capture_settle_ms)
    }

    /// Refresh settle delay as a [`Duration`].
    #[must_use]
    pub fn refresh_settle(&self) -> Duration {
        Duration::from_millis(self.refresh_settle_ms)
    }

    /// Manual-entry wait as a [`Duration`].
    #[must_use]
    pub fn manual_wait(&self) -> Duration {
        Duration::from_secs(self.manual_wait_secs)
    }
}

/// OCR engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Path or name of the tesseract binary
    pub tesseract_cmd: String,
    /// Recognition language
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_cmd: "tesseract".to_string(),
            language: "eng".to_string(),
        }
    }
}

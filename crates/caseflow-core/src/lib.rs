//! Caseflow Core - Foundation crate for the Caseflow portal bot.
//!
//! This crate provides shared types, error handling, and configuration
//! management that all other Caseflow crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared enums and newtypes (`SessionState`, `Credentials`, `Timestamp`)
//!
//! # Example
//!
//! ```rust
//! use caseflow_core::{BotConfig, Credentials};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration and check it is usable
//! let config = BotConfig::default();
//! config.validate()?;
//!
//! // Validate operator credentials
//! let credentials = Credentials::new("operator", "secret")?;
//! assert_eq!(credentials.username, "operator");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    BotConfig, BrowserConfig, CaptchaConfig, MonitorConfig, OcrConfig, PortalConfig,
};
pub use error::{CaseflowError, ConfigError, ConfigResult, Result};
pub use types::{Credentials, SelectionPolicy, SessionState, StatusSnapshot, Timestamp};

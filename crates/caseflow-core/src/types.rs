//! Shared types used across the Caseflow crates.
//!
//! This module defines common enums and newtypes that provide type safety
//! and clear domain modeling.

use crate::error::CaseflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

/// Authentication state of the portal session.
///
/// Owned exclusively by the session monitor; the authentication flow only
/// reports outcomes and never writes this directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No authenticated session exists
    Unauthenticated,
    /// A login attempt is in flight
    Authenticating,
    /// The portal accepted the last login
    Authenticated,
    /// A previously authenticated session was bounced back to the login page
    Expired,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Expired => "expired",
        };
        write!(f, "{name}")
    }
}

/// Login credentials for the portal.
///
/// The password is zeroized from memory on drop.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Portal account name
    pub username: String,
    /// Portal account password
    pub password: Zeroizing<String>,
}

impl Credentials {
    /// Create credentials, rejecting empty fields.
    ///
    /// # Errors
    /// Returns a validation error if either field is empty.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self, CaseflowError> {
        let username = username.into();
        let password = password.into();
        if username.is_empty() {
            return Err(CaseflowError::Validation(
                "username must not be empty".to_string(),
            ));
        }
        if password.is_empty() {
            return Err(CaseflowError::Validation(
                "password must not be empty".to_string(),
            ));
        }
        Ok(Self {
            username,
            password: Zeroizing::new(password),
        })
    }
}

/// How many pending cases the monitor selects per polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Select only the first unselected case each cycle
    SelectFirst,
    /// Select every unselected case each cycle
    SelectAll,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::SelectFirst
    }
}

/// Wrapper around `chrono::DateTime<Utc>` for consistent timestamp handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp representing the current moment.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Get the inner `DateTime<Utc>`.
    #[must_use]
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Format as RFC3339 string.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get seconds since Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.0.timestamp()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

/// Immutable view of the monitor's state, published after every cycle.
///
/// Readers get whole snapshots; writes are coarse and last-writer-wins,
/// which is sufficient for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Whether the monitoring loop is running
    pub running: bool,
    /// Current session state
    pub session: SessionState,
    /// When the monitor last completed a cycle
    pub last_check: Option<Timestamp>,
    /// Number of completed cycles since start
    pub cycles: u64,
    /// Case count observed in the last cycle
    pub case_count: usize,
    /// Total cases confirmed since start
    pub confirmed_total: u64,
    /// Last error message, if any
    pub error: Option<String>,
}

impl StatusSnapshot {
    /// Snapshot for a bot that has not been started.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            running: false,
            session: SessionState::Unauthenticated,
            last_check: None,
            cycles: 0,
            case_count: 0,
            confirmed_total: 0,
            error: None,
        }
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

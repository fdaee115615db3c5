//! Runtime configuration for the synchronization core

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::types::SessionType;

/// Idle timeout for foreground sessions (1 hour)
pub const ACTIVE_SESSION_TIMEOUT_MS: i64 = 3_600_000;

/// Idle timeout for background sessions (5 minutes)
pub const BACKGROUND_SESSION_TIMEOUT_MS: i64 = 300_000;

/// Bounded exponential backoff for document persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 20,
            max_backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration for [`SessionManager`](crate::SessionManager)
///
/// Every field has a default, so a config file only needs the keys it overrides:
///
/// ```json
/// { "background_timeout_ms": 120000, "persist_retry": { "max_attempts": 5 } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub active_timeout_ms: i64,
    pub background_timeout_ms: i64,
    pub persist_retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            active_timeout_ms: ACTIVE_SESSION_TIMEOUT_MS,
            background_timeout_ms: BACKGROUND_SESSION_TIMEOUT_MS,
            persist_retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: SyncConfig =
            serde_json::from_str(&raw).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.active_timeout_ms <= 0 || self.background_timeout_ms <= 0 {
            return Err(SyncError::Config("session timeouts must be positive".into()));
        }
        if self.persist_retry.max_attempts == 0 {
            return Err(SyncError::Config(
                "persist_retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Idle timeout for a session type, in milliseconds
    pub fn timeout_for(&self, session_type: SessionType) -> i64 {
        match session_type {
            SessionType::Active => self.active_timeout_ms,
            SessionType::Background => self.background_timeout_ms,
        }
    }
}

//! Core types for list synchronization

use rand::RngCore;
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an externally issued identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when the identifier is empty or whitespace only
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of a task list, issued by the surrounding CRUD system
    TaskListId
);
string_id!(
    /// Identifier of an authenticated user
    UserId
);
string_id!(
    /// Opaque device identifier supplied by the client on every request
    DeviceId
);

/// Opaque session token
///
/// 32 random bytes rendered as base58.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a fresh random session token
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bs58::encode(&bytes).into_string())
    }

    /// Wrap a token received from a client
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Tokens are credentials of sorts, only show a prefix in logs
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "session_{}", prefix)
    }
}

/// Kind of editing session, which determines its idle timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    /// Foreground editing
    Active,
    /// Backgrounded or lower-priority client
    Background,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Active => "active",
            SessionType::Background => "background",
        }
    }
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SessionType::Active),
            "background" => Ok(SessionType::Background),
            other => Err(format!(
                "Invalid session type '{}'. Must be one of: active, background",
                other
            )),
        }
    }
}

/// One device's participation in editing one task list
///
/// Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub task_list_id: TaskListId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub session_type: SessionType,
    pub created_at: i64,
    pub last_activity: i64,
    pub expires_at: i64,
    pub is_active: bool,
    /// Encoded state vector most recently handed to this device
    pub last_state_vector: Vec<u8>,
}

impl Session {
    /// Expiry is a pure function of the clock: at or past `expires_at` the
    /// session counts as ended.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Active and not yet expired
    pub fn is_live(&self, now: i64) -> bool {
        self.is_active && !self.is_expired(now)
    }

    /// Record activity and push the expiry out by `timeout_ms`
    pub fn touch(&mut self, now: i64, timeout_ms: i64) {
        self.last_activity = now;
        self.expires_at = now.saturating_add(timeout_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(now: i64) -> Session {
        Session {
            session_id: SessionId::generate(),
            task_list_id: "list".into(),
            user_id: "user".into(),
            device_id: "device".into(),
            session_type: SessionType::Background,
            created_at: now,
            last_activity: now,
            expires_at: now + 300_000,
            is_active: true,
            last_state_vector: Vec::new(),
        }
    }

    #[test]
    fn test_session_id_generate_is_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().len() >= 40);
    }

    #[test]
    fn test_session_id_display_is_truncated() {
        let id = SessionId::from_string("abcdefghijklmnop");
        assert_eq!(format!("{}", id), "session_abcdefgh");
    }

    #[test]
    fn test_session_type_parse() {
        assert_eq!("active".parse::<SessionType>().unwrap(), SessionType::Active);
        assert_eq!(
            "Background".parse::<SessionType>().unwrap(),
            SessionType::Background
        );
        assert!("foreground".parse::<SessionType>().is_err());
    }

    #[test]
    fn test_session_expiry_boundary() {
        let s = session(1_000);
        assert!(s.is_live(1_000 + 299_999));
        assert!(!s.is_live(1_000 + 300_000));
    }

    #[test]
    fn test_session_touch_extends_expiry() {
        let mut s = session(0);
        s.touch(100_000, 300_000);
        assert_eq!(s.last_activity, 100_000);
        assert_eq!(s.expires_at, 400_000);
    }

    #[test]
    fn test_blank_ids() {
        assert!(DeviceId::new("  ").is_blank());
        assert!(!DeviceId::new("phone").is_blank());
    }
}

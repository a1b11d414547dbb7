use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// 10 GiB
pub const DEFAULT_STORAGE_LIMIT: u64 = 10 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    Subscriber,
    Artist,
    Admin,
}

impl Role {
    /// Privileged roles may act on any owner's entities.
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Subscriber => "subscriber",
            Role::Artist => "artist",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "guest" => Ok(Role::Guest),
            "subscriber" => Ok(Role::Subscriber),
            "artist" => Ok(Role::Artist),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Verified caller identity supplied by the identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub owner_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(owner_id: Uuid, role: Role) -> Self {
        Self { owner_id, role }
    }

    /// Owner match or privileged role.
    pub fn can_act_for(&self, owner_id: &Uuid) -> bool {
        self.owner_id == *owner_id || self.role.is_privileged()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub theme: String,
    pub audio_quality: String,
    pub crossfade_enabled: bool,
    pub crossfade_secs: u32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: "system".to_string(),
            audio_quality: "high".to_string(),
            crossfade_enabled: false,
            crossfade_secs: 0,
        }
    }
}

/// Account record, one per principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub preferences: Preferences,
    pub storage_used: u64,
    pub storage_limit: u64,
    pub track_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Owner {
    pub fn new(id: Uuid, email: &str, display_name: Option<&str>) -> Self {
        let now = Utc::now();
        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        Self {
            id,
            email: email.trim().to_string(),
            display_name,
            role: Role::Subscriber,
            disabled: false,
            preferences: Preferences::default(),
            storage_used: 0,
            storage_limit: DEFAULT_STORAGE_LIMIT,
            track_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn storage_available(&self) -> u64 {
        self.storage_limit.saturating_sub(self.storage_used)
    }
}

//! Persisted record shapes. Field names and the status values are the
//! wire contract with stored data and must not be renamed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in epoch seconds.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Active,
    Ended,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "ACTIVE",
            CampaignStatus::Ended => "ENDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(CampaignStatus::Active),
            "ENDED" => Some(CampaignStatus::Ended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub scope_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    pub prize: String,
    pub winners_count: u32,
    /// Deadline, epoch seconds.
    pub ends_at: i64,
    pub status: CampaignStatus,
    #[serde(default)]
    pub required_capability: Option<String>,
    #[serde(default)]
    pub min_level: i64,
    #[serde(default)]
    pub bonus_entries: BTreeMap<String, u32>,
    #[serde(default)]
    pub entries: BTreeSet<String>,
    #[serde(default)]
    pub winners: Vec<String>,
}

impl Campaign {
    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.is_active() && self.ends_at <= now
    }
}

/// Request to start a campaign. `duration` uses the compact `1d2h30m` form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub scope_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    pub prize: String,
    pub winners_count: u32,
    pub duration: String,
    #[serde(default)]
    pub required_capability: Option<String>,
    #[serde(default)]
    pub min_level: i64,
    #[serde(default)]
    pub bonus_entries: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: i64,
    pub owner_id: String,
    pub scope_id: String,
    pub kind: String,
    pub capability_id: String,
    #[serde(default)]
    pub name: String,
    /// Epoch seconds; `None` means permanent.
    #[serde(default)]
    pub expires: Option<i64>,
}

impl Grant {
    pub fn target(&self) -> Target {
        Target {
            scope_id: self.scope_id.clone(),
            member_id: self.owner_id.clone(),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires, Some(ts) if ts <= now)
    }
}

/// Grant fields before the store assigns an id and expiry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrantSpec {
    pub owner_id: String,
    pub scope_id: String,
    pub kind: String,
    pub capability_id: String,
    #[serde(default)]
    pub name: String,
    /// Compact duration; `None` grants a permanent capability.
    #[serde(default)]
    pub duration: Option<String>,
}

/// Insertable grant row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGrant {
    pub owner_id: String,
    pub scope_id: String,
    pub kind: String,
    pub capability_id: String,
    pub name: String,
    pub expires: Option<i64>,
}

/// Account a capability is applied to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub scope_id: String,
    pub member_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub level: i64,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

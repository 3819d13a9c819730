//! Persistence seams. The services only talk to these traits; every method
//! is a single atomic primitive so concurrent callers never need to
//! read-modify-write a shared collection.

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::model::{Campaign, CampaignStatus, Grant, Membership, NewGrant, Profile};

mod sqlite;

pub use sqlite::SqliteStore;

pub trait CampaignStore: Send + Sync {
    fn insert_campaign(&self, campaign: &Campaign) -> CoreResult<()>;

    fn get_campaign(&self, id: &str) -> CoreResult<Option<Campaign>>;

    /// ACTIVE campaigns whose deadline is at or before `now`.
    fn find_due_campaigns(&self, now: i64) -> CoreResult<Vec<Campaign>>;

    fn list_active(&self, scope_id: &str, limit: usize) -> CoreResult<Vec<Campaign>>;

    /// Set-add into an ACTIVE campaign's pool. Returns true if the pool changed.
    fn add_entry(&self, campaign_id: &str, participant_id: &str) -> CoreResult<bool>;

    /// Set-remove from an ACTIVE campaign's pool. Returns true if the pool changed.
    fn remove_entry(&self, campaign_id: &str, participant_id: &str) -> CoreResult<bool>;

    /// Remove the participant if present, otherwise add them, as one atomic
    /// step conditioned on the campaign being ACTIVE.
    fn toggle_entry(&self, campaign_id: &str, participant_id: &str) -> CoreResult<Membership>;

    /// Compare-and-set of the status, storing `winners` alongside. The
    /// write only happens while every winner is still in the pool.
    fn replace_status(
        &self,
        campaign_id: &str,
        expected: CampaignStatus,
        new: CampaignStatus,
        winners: &[String],
    ) -> CoreResult<StatusReplace>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReplace {
    Replaced,
    /// Missing campaign, or its status is not the expected one.
    StatusMismatch,
    /// A winner left the pool after it was read; nothing was written.
    PoolChanged,
}

pub trait GrantStore: Send + Sync {
    fn insert_grant(&self, grant: &NewGrant) -> CoreResult<Grant>;

    /// Grants with an expiry at or before `now`. Permanent grants never match.
    fn find_expired_grants(&self, now: i64) -> CoreResult<Vec<Grant>>;

    /// Returns true only for the caller whose delete removed the row.
    fn delete_grant(&self, id: i64) -> CoreResult<bool>;

    fn grants_for(&self, owner_id: &str, scope_id: &str) -> CoreResult<Vec<Grant>>;
}

/// Member profile source used for eligibility and bonus tickets.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn profile(&self, scope_id: &str, member_id: &str) -> CoreResult<Option<Profile>>;
}

//! Shared fixtures: in-memory store, recording platform bindings and a store
//! wrapper that can be told to fail.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use drawkeeper::campaign::CampaignService;
use drawkeeper::error::{CoreError, CoreResult, DispatchError};
use drawkeeper::model::{
    Campaign, CampaignSpec, CampaignStatus, Grant, Membership, NewGrant, Profile, Target,
};
use drawkeeper::dispatch::{Dispatcher, Notifier};
use drawkeeper::storage::{CampaignStore, GrantStore, ProfileLookup, SqliteStore, StatusReplace};

pub const NOW: i64 = 1_700_000_000;

pub fn store() -> Arc<SqliteStore> {
    let s = SqliteStore::open_in_memory().unwrap();
    s.init().unwrap();
    Arc::new(s)
}

pub fn spec(winners_count: u32) -> CampaignSpec {
    CampaignSpec {
        scope_id: "g1".to_string(),
        channel_id: Some("c1".to_string()),
        prize: "Nitro".to_string(),
        winners_count,
        duration: "1h".to_string(),
        ..Default::default()
    }
}

pub fn service(store: Arc<SqliteStore>, notifier: Arc<RecordingNotifier>) -> CampaignService {
    CampaignService::new(store.clone(), store, notifier)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub capability_id: String,
    pub target: Target,
}

/// Records every call; optionally fails or stalls.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub calls: Mutex<Vec<Call>>,
    pub fail_with: Option<DispatchError>,
    pub delay: Option<Duration>,
}

impl RecordingDispatcher {
    pub fn failing(err: DispatchError) -> Self {
        Self { fail_with: Some(err), ..Default::default() }
    }

    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Default::default() }
    }

    pub fn calls(&self, op: &str) -> Vec<Call> {
        self.calls.lock().unwrap().iter().filter(|c| c.op == op).cloned().collect()
    }

    async fn record(&self, op: &'static str, capability_id: &str, target: &Target) -> Result<(), DispatchError> {
        self.calls.lock().unwrap().push(Call {
            op,
            capability_id: capability_id.to_string(),
            target: target.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn grant(&self, capability_id: &str, target: &Target) -> Result<(), DispatchError> {
        self.record("grant", capability_id, target).await
    }

    async fn revoke(&self, capability_id: &str, target: &Target) -> Result<(), DispatchError> {
        self.record("revoke", capability_id, target).await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub announced: Mutex<Vec<(String, Vec<String>)>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn announced(&self) -> Vec<(String, Vec<String>)> {
        self.announced.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn announce(&self, campaign: &Campaign, winners: &[String]) -> Result<(), DispatchError> {
        self.announced.lock().unwrap().push((campaign.id.clone(), winners.to_vec()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::TargetMissing("channel deleted".to_string()));
        }
        Ok(())
    }
}

/// Delegates to a real store, failing selected operations on demand.
pub struct FlakyStore {
    pub inner: Arc<SqliteStore>,
    pub fail_queries: AtomicBool,
    pub fail_campaigns: Mutex<HashSet<String>>,
    pub fail_grants: Mutex<HashSet<i64>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            fail_queries: AtomicBool::new(false),
            fail_campaigns: Mutex::new(HashSet::new()),
            fail_grants: Mutex::new(HashSet::new()),
        }
    }

    fn down() -> CoreError {
        CoreError::StoreUnavailable("disk I/O error".to_string())
    }

    fn queries_down(&self) -> CoreResult<()> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(Self::down());
        }
        Ok(())
    }
}

impl CampaignStore for FlakyStore {
    fn insert_campaign(&self, campaign: &Campaign) -> CoreResult<()> {
        self.inner.insert_campaign(campaign)
    }

    fn get_campaign(&self, id: &str) -> CoreResult<Option<Campaign>> {
        self.inner.get_campaign(id)
    }

    fn find_due_campaigns(&self, now: i64) -> CoreResult<Vec<Campaign>> {
        self.queries_down()?;
        self.inner.find_due_campaigns(now)
    }

    fn list_active(&self, scope_id: &str, limit: usize) -> CoreResult<Vec<Campaign>> {
        self.inner.list_active(scope_id, limit)
    }

    fn add_entry(&self, campaign_id: &str, participant_id: &str) -> CoreResult<bool> {
        self.inner.add_entry(campaign_id, participant_id)
    }

    fn remove_entry(&self, campaign_id: &str, participant_id: &str) -> CoreResult<bool> {
        self.inner.remove_entry(campaign_id, participant_id)
    }

    fn toggle_entry(&self, campaign_id: &str, participant_id: &str) -> CoreResult<Membership> {
        self.inner.toggle_entry(campaign_id, participant_id)
    }

    fn replace_status(
        &self,
        campaign_id: &str,
        expected: CampaignStatus,
        new: CampaignStatus,
        winners: &[String],
    ) -> CoreResult<StatusReplace> {
        if self.fail_campaigns.lock().unwrap().contains(campaign_id) {
            return Err(Self::down());
        }
        self.inner.replace_status(campaign_id, expected, new, winners)
    }
}

impl GrantStore for FlakyStore {
    fn insert_grant(&self, grant: &NewGrant) -> CoreResult<Grant> {
        self.inner.insert_grant(grant)
    }

    fn find_expired_grants(&self, now: i64) -> CoreResult<Vec<Grant>> {
        self.queries_down()?;
        self.inner.find_expired_grants(now)
    }

    fn delete_grant(&self, id: i64) -> CoreResult<bool> {
        if self.fail_grants.lock().unwrap().contains(&id) {
            return Err(Self::down());
        }
        self.inner.delete_grant(id)
    }

    fn grants_for(&self, owner_id: &str, scope_id: &str) -> CoreResult<Vec<Grant>> {
        self.inner.grants_for(owner_id, scope_id)
    }
}

/// Profile source that pulls a member out of a campaign's pool the first
/// time that member is looked up, simulating a leave racing the draw.
pub struct LeavingMember {
    pub store: Arc<SqliteStore>,
    pub campaign_id: Mutex<String>,
    pub member_id: String,
    pub left: AtomicBool,
}

impl LeavingMember {
    pub fn new(store: Arc<SqliteStore>, member_id: &str) -> Self {
        Self {
            store,
            campaign_id: Mutex::new(String::new()),
            member_id: member_id.to_string(),
            left: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ProfileLookup for LeavingMember {
    async fn profile(&self, scope_id: &str, member_id: &str) -> CoreResult<Option<Profile>> {
        if member_id == self.member_id && !self.left.swap(true, Ordering::SeqCst) {
            let campaign_id = self.campaign_id.lock().unwrap().clone();
            assert!(self.store.remove_entry(&campaign_id, member_id)?);
        }
        self.store.profile(scope_id, member_id).await
    }
}

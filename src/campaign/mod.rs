//! Campaign lifecycle: creation, ending (by deadline or on request) and
//! rerolls. Pool membership lives in [`registry`], the deadline sweep in
//! [`poller`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;

use crate::abuse::{RateWindow, WindowConfig};
use crate::dispatch::{with_timeout, Notifier};
use crate::duration::parse_duration;
use crate::error::{CoreError, CoreResult, DispatchError};
use crate::logging::{log, log_campaign_ended, log_dispatch_failure, obj, v_str, Domain, Level};
use crate::lottery;
use crate::model::{now_ts, Campaign, CampaignSpec, CampaignStatus};
use crate::storage::{CampaignStore, ProfileLookup, StatusReplace};

pub mod poller;
pub mod registry;

pub const MAX_WINNERS: u32 = 100;
pub const MAX_BONUS_TICKETS: u32 = 1_000;
pub const MAX_BONUS_CAPABILITIES: usize = 25;
/// Cap on the bonus tickets a single participant can collect.
pub const MAX_TOTAL_BONUS: u32 = 5_000;
pub const LIST_LIMIT: usize = 20;
const MAX_DRAW_ATTEMPTS: u32 = 3;

/// What triggered the end of a campaign; only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndSource {
    Deadline,
    Request,
}

impl EndSource {
    fn as_str(&self) -> &'static str {
        match self {
            EndSource::Deadline => "deadline",
            EndSource::Request => "request",
        }
    }
}

#[derive(Debug)]
pub struct EndOutcome {
    pub winners: Vec<String>,
    /// Result of the best-effort winner announcement.
    pub announced: Result<(), DispatchError>,
}

pub struct CampaignService {
    store: Arc<dyn CampaignStore>,
    profiles: Arc<dyn ProfileLookup>,
    notifier: Arc<dyn Notifier>,
    dispatch_timeout: Duration,
    toggle_guard: Option<RateWindow<(String, String)>>,
}

impl CampaignService {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        profiles: Arc<dyn ProfileLookup>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            profiles,
            notifier,
            dispatch_timeout: Duration::from_secs(10),
            toggle_guard: None,
        }
    }

    pub fn with_dispatch_timeout(mut self, limit: Duration) -> Self {
        self.dispatch_timeout = limit;
        self
    }

    /// Reject participants who toggle too often within a rolling window.
    pub fn with_toggle_limit(mut self, cfg: WindowConfig) -> Self {
        self.toggle_guard = Some(RateWindow::new(cfg));
        self
    }

    pub fn create_campaign(&self, spec: CampaignSpec) -> CoreResult<String> {
        self.create_campaign_at(spec, now_ts())
    }

    pub fn create_campaign_at(&self, spec: CampaignSpec, now: i64) -> CoreResult<String> {
        let secs = validate_spec(&spec)?;
        let campaign = Campaign {
            id: hex::encode(rand::random::<[u8; 8]>()),
            scope_id: spec.scope_id,
            channel_id: spec.channel_id,
            message_id: spec.message_id,
            prize: spec.prize.trim().to_string(),
            winners_count: spec.winners_count,
            ends_at: now.saturating_add(secs),
            status: CampaignStatus::Active,
            required_capability: spec.required_capability,
            min_level: spec.min_level,
            bonus_entries: spec.bonus_entries,
            entries: BTreeSet::new(),
            winners: Vec::new(),
        };
        self.store.insert_campaign(&campaign)?;

        log(
            Level::Info,
            Domain::Campaign,
            "created",
            obj(&[
                ("campaign_id", v_str(&campaign.id)),
                ("scope_id", v_str(&campaign.scope_id)),
                ("prize", v_str(&campaign.prize)),
                ("winners_count", json!(campaign.winners_count)),
                ("ends_at", json!(campaign.ends_at)),
            ]),
        );
        Ok(campaign.id)
    }

    pub fn get(&self, campaign_id: &str) -> CoreResult<Campaign> {
        self.store
            .get_campaign(campaign_id)?
            .ok_or_else(|| CoreError::NotFound(format!("campaign {}", campaign_id)))
    }

    /// Active campaigns of a scope, earliest deadline first.
    pub fn list_active(&self, scope_id: &str) -> CoreResult<Vec<Campaign>> {
        self.store.list_active(scope_id, LIST_LIMIT)
    }

    pub(crate) fn find_due(&self, now: i64) -> CoreResult<Vec<Campaign>> {
        self.store.find_due_campaigns(now)
    }

    /// End a campaign early. Runs the same path as deadline completion.
    pub async fn end_campaign(&self, campaign_id: &str) -> CoreResult<Vec<String>> {
        let campaign = self.get(campaign_id)?;
        let outcome = self.end(campaign, EndSource::Request).await?;
        Ok(outcome.winners)
    }

    /// Draw winners, flip ACTIVE to ENDED, then announce.
    ///
    /// The status flip is a conditional replace, so of two concurrent ends
    /// only one stores a winner list; the other gets `NotFound`. If a winner
    /// left the pool while profiles were being looked up, the pool is read
    /// again and redrawn.
    pub async fn end(&self, campaign: Campaign, source: EndSource) -> CoreResult<EndOutcome> {
        let mut campaign = campaign;
        let mut attempt = 1;
        let winners = loop {
            if !campaign.is_active() {
                return Err(CoreError::NotFound(format!("campaign {} has already ended", campaign.id)));
            }

            let caps = self.capabilities_of(&campaign.scope_id, &campaign.entries).await;
            let winners = lottery::draw(
                &campaign.entries,
                &campaign.bonus_entries,
                &caps,
                campaign.winners_count as usize,
            );

            match self.store.replace_status(
                &campaign.id,
                CampaignStatus::Active,
                CampaignStatus::Ended,
                &winners,
            )? {
                StatusReplace::Replaced => break winners,
                StatusReplace::StatusMismatch => {
                    return Err(CoreError::NotFound(format!(
                        "campaign {} has already ended",
                        campaign.id
                    )))
                }
                StatusReplace::PoolChanged if attempt >= MAX_DRAW_ATTEMPTS => {
                    return Err(CoreError::Conflict(format!(
                        "pool of campaign {} changed during {} draws",
                        campaign.id, attempt
                    )))
                }
                StatusReplace::PoolChanged => {
                    log(
                        Level::Debug,
                        Domain::Campaign,
                        "redraw",
                        obj(&[("campaign_id", v_str(&campaign.id)), ("attempt", json!(attempt))]),
                    );
                    attempt += 1;
                    campaign = self.get(&campaign.id)?;
                }
            }
        };
        log_campaign_ended(&campaign.id, &campaign.scope_id, source.as_str(), &winners);

        let announced = with_timeout(
            self.dispatch_timeout,
            "announce",
            self.notifier.announce(&campaign, &winners),
        )
        .await;
        if let Err(e) = &announced {
            log_dispatch_failure("announce", &campaign.id, &campaign.scope_id, &e.to_string());
        }
        Ok(EndOutcome { winners, announced })
    }

    /// Fresh winners for an ENDED campaign over its full participant set.
    /// Previous winners can be drawn again.
    pub async fn reroll(&self, campaign_id: &str, count: usize) -> CoreResult<Vec<String>> {
        self.reroll_excluding(campaign_id, count, &[]).await
    }

    /// Like [`reroll`](Self::reroll), with `exclude` removed from the pool first.
    pub async fn reroll_excluding(
        &self,
        campaign_id: &str,
        count: usize,
        exclude: &[String],
    ) -> CoreResult<Vec<String>> {
        if count == 0 {
            return Err(CoreError::Validation("reroll count must be at least 1".to_string()));
        }
        let campaign = self.get(campaign_id)?;
        if campaign.is_active() {
            return Err(CoreError::NotFound(format!("campaign {} has not ended", campaign_id)));
        }

        let mut pool = campaign.entries;
        for id in exclude {
            pool.remove(id);
        }
        let caps = self.capabilities_of(&campaign.scope_id, &pool).await;
        let winners = lottery::draw(&pool, &campaign.bonus_entries, &caps, count);

        log(
            Level::Info,
            Domain::Campaign,
            "rerolled",
            obj(&[
                ("campaign_id", v_str(campaign_id)),
                ("count", json!(count)),
                ("excluded", json!(exclude.len())),
                ("winners", json!(winners)),
            ]),
        );
        Ok(winners)
    }

    /// Capabilities held by each participant. Lookup failures and unknown
    /// members count as holding nothing.
    async fn capabilities_of(
        &self,
        scope_id: &str,
        participants: &BTreeSet<String>,
    ) -> HashMap<String, BTreeSet<String>> {
        let lookups = participants.iter().map(|id| async move {
            let found = self.profiles.profile(scope_id, id).await;
            (id, found)
        });

        let mut caps = HashMap::new();
        for (id, found) in join_all(lookups).await {
            match found {
                Ok(Some(profile)) => {
                    caps.insert(id.clone(), profile.capabilities);
                }
                Ok(None) => {}
                Err(e) => log(
                    Level::Debug,
                    Domain::Campaign,
                    "profile_lookup_failed",
                    obj(&[
                        ("scope_id", v_str(scope_id)),
                        ("member", v_str(id)),
                        ("error", v_str(&e.to_string())),
                    ]),
                ),
            }
        }
        caps
    }
}

/// Checks run before any write. Returns the duration in seconds.
fn validate_spec(spec: &CampaignSpec) -> CoreResult<i64> {
    if spec.scope_id.trim().is_empty() {
        return Err(CoreError::Validation("scope id is required".to_string()));
    }
    if spec.prize.trim().is_empty() {
        return Err(CoreError::Validation("prize is required".to_string()));
    }
    if spec.winners_count == 0 || spec.winners_count > MAX_WINNERS {
        return Err(CoreError::Validation(format!(
            "winner count must be between 1 and {}",
            MAX_WINNERS
        )));
    }
    if spec.min_level < 0 {
        return Err(CoreError::Validation("minimum level cannot be negative".to_string()));
    }
    if let Some((cap, bonus)) = spec.bonus_entries.iter().find(|(_, b)| **b > MAX_BONUS_TICKETS) {
        return Err(CoreError::Validation(format!(
            "bonus {} for {} exceeds {}",
            bonus, cap, MAX_BONUS_TICKETS
        )));
    }
    if spec.bonus_entries.len() > MAX_BONUS_CAPABILITIES {
        return Err(CoreError::Validation(format!(
            "at most {} bonus capabilities are allowed",
            MAX_BONUS_CAPABILITIES
        )));
    }
    let total: u32 = spec.bonus_entries.values().sum();
    if total > MAX_TOTAL_BONUS {
        return Err(CoreError::Validation(format!(
            "bonus tickets add up to {} (limit {})",
            total, MAX_TOTAL_BONUS
        )));
    }
    parse_duration(&spec.duration)
}

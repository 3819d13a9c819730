use serde_json::json;

use super::CampaignService;
use crate::error::{CoreError, CoreResult};
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::model::{now_ts, Campaign, Membership, Profile};

impl CampaignService {
    /// Flip a participant's membership in an ACTIVE campaign's pool.
    pub async fn toggle(&self, campaign_id: &str, participant_id: &str) -> CoreResult<Membership> {
        self.toggle_at(campaign_id, participant_id, now_ts()).await
    }

    pub async fn toggle_at(
        &self,
        campaign_id: &str,
        participant_id: &str,
        now: i64,
    ) -> CoreResult<Membership> {
        let campaign = self.get(campaign_id)?;
        if !campaign.is_active() {
            return Err(CoreError::NotFound(format!("campaign {} has ended", campaign_id)));
        }

        if let Some(guard) = &self.toggle_guard {
            let key = (campaign.scope_id.clone(), participant_id.to_string());
            if guard.record(key, now) {
                log(
                    Level::Warn,
                    Domain::Entry,
                    "rate_limited",
                    obj(&[
                        ("campaign_id", v_str(campaign_id)),
                        ("scope_id", v_str(&campaign.scope_id)),
                        ("participant", v_str(participant_id)),
                    ]),
                );
                return Err(CoreError::RateLimited(format!(
                    "{} is toggling too quickly",
                    participant_id
                )));
            }
        }

        if has_requirements(&campaign) {
            let profile = self
                .profiles
                .profile(&campaign.scope_id, participant_id)
                .await?
                .unwrap_or_default();
            check_eligibility(&campaign, &profile)?;
        }

        // single atomic store step; re-checks ACTIVE inside the transaction
        let membership = self.store.toggle_entry(campaign_id, participant_id)?;

        log(
            Level::Debug,
            Domain::Entry,
            "toggled",
            obj(&[
                ("campaign_id", v_str(campaign_id)),
                ("participant", v_str(participant_id)),
                ("membership", json!(membership)),
            ]),
        );
        Ok(membership)
    }
}

fn has_requirements(campaign: &Campaign) -> bool {
    campaign.required_capability.is_some() || campaign.min_level > 0
}

/// Capability requirement first, then the level minimum.
pub fn check_eligibility(campaign: &Campaign, profile: &Profile) -> CoreResult<()> {
    if let Some(required) = &campaign.required_capability {
        if !profile.capabilities.contains(required) {
            return Err(CoreError::Ineligible(format!("requires capability {}", required)));
        }
    }
    if campaign.min_level > 0 && profile.level < campaign.min_level {
        return Err(CoreError::Ineligible(format!(
            "requires level {} (has {})",
            campaign.min_level, profile.level
        )));
    }
    Ok(())
}

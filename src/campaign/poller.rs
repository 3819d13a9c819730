//! Deadline sweep for campaigns.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;

use super::{CampaignService, EndSource};
use crate::error::CoreResult;
use crate::logging::{log, log_record_failure, log_tick, obj, v_str, Domain, Level, ProfileScope};
use crate::model::now_ts;
use crate::scheduler::run_periodic;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub ended: usize,
    pub failed: usize,
    /// Ended campaigns whose announcement did not go through.
    pub announce_failures: usize,
}

pub struct CampaignPoller {
    service: Arc<CampaignService>,
}

impl CampaignPoller {
    pub fn new(service: Arc<CampaignService>) -> Self {
        Self { service }
    }

    /// One pass: end every ACTIVE campaign whose deadline has passed.
    ///
    /// A failure on one campaign is logged and leaves it ACTIVE for the next
    /// pass; only a failed due-query aborts the tick.
    pub async fn tick(&self, now: i64) -> CoreResult<TickReport> {
        let _scope = ProfileScope::new("campaign_tick");
        let due = self.service.find_due(now)?;
        let mut report = TickReport { due: due.len(), ..Default::default() };

        let ends = due.into_iter().map(|campaign| async move {
            let id = campaign.id.clone();
            (id, self.service.end(campaign, EndSource::Deadline).await)
        });

        for (id, result) in join_all(ends).await {
            match result {
                Ok(outcome) => {
                    report.ended += 1;
                    if outcome.announced.is_err() {
                        report.announce_failures += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    log_record_failure(Domain::Campaign, &id, "end", e.kind(), &e.to_string());
                }
            }
        }

        log_tick("campaigns", report.due, report.ended, report.failed);
        Ok(report)
    }

    /// Drive [`tick`](Self::tick) every `period` until shutdown.
    pub async fn run(self: Arc<Self>, period: Duration, shutdown: watch::Receiver<bool>) -> u64 {
        run_periodic("campaigns", period, shutdown, move || {
            let poller = self.clone();
            async move {
                if let Err(e) = poller.tick(now_ts()).await {
                    log(
                        Level::Error,
                        Domain::Store,
                        "tick_aborted",
                        obj(&[
                            ("loop", v_str("campaigns")),
                            ("kind", v_str(e.kind())),
                            ("error", v_str(&e.to_string())),
                        ]),
                    );
                }
            }
        })
        .await
    }
}

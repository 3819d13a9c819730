//! Expiry sweep for time-limited grants.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;
use tokio::sync::watch;

use crate::dispatch::{describe_target, with_timeout, Dispatcher};
use crate::error::CoreResult;
use crate::logging::{
    log, log_dispatch_failure, log_record_failure, log_tick, obj, v_str, Domain, Level, ProfileScope,
};
use crate::model::{now_ts, Grant};
use crate::scheduler::run_periodic;
use crate::storage::GrantStore;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    /// Rows this pass deleted.
    pub removed: usize,
    /// Rows that could not be deleted; retried next pass.
    pub failed: usize,
    pub revoke_failures: usize,
}

enum Swept {
    Removed { revoked: bool },
    AlreadyGone,
    Failed,
}

pub struct GrantReconciler {
    store: Arc<dyn GrantStore>,
    dispatcher: Arc<dyn Dispatcher>,
    dispatch_timeout: Duration,
}

impl GrantReconciler {
    pub fn new(store: Arc<dyn GrantStore>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { store, dispatcher, dispatch_timeout: Duration::from_secs(10) }
    }

    pub fn with_dispatch_timeout(mut self, limit: Duration) -> Self {
        self.dispatch_timeout = limit;
        self
    }

    /// One pass over expired grants.
    ///
    /// The row is deleted first and the capability revoked after, and only
    /// by the pass whose delete removed the row. A failed revoke is logged;
    /// the row stays deleted.
    pub async fn tick(&self, now: i64) -> CoreResult<SweepReport> {
        let _scope = ProfileScope::new("grant_tick");
        let expired = self.store.find_expired_grants(now)?;
        let mut report = SweepReport { expired: expired.len(), ..Default::default() };

        for swept in join_all(expired.iter().map(|g| self.sweep_one(g))).await {
            match swept {
                Swept::Removed { revoked } => {
                    report.removed += 1;
                    if !revoked {
                        report.revoke_failures += 1;
                    }
                }
                Swept::AlreadyGone => {}
                Swept::Failed => report.failed += 1,
            }
        }

        log_tick("grants", report.expired, report.removed, report.failed);
        Ok(report)
    }

    async fn sweep_one(&self, grant: &Grant) -> Swept {
        match self.store.delete_grant(grant.id) {
            Ok(true) => {}
            Ok(false) => return Swept::AlreadyGone,
            Err(e) => {
                log_record_failure(Domain::Grant, &grant.id.to_string(), "delete", e.kind(), &e.to_string());
                return Swept::Failed;
            }
        }

        let target = grant.target();
        let revoked = with_timeout(
            self.dispatch_timeout,
            "revoke",
            self.dispatcher.revoke(&grant.capability_id, &target),
        )
        .await;

        match revoked {
            Ok(()) => {
                log(
                    Level::Info,
                    Domain::Grant,
                    "expired",
                    obj(&[
                        ("grant_id", json!(grant.id)),
                        ("scope_id", v_str(&grant.scope_id)),
                        ("owner", v_str(&grant.owner_id)),
                        ("capability", v_str(&grant.capability_id)),
                    ]),
                );
                Swept::Removed { revoked: true }
            }
            Err(e) => {
                log_dispatch_failure("revoke", &grant.capability_id, &describe_target(&target), &e.to_string());
                Swept::Removed { revoked: false }
            }
        }
    }

    pub async fn run(self: Arc<Self>, period: Duration, shutdown: watch::Receiver<bool>) -> u64 {
        run_periodic("grants", period, shutdown, move || {
            let reconciler = self.clone();
            async move {
                if let Err(e) = reconciler.tick(now_ts()).await {
                    log(
                        Level::Error,
                        Domain::Store,
                        "tick_aborted",
                        obj(&[
                            ("loop", v_str("grants")),
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

//! Capability grants: acquisition now, expiry later via [`reconciler`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::dispatch::{describe_target, with_timeout, Dispatcher};
use crate::duration::parse_duration;
use crate::error::{CoreError, CoreResult};
use crate::logging::{log, log_dispatch_failure, obj, v_str, Domain, Level};
use crate::model::{now_ts, Grant, GrantSpec, NewGrant, Target};
use crate::storage::GrantStore;

pub mod reconciler;

pub struct GrantService {
    store: Arc<dyn GrantStore>,
    dispatcher: Arc<dyn Dispatcher>,
    dispatch_timeout: Duration,
}

impl GrantService {
    pub fn new(store: Arc<dyn GrantStore>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { store, dispatcher, dispatch_timeout: Duration::from_secs(10) }
    }

    pub fn with_dispatch_timeout(mut self, limit: Duration) -> Self {
        self.dispatch_timeout = limit;
        self
    }

    pub async fn acquire(&self, spec: GrantSpec) -> CoreResult<Grant> {
        self.acquire_at(spec, now_ts()).await
    }

    /// Apply the capability on the platform, then record the grant.
    ///
    /// Nothing is stored when the platform refuses, so a grant row always
    /// corresponds to a capability that was actually applied.
    pub async fn acquire_at(&self, spec: GrantSpec, now: i64) -> CoreResult<Grant> {
        let expires = validate_spec(&spec)?.map(|secs| now.saturating_add(secs));
        let target = Target { scope_id: spec.scope_id.clone(), member_id: spec.owner_id.clone() };

        if let Err(e) = with_timeout(
            self.dispatch_timeout,
            "grant",
            self.dispatcher.grant(&spec.capability_id, &target),
        )
        .await
        {
            log_dispatch_failure("grant", &spec.capability_id, &describe_target(&target), &e.to_string());
            return Err(e.into());
        }

        let grant = self.store.insert_grant(&NewGrant {
            owner_id: spec.owner_id,
            scope_id: spec.scope_id,
            kind: spec.kind,
            capability_id: spec.capability_id,
            name: spec.name,
            expires,
        })?;

        log(
            Level::Info,
            Domain::Grant,
            "acquired",
            obj(&[
                ("grant_id", json!(grant.id)),
                ("scope_id", v_str(&grant.scope_id)),
                ("owner", v_str(&grant.owner_id)),
                ("capability", v_str(&grant.capability_id)),
                ("expires", json!(grant.expires)),
            ]),
        );
        Ok(grant)
    }

    pub fn list(&self, owner_id: &str, scope_id: &str) -> CoreResult<Vec<Grant>> {
        self.store.grants_for(owner_id, scope_id)
    }
}

/// Returns the duration in seconds, `None` for a permanent grant.
fn validate_spec(spec: &GrantSpec) -> CoreResult<Option<i64>> {
    for (field, value) in [
        ("owner id", &spec.owner_id),
        ("scope id", &spec.scope_id),
        ("kind", &spec.kind),
        ("capability id", &spec.capability_id),
    ] {
        if value.trim().is_empty() {
            return Err(CoreError::Validation(format!("{} is required", field)));
        }
    }
    spec.duration.as_deref().map(parse_duration).transpose()
}

//! Capability platform seams.
//!
//! Core logic only sees the [`Dispatcher`] and [`Notifier`] traits; concrete
//! bindings are picked in `main` and injected into the services.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::model::{Campaign, Target};

pub mod signing;
mod webhook;

pub use webhook::WebhookDispatcher;

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn grant(&self, capability_id: &str, target: &Target) -> Result<(), DispatchError>;
    async fn revoke(&self, capability_id: &str, target: &Target) -> Result<(), DispatchError>;
}

/// Publishes the outcome of an ended campaign.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn announce(&self, campaign: &Campaign, winners: &[String]) -> Result<(), DispatchError>;
}

/// Bound a side effect by `limit`; an elapsed call becomes `Unavailable`.
pub async fn with_timeout<F>(limit: Duration, op: &str, fut: F) -> Result<(), DispatchError>
where
    F: Future<Output = Result<(), DispatchError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(DispatchError::Unavailable(format!(
            "{} timed out after {}ms",
            op,
            limit.as_millis()
        ))),
    }
}

pub fn describe_target(target: &Target) -> String {
    format!("{}/{}", target.scope_id, target.member_id)
}

/// Stub binding: records every call in the log and succeeds.
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn grant(&self, capability_id: &str, target: &Target) -> Result<(), DispatchError> {
        log(
            Level::Info,
            Domain::Dispatch,
            "grant",
            obj(&[
                ("capability", v_str(capability_id)),
                ("target", v_str(&describe_target(target))),
                ("binding", v_str("log")),
            ]),
        );
        Ok(())
    }

    async fn revoke(&self, capability_id: &str, target: &Target) -> Result<(), DispatchError> {
        log(
            Level::Info,
            Domain::Dispatch,
            "revoke",
            obj(&[
                ("capability", v_str(capability_id)),
                ("target", v_str(&describe_target(target))),
                ("binding", v_str("log")),
            ]),
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for LogDispatcher {
    async fn announce(&self, campaign: &Campaign, winners: &[String]) -> Result<(), DispatchError> {
        let msg = if winners.is_empty() {
            "no valid entries, no winners".to_string()
        } else {
            format!("{} won {}", winners.join(", "), campaign.prize)
        };
        log(
            Level::Info,
            Domain::Dispatch,
            "announce",
            obj(&[
                ("campaign_id", v_str(&campaign.id)),
                ("scope_id", v_str(&campaign.scope_id)),
                ("msg", v_str(&msg)),
            ]),
        );
        Ok(())
    }
}

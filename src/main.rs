use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use drawkeeper::abuse::WindowConfig;
use drawkeeper::campaign::poller::CampaignPoller;
use drawkeeper::campaign::CampaignService;
use drawkeeper::config::Config;
use drawkeeper::dispatch::{Dispatcher, LogDispatcher, Notifier, WebhookDispatcher};
use drawkeeper::grant::reconciler::GrantReconciler;
use drawkeeper::logging::{log, obj, v_str, Domain, Level};
use drawkeeper::scheduler::{shutdown_channel, shutdown_on};
use drawkeeper::storage::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let store = SqliteStore::open(&cfg.sqlite_path)?;
    store.init()?;
    let store = Arc::new(store);

    // Webhook binding if configured, otherwise log-only
    let (dispatcher, notifier): (Arc<dyn Dispatcher>, Arc<dyn Notifier>) = match &cfg.dispatch_url {
        Some(url) => {
            let hook = Arc::new(WebhookDispatcher::new(url.clone(), cfg.dispatch_secret.clone()));
            log(Level::Info, Domain::System, "dispatcher", obj(&[("type", v_str("webhook"))]));
            let dispatcher: Arc<dyn Dispatcher> = hook.clone();
            let notifier: Arc<dyn Notifier> = hook;
            (dispatcher, notifier)
        }
        None => {
            log(Level::Info, Domain::System, "dispatcher", obj(&[("type", v_str("log"))]));
            let dispatcher: Arc<dyn Dispatcher> = Arc::new(LogDispatcher);
            let notifier: Arc<dyn Notifier> = Arc::new(LogDispatcher);
            (dispatcher, notifier)
        }
    };

    let campaigns = CampaignService::new(store.clone(), store.clone(), notifier)
        .with_dispatch_timeout(cfg.dispatch_timeout())
        .with_toggle_limit(WindowConfig {
            window_secs: cfg.spam_window_secs,
            threshold: cfg.spam_threshold,
            max_keys: cfg.spam_max_keys,
        });
    let poller = Arc::new(CampaignPoller::new(Arc::new(campaigns)));
    let reconciler = Arc::new(
        GrantReconciler::new(store.clone(), dispatcher).with_dispatch_timeout(cfg.dispatch_timeout()),
    );

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("sqlite_path", v_str(&cfg.sqlite_path)),
            ("campaign_poll_secs", json!(cfg.campaign_poll_secs)),
            ("grant_poll_secs", json!(cfg.grant_poll_secs)),
        ]),
    );

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let campaign_loop = tokio::spawn(poller.run(cfg.campaign_interval(), shutdown_rx.clone()));
    let grant_loop = tokio::spawn(reconciler.run(cfg.grant_interval(), shutdown_rx));

    shutdown_on(tokio::signal::ctrl_c(), &shutdown_tx).await;

    let campaign_ticks = campaign_loop.await?;
    let grant_ticks = grant_loop.await?;
    log(
        Level::Info,
        Domain::System,
        "shutdown",
        obj(&[("campaign_ticks", json!(campaign_ticks)), ("grant_ticks", json!(grant_ticks))]),
    );
    Ok(())
}

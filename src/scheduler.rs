//! Fixed-interval loop driver.
//!
//! A tick is awaited to completion inside the loop body, so a loop never
//! overlaps itself and shutdown only takes effect between ticks.

use std::future::Future;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::logging::{log, obj, v_str, Domain, Level};

/// Sender half used by `main` to stop every loop.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Wait for `signal`, then tell every loop to stop. A failed signal
/// listener still leads to an orderly shutdown.
pub async fn shutdown_on<S>(signal: S, tx: &watch::Sender<bool>)
where
    S: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        log(
            Level::Error,
            Domain::System,
            "signal_listener_failed",
            obj(&[("error", v_str(&e.to_string()))]),
        );
    }
    log(Level::Info, Domain::System, "shutdown_requested", obj(&[]));
    let _ = tx.send(true);
}

/// Run `tick` every `period` until `shutdown` flips to true (or its sender
/// is dropped). Returns the number of completed ticks.
pub async fn run_periodic<F, Fut>(
    name: &str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut completed = 0u64;

    log(
        Level::Info,
        Domain::System,
        "loop_started",
        obj(&[("loop", v_str(name)), ("period_ms", json!(period.as_millis() as u64))]),
    );

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        tick().await;
        completed += 1;
    }

    log(
        Level::Info,
        Domain::System,
        "loop_stopped",
        obj(&[("loop", v_str(name)), ("ticks", json!(completed))]),
    );
    completed
}

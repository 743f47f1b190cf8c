//! Server tick loop

use anyhow::Result;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::state::AppState;

/// Update the server every tick until Ctrl-C.
///
/// Sync device tokens must be driven from the thread that created them, so
/// this runs on the current-thread runtime.
pub async fn run(mut state: AppState) -> Result<()> {
    let mut ticker = interval(state.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        interval_ms = state.tick_interval.as_millis() as u64,
        kind = state.server.connection().kind(),
        "Server running"
    );

    let mut ticks: u64 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                state.server.update();
                ticks += 1;
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!(ticks = ticks, "Shutting down");
                break;
            }
        }
    }

    state.hub.close();
    Ok(())
}

//! Event loop.
//!
//! Runs a [`SignalMonitor`] over a stream of [`HostEvent`]s on a single task.
//! Host events, the flush interval, the live-refresh interval and the settle
//! deadline are multiplexed with `tokio::select!`, so every tracker mutation
//! happens in sequence.

use std::ops::ControlFlow;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::monitor::SignalMonitor;
use crate::page::{HostEvent, ReportedPage};
use crate::tracker::{LiveStatus, TimingConfig};

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The page reported an unload.
    Unload,
    /// The event source closed.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub events: u64,
    pub flushes: u64,
    pub reason: StopReason,
}

/// `delay` from now, capped at [`TimingConfig::MAX_DELAY`] if the sum overflows.
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .unwrap_or_else(|| now + TimingConfig::MAX_DELAY)
}

/// Drives the monitor until the page unloads or `events` closes.
///
/// Both exits stop the active session, so its time is flushed. Live totals are
/// published on `live` after every refresh.
pub async fn run(
    mut monitor: SignalMonitor<ReportedPage>,
    mut events: mpsc::Receiver<HostEvent>,
    live: watch::Sender<LiveStatus>,
) -> RunSummary {
    let timing = *monitor.tracker().timing();

    let mut flush = time::interval_at(deadline_after(timing.flush_interval), timing.flush_interval);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut refresh = time::interval(timing.live_refresh);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut handled: u64 = 0;
    let reason = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    handled += 1;
                    if dispatch(&mut monitor, event).await.is_break() {
                        break StopReason::Unload;
                    }
                }
                None => {
                    tracing::info!("event source closed");
                    monitor.on_unload().await;
                    break StopReason::Disconnected;
                }
            },
            _ = flush.tick() => monitor.tick().await,
            _ = refresh.tick() => {
                monitor.reconcile().await;
                live.send_replace(monitor.tracker().live_status());
            }
            () = sleep_until_opt(monitor.settle_deadline()) => monitor.on_settle_elapsed().await,
        }
    };

    live.send_replace(monitor.tracker().live_status());
    let summary = RunSummary {
        events: handled,
        flushes: monitor.tracker().flush_count(),
        reason,
    };
    tracing::info!(?summary, "tracking stopped");
    summary
}

/// Applies one host event to the page, then notifies the monitor.
async fn dispatch(monitor: &mut SignalMonitor<ReportedPage>, event: HostEvent) -> ControlFlow<()> {
    tracing::trace!(?event, "host event");
    monitor.page_mut().apply(&event);

    if event.is_mutation() {
        monitor.on_mutation().await;
    } else if let Some((element, video_event)) = event.video_event() {
        monitor.on_video_event(element, video_event).await;
    } else {
        match event {
            HostEvent::Visibility { .. } => monitor.on_visibility_change().await,
            HostEvent::Focus { focused } => monitor.on_focus_change(focused).await,
            HostEvent::Unload => {
                monitor.on_unload().await;
                return ControlFlow::Break(());
            }
            _ => {}
        }
    }
    ControlFlow::Continue(())
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

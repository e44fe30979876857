//! Track command: drives the signal monitor from JSON-lines page events.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use wt_core::maintenance;
use wt_core::{
    AggregateKind, Aggregates, Clock, DailyAggregate, HostEvent, KeyValueStore, LiveStatus,
    ReportedPage, Rollup, RunSummary, SignalMonitor, SystemClock, TimingConfig, Tracker,
    format_minutes,
};

const EVENT_BUFFER: usize = 64;

/// Tracks until the page unloads or `input` reaches EOF.
///
/// Storage problems during setup are logged and tracking continues, so a
/// broken store costs recorded time but never stops the monitor.
pub async fn run<R>(
    input: R,
    store: Arc<dyn KeyValueStore>,
    timing: TimingConfig,
    live: bool,
) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let aggregates = Arc::new(Aggregates::new(store));

    if let Err(err) = maintenance::initialize(&aggregates, clock.as_ref()).await {
        tracing::warn!(%err, "could not initialize storage");
    }
    match maintenance::prune_expired(&aggregates, clock.as_ref()).await {
        Ok(report) if report.total() > 0 => {
            tracing::info!(removed = report.total(), cutoff = %report.cutoff, "pruned expired entries");
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(%err, "could not prune expired entries"),
    }

    let tracker = Tracker::new(aggregates.clone(), clock.clone(), timing);
    let monitor = SignalMonitor::new(ReportedPage::new(), tracker);

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let reader = tokio::spawn(read_events(input, events_tx));

    let (live_tx, live_rx) = watch::channel(LiveStatus::default());
    let printer = live.then(|| tokio::spawn(print_live(live_rx, aggregates, clock)));

    let summary = wt_core::run(monitor, events_rx, live_tx).await;

    reader.abort();
    if let Some(printer) = printer {
        if let Err(err) = printer.await {
            tracing::debug!(%err, "live printer ended abnormally");
        }
    }
    Ok(summary)
}

/// Parses one event per line. Blank and malformed lines are skipped.
async fn read_events<R>(input: R, events: mpsc::Sender<HostEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<HostEvent>(line) {
                    Ok(event) => {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::warn!(%err, line, "skipping malformed event"),
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(%err, "failed to read events");
                break;
            }
        }
    }
}

/// Stored aggregate behind the live week total.
///
/// Reloaded only when the active kind changes or the tracker has written
/// since the last load.
#[derive(Debug, Default)]
struct LiveAggregate {
    loaded: Option<(AggregateKind, u64, DailyAggregate)>,
}

impl LiveAggregate {
    async fn week_minutes(
        &mut self,
        aggregates: &Aggregates,
        status: &LiveStatus,
        today: NaiveDate,
    ) -> Option<f64> {
        let kind = status.status.mode()?.kind();
        let fresh = matches!(
            &self.loaded,
            Some((loaded_kind, flushes, _)) if *loaded_kind == kind && *flushes == status.flushes
        );
        if !fresh {
            match aggregates.load(kind).await {
                Ok(aggregate) => self.loaded = Some((kind, status.flushes, aggregate)),
                Err(err) => {
                    tracing::debug!(%err, %kind, "could not load aggregate for live totals");
                    self.loaded = None;
                    return Some(status.today_minutes);
                }
            }
        }
        let (_, _, aggregate) = self.loaded.as_ref()?;
        Some(Rollup::with_live(aggregate, today, status.today_minutes).week)
    }
}

/// Prints live totals to stderr until the tracker stops publishing.
async fn print_live(
    mut live: watch::Receiver<LiveStatus>,
    aggregates: Arc<Aggregates>,
    clock: Arc<dyn Clock>,
) {
    let mut stderr = std::io::stderr();
    let mut cache = LiveAggregate::default();
    while live.changed().await.is_ok() {
        let status = *live.borrow_and_update();
        let today = clock.now().date_naive();
        let Some(week) = cache.week_minutes(&aggregates, &status, today).await else {
            continue;
        };
        let line = live_line(&status, week);
        if writeln!(stderr, "{line}").is_err() {
            break;
        }
    }
}

fn live_line(status: &LiveStatus, week_minutes: f64) -> String {
    format!(
        "{}: session {} | today {} | week {}",
        status.status,
        format_minutes(status.session_minutes),
        format_minutes(status.today_minutes),
        format_minutes(week_minutes),
    )
}

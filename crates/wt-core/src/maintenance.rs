//! Storage housekeeping: first-run setup, retention and reset.

use chrono::{Days, NaiveDate};
use serde::Serialize;

use crate::aggregate::{AggregateKind, Aggregates, DailyAggregate};
use crate::clock::Clock;
use crate::store::StoreError;

/// Entries removed by [`prune_expired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Entries dated before this day were removed.
    pub cutoff: NaiveDate,
    pub watch_removed: usize,
    pub listen_removed: usize,
}

impl PruneReport {
    pub const fn total(&self) -> usize {
        self.watch_removed + self.listen_removed
    }
}

/// Creates empty aggregates on first run. Returns whether anything was written.
pub async fn initialize(aggregates: &Aggregates, clock: &dyn Clock) -> Result<bool, StoreError> {
    let created = aggregates.initialize(clock.now()).await?;
    if created {
        tracing::info!("initialized empty aggregates");
    }
    Ok(created)
}

/// Number of days before today that are still kept.
pub const RETENTION_DAYS: u64 = 365;

/// Oldest day kept: [`RETENTION_DAYS`] before `today`, whatever the leap years.
pub fn retention_cutoff(today: NaiveDate) -> NaiveDate {
    today
        .checked_sub_days(Days::new(RETENTION_DAYS))
        .unwrap_or(NaiveDate::MIN)
}

/// Removes entries older than [`retention_cutoff`] from both aggregates.
///
/// An aggregate is only written when something was removed.
pub async fn prune_expired(
    aggregates: &Aggregates,
    clock: &dyn Clock,
) -> Result<PruneReport, StoreError> {
    let now = clock.now();
    let cutoff = retention_cutoff(now.date_naive());

    let mut removed = [0usize; 2];
    for (slot, kind) in removed.iter_mut().zip(AggregateKind::ALL) {
        aggregates
            .modify(kind, now, |aggregate| {
                *slot = aggregate.prune_before(cutoff);
                *slot > 0
            })
            .await?;
        if *slot > 0 {
            tracing::info!(%kind, removed = *slot, %cutoff, "pruned expired entries");
        }
    }

    Ok(PruneReport {
        cutoff,
        watch_removed: removed[0],
        listen_removed: removed[1],
    })
}

/// Clears both aggregates.
pub async fn reset(aggregates: &Aggregates, clock: &dyn Clock) -> Result<(), StoreError> {
    let now = clock.now();
    let empty = DailyAggregate::default();
    for kind in AggregateKind::ALL {
        aggregates.replace(kind, &empty, now).await?;
    }
    tracing::info!("aggregates reset");
    Ok(())
}

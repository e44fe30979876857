//! Reset command: clears recorded time.

use std::io::Write;

use anyhow::{Context, Result, bail};
use wt_core::maintenance;
use wt_core::{AggregateKind, Aggregates, Clock};
use wt_db::SqliteStore;

/// Writes empty aggregates. Refuses to run without confirmation.
pub async fn run<W: Write>(
    writer: &mut W,
    aggregates: &Aggregates,
    clock: &dyn Clock,
    confirmed: bool,
) -> Result<()> {
    if !confirmed {
        bail!("refusing to reset without --yes");
    }
    maintenance::reset(aggregates, clock)
        .await
        .context("failed to reset aggregates")?;
    writeln!(writer, "Reset watch and listen totals.")?;
    Ok(())
}

/// Deletes every aggregate key and update stamp from the database.
pub fn purge<W: Write>(writer: &mut W, store: &SqliteStore, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("refusing to purge without --yes");
    }
    let keys: Vec<&str> = AggregateKind::ALL
        .iter()
        .flat_map(|kind| [kind.aggregate_key(), kind.updated_key()])
        .collect();
    let removed = store.clear(&keys).context("failed to delete stored keys")?;
    writeln!(writer, "Deleted {removed} stored keys.")?;
    Ok(())
}

//! Prune command: retention cleanup on demand.

use std::io::Write;

use anyhow::{Context, Result};
use wt_core::maintenance::{self, PruneReport};
use wt_core::{Aggregates, Clock};

pub async fn run<W: Write>(writer: &mut W, aggregates: &Aggregates, clock: &dyn Clock) -> Result<()> {
    let report = maintenance::prune_expired(aggregates, clock)
        .await
        .context("failed to prune expired entries")?;
    render(writer, &report)
}

fn render<W: Write>(writer: &mut W, report: &PruneReport) -> Result<()> {
    if report.total() == 0 {
        writeln!(writer, "Nothing older than {} to remove.", report.cutoff)?;
    } else {
        writeln!(
            writer,
            "Removed {} entries older than {} (watch: {}, listen: {}).",
            report.total(),
            report.cutoff,
            report.watch_removed,
            report.listen_removed
        )?;
    }
    Ok(())
}

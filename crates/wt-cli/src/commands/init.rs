//! Init command: first-run storage setup.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use wt_core::maintenance;
use wt_core::{Aggregates, Clock};
use wt_db::SqliteStore;

pub async fn run<W: Write>(
    writer: &mut W,
    store: &SqliteStore,
    aggregates: &Aggregates,
    clock: &dyn Clock,
    database_path: &Path,
) -> Result<()> {
    let created = maintenance::initialize(aggregates, clock)
        .await
        .context("failed to initialize storage")?;

    if created {
        writeln!(writer, "Initialized storage at {}", database_path.display())?;
    } else {
        writeln!(writer, "Storage already initialized at {}", database_path.display())?;
    }
    let keys = store.keys().context("failed to list stored keys")?;
    writeln!(writer, "Keys: {}", keys.join(", "))?;
    Ok(())
}

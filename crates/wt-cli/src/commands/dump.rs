//! Dump command: stored minutes per date.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use wt_core::{ActivityTable, AggregateKind, Aggregates, activity_table, format_minutes};

#[derive(Debug, Serialize)]
struct DumpData {
    #[serde(flatten)]
    table: ActivityTable,
    last_watch_update: Option<DateTime<Utc>>,
    last_listen_update: Option<DateTime<Utc>>,
}

pub async fn run<W: Write>(writer: &mut W, aggregates: &Aggregates, json: bool) -> Result<()> {
    let (watch, listen) = aggregates
        .load_both()
        .await
        .context("failed to load aggregates")?;
    let data = DumpData {
        table: activity_table(&watch, &listen),
        last_watch_update: aggregates
            .last_update(AggregateKind::Watch)
            .await
            .context("failed to read watch update time")?,
        last_listen_update: aggregates
            .last_update(AggregateKind::Listen)
            .await
            .context("failed to read listen update time")?,
    };

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&data)?)?;
    } else {
        render(writer, &data)?;
    }
    Ok(())
}

fn updated_label(updated: Option<DateTime<Utc>>) -> String {
    updated.map_or_else(
        || "never".to_string(),
        |at| at.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

fn render<W: Write>(writer: &mut W, data: &DumpData) -> Result<()> {
    let table = &data.table;
    if table.rows.is_empty() {
        writeln!(writer, "No activity recorded.")?;
        return Ok(());
    }

    for row in &table.rows {
        writeln!(
            writer,
            "{}: watch {} | listen {}",
            row.date,
            format_minutes(row.watch),
            format_minutes(row.listen)
        )?;
    }
    writeln!(
        writer,
        "Total: watch {} | listen {}",
        format_minutes(table.total_watch),
        format_minutes(table.total_listen)
    )?;
    writeln!(
        writer,
        "Last updated: watch {} | listen {}",
        updated_label(data.last_watch_update),
        updated_label(data.last_listen_update)
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use chrono::{Local, NaiveDate};
    use insta::assert_snapshot;
    use serde_json::json;
    use wt_core::{AggregateKind, MemoryStore};

    #[tokio::test]
    async fn test_dump_lists_dates_newest_first() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw(
            AggregateKind::Watch.aggregate_key(),
            json!({"2025-01-01": 90.0, "2025-01-03": 0.5}),
        );
        store.insert_raw(
            AggregateKind::Listen.aggregate_key(),
            json!({"2025-01-02": 12.25}),
        );
        store.insert_raw(AggregateKind::Watch.updated_key(), json!(1_736_000_000_000_i64));
        let aggregates = Aggregates::new(store);

        let mut output = Vec::new();
        run(&mut output, &aggregates, false).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_snapshot!(output, @r"
        2025-01-03: watch 30s | listen 0s
        2025-01-02: watch 0s | listen 12m 15s
        2025-01-01: watch 1h 30m | listen 0s
        Total: watch 1h 31m | listen 12m 15s
        Last updated: watch 2025-01-04T14:13:20Z | listen never
        ");
    }

    #[tokio::test]
    async fn test_dump_empty_store() {
        let aggregates = Aggregates::new(Arc::new(MemoryStore::new()));
        let mut output = Vec::new();
        run(&mut output, &aggregates, false).await.unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @"No activity recorded.");
    }

    #[tokio::test]
    async fn test_dump_json_has_rows_and_totals() {
        let aggregates = Aggregates::new(Arc::new(MemoryStore::new()));
        let day = NaiveDate::from_ymd_opt(2025, 2, 2).unwrap();
        aggregates
            .add_minutes(AggregateKind::Watch, day, 4.0, Local::now())
            .await
            .unwrap();

        let mut output = Vec::new();
        run(&mut output, &aggregates, true).await.unwrap();

        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["rows"][0]["date"], "2025-02-02");
        assert_eq!(value["rows"][0]["watch"], 4.0);
        assert_eq!(value["total_watch"], 4.0);
        assert_eq!(value["total_listen"], 0.0);
        assert!(value["last_watch_update"].is_string());
        assert!(value["last_listen_update"].is_null());
    }
}

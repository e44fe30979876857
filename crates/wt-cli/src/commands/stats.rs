//! Stats command: rollups and a week chart of watch time.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use wt_core::{Aggregates, Clock, Rollup, WeekWindow, format_minutes};

/// Everything the stats view shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsData {
    pub date: NaiveDate,
    pub timezone: String,
    pub watch: Rollup,
    pub listen: Rollup,
    pub week: WeekWindow,
}

/// Loads both aggregates and computes the view for `today`.
pub async fn collect(aggregates: &Aggregates, today: NaiveDate, week_offset: u32) -> Result<StatsData> {
    let (watch, listen) = aggregates
        .load_both()
        .await
        .context("failed to load aggregates")?;
    let timezone = iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string());

    Ok(StatsData {
        date: today,
        timezone,
        watch: Rollup::compute(&watch, today),
        listen: Rollup::compute(&listen, today),
        week: WeekWindow::new(&watch, today, week_offset),
    })
}

pub async fn run<W: Write>(
    writer: &mut W,
    aggregates: &Aggregates,
    clock: &dyn Clock,
    week_offset: u32,
    json: bool,
) -> Result<()> {
    let data = collect(aggregates, clock.now().date_naive(), week_offset).await?;
    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&data)?)?;
    } else {
        render(writer, &data)?;
    }
    Ok(())
}

/// Re-renders every `poll` until the process is stopped.
pub async fn follow<W: Write>(
    writer: &mut W,
    aggregates: &Aggregates,
    clock: &dyn Clock,
    week_offset: u32,
    json: bool,
    poll: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(poll);
    loop {
        ticker.tick().await;
        match collect(aggregates, clock.now().date_naive(), week_offset).await {
            Ok(data) if json => writeln!(writer, "{}", serde_json::to_string(&data)?)?,
            Ok(data) => {
                render(writer, &data)?;
                writeln!(writer)?;
            }
            Err(err) => tracing::warn!(error = %format!("{err:#}"), "stats refresh failed"),
        }
        writer.flush()?;
    }
}

pub fn render<W: Write>(writer: &mut W, data: &StatsData) -> Result<()> {
    writeln!(writer, "Stats for {} ({})", data.date, data.timezone)?;
    writeln!(writer)?;
    writeln!(writer, "{:<12}{:<12}Listen", "", "Watch")?;
    let rows = [
        ("Today", data.watch.today, data.listen.today),
        ("This week", data.watch.week, data.listen.week),
        ("This month", data.watch.month, data.listen.month),
        ("All time", data.watch.all_time, data.listen.all_time),
    ];
    for (label, watch, listen) in rows {
        writeln!(
            writer,
            "{label:<12}{:<12}{}",
            format_minutes(watch),
            format_minutes(listen)
        )?;
    }

    let (Some(start), Some(end)) = (data.week.start(), data.week.end()) else {
        return Ok(());
    };
    writeln!(writer)?;
    writeln!(
        writer,
        "Watch time {} to {} (total {})",
        start.format("%b %d"),
        end.format("%b %d"),
        format_minutes(data.week.total())
    )?;
    let max = data.week.max();
    for (day, minutes) in &data.week.days {
        writeln!(
            writer,
            "{}  {}  {}",
            day.format("%a %b %d"),
            progress_bar(*minutes, max),
            format_minutes(*minutes)
        )?;
    }
    Ok(())
}

/// Generates a 10-character progress bar.
/// Values <5% of max get a single block for visibility.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn progress_bar(value: f64, max: f64) -> String {
    if max <= 0.0 || value <= 0.0 {
        return "░░░░░░░░░░".to_string();
    }

    let ratio = value / max;
    let filled = if ratio < 0.05 {
        1
    } else {
        (ratio * 10.0).round().min(10.0) as usize
    };

    let empty = 10 - filled;
    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}

//! Rollups over daily aggregates for presentation.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::Serialize;

use crate::aggregate::DailyAggregate;

/// Totals for the periods around one day, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Rollup {
    pub today: f64,
    /// The Sunday-started week containing the day.
    pub week: f64,
    /// The calendar month containing the day.
    pub month: f64,
    pub all_time: f64,
}

impl Rollup {
    pub fn compute(aggregate: &DailyAggregate, day: NaiveDate) -> Self {
        let week_start = week_start(day);
        let week_end = week_start + Days::new(6);
        let (month_start, month_end) = month_bounds(day);
        Self {
            today: aggregate.get(day),
            week: aggregate.sum_range(week_start..=week_end),
            month: aggregate.sum_range(month_start..=month_end),
            all_time: aggregate.total(),
        }
    }

    /// Rollup with the live total substituted for the stored value of `day`.
    pub fn with_live(aggregate: &DailyAggregate, day: NaiveDate, live_today: f64) -> Self {
        Self::compute(&aggregate.with_day(day, live_today), day)
    }
}

/// The Sunday on or before `day`.
pub fn week_start(day: NaiveDate) -> NaiveDate {
    day - Days::new(u64::from(day.weekday().num_days_from_sunday()))
}

fn month_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = day.with_day(1).unwrap_or(day);
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(day);
    (first, last)
}

/// Seven consecutive days for a bar chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekWindow {
    pub days: Vec<(NaiveDate, f64)>,
}

impl WeekWindow {
    /// The seven days ending `offset` weeks before `today`.
    pub fn new(aggregate: &DailyAggregate, today: NaiveDate, offset: u32) -> Self {
        let end = today - Days::new(7 * u64::from(offset));
        let days = (0..7u64)
            .rev()
            .map(|back| {
                let day = end - Days::new(back);
                (day, aggregate.get(day))
            })
            .collect();
        Self { days }
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.days.first().map(|(day, _)| *day)
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.days.last().map(|(day, _)| *day)
    }

    pub fn total(&self) -> f64 {
        self.days.iter().map(|(_, minutes)| minutes).sum()
    }

    /// Largest value for bar scaling, never below one minute.
    pub fn max(&self) -> f64 {
        self.days
            .iter()
            .map(|(_, minutes)| *minutes)
            .fold(1.0, f64::max)
    }
}

/// Watch and listen minutes for one date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActivityRow {
    pub date: NaiveDate,
    pub watch: f64,
    pub listen: f64,
}

/// Rows for every date present in either aggregate, newest first.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ActivityTable {
    pub rows: Vec<ActivityRow>,
    pub total_watch: f64,
    pub total_listen: f64,
}

pub fn activity_table(watch: &DailyAggregate, listen: &DailyAggregate) -> ActivityTable {
    let mut dates: Vec<NaiveDate> = watch
        .iter()
        .chain(listen.iter())
        .map(|(day, _)| day)
        .collect();
    dates.sort_unstable_by(|a, b| b.cmp(a));
    dates.dedup();

    let rows = dates
        .into_iter()
        .map(|date| ActivityRow {
            date,
            watch: watch.get(date),
            listen: listen.get(date),
        })
        .collect();

    ActivityTable {
        rows,
        total_watch: watch.total(),
        total_listen: listen.total(),
    }
}

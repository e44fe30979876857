//! Per-day accumulated minutes and the repository that persists them.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::store::{KeyValueStore, StoreError};
use crate::types::ValidationError;

/// Date format used for aggregate keys.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Which of the two aggregates a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    /// Foreground time: the tab was visible while the video played.
    Watch,
    /// Background time: the video played in a hidden or unfocused tab.
    Listen,
}

impl AggregateKind {
    pub const ALL: [Self; 2] = [Self::Watch, Self::Listen];

    /// Store key holding the date → minutes map.
    pub const fn aggregate_key(self) -> &'static str {
        match self {
            Self::Watch => "watchAggregate",
            Self::Listen => "listenAggregate",
        }
    }

    /// Store key holding the epoch-millis timestamp of the last write.
    pub const fn updated_key(self) -> &'static str {
        match self {
            Self::Watch => "lastWatchUpdate",
            Self::Listen => "lastListenUpdate",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Watch => "watch",
            Self::Listen => "listen",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AggregateKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "watch" => Ok(Self::Watch),
            "listen" => Ok(Self::Listen),
            _ => Err(ValidationError::InvalidAggregateKind {
                value: s.to_string(),
            }),
        }
    }
}

/// Accumulated minutes keyed by local calendar day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyAggregate {
    days: BTreeMap<NaiveDate, f64>,
}

impl DailyAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a persisted map, coercing anything malformed instead of failing.
    ///
    /// A non-object value decodes as empty, keys that are not dates are
    /// dropped and values that are not finite non-negative numbers become 0.
    pub fn from_value(key: &str, value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            tracing::warn!(key, %value, "aggregate is not a map, treating as empty");
            return Self::default();
        };

        let mut days = BTreeMap::new();
        for (date, minutes) in object {
            let day = match parse_day(date) {
                Ok(day) => day,
                Err(err) => {
                    tracing::warn!(key, %err, "dropping aggregate entry");
                    continue;
                }
            };
            let minutes = match minutes.as_f64() {
                Some(m) if m.is_finite() && m >= 0.0 => m,
                _ => {
                    tracing::warn!(key, %date, %minutes, "coercing malformed aggregate value to zero");
                    0.0
                }
            };
            days.insert(day, minutes);
        }
        Self { days }
    }

    /// Encodes the aggregate in its persisted form.
    pub fn to_value(&self) -> Value {
        let object: Map<String, Value> = self
            .days
            .iter()
            .map(|(day, minutes)| (day.format(DATE_FORMAT).to_string(), Value::from(*minutes)))
            .collect();
        Value::Object(object)
    }

    /// Minutes recorded for `day`, zero when absent.
    pub fn get(&self, day: NaiveDate) -> f64 {
        self.days.get(&day).copied().unwrap_or(0.0)
    }

    /// Adds minutes to `day` and returns the new total for that day.
    ///
    /// Negative and non-finite increments are ignored so totals never decrease.
    pub fn add(&mut self, day: NaiveDate, minutes: f64) -> f64 {
        let entry = self.days.entry(day).or_insert(0.0);
        if minutes.is_finite() && minutes > 0.0 {
            *entry += minutes;
        }
        *entry
    }

    /// Returns a copy with `day` set to `minutes`.
    #[must_use]
    pub fn with_day(&self, day: NaiveDate, minutes: f64) -> Self {
        let mut copy = self.clone();
        copy.days.insert(day, minutes.max(0.0));
        copy
    }

    pub fn total(&self) -> f64 {
        self.days.values().sum()
    }

    /// Sum over an inclusive day range.
    pub fn sum_range(&self, range: RangeInclusive<NaiveDate>) -> f64 {
        if range.start() > range.end() {
            return 0.0;
        }
        self.days.range(range).map(|(_, minutes)| minutes).sum()
    }

    /// Removes entries strictly older than `cutoff`. Returns how many were removed.
    pub fn prune_before(&mut self, cutoff: NaiveDate) -> usize {
        let kept = self.days.split_off(&cutoff);
        let removed = self.days.len();
        self.days = kept;
        removed
    }

    /// Days in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (NaiveDate, f64)> + '_ {
        self.days.iter().map(|(day, minutes)| (*day, *minutes))
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

impl FromIterator<(NaiveDate, f64)> for DailyAggregate {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, f64)>>(iter: I) -> Self {
        let mut aggregate = Self::default();
        for (day, minutes) in iter {
            aggregate.add(day, minutes);
        }
        aggregate
    }
}

/// Typed access to both aggregates over a shared key-value store.
///
/// Read-modify-write cycles on the same aggregate are serialized through a
/// per-kind async mutex, so concurrent flushes from one process never lose
/// an increment. Writers in other processes sharing the backend are not
/// coordinated: the later write wins.
pub struct Aggregates {
    store: Arc<dyn KeyValueStore>,
    watch_lock: Mutex<()>,
    listen_lock: Mutex<()>,
}

impl fmt::Debug for Aggregates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregates").finish_non_exhaustive()
    }
}

impl Aggregates {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            watch_lock: Mutex::new(()),
            listen_lock: Mutex::new(()),
        }
    }

    const fn lock_for(&self, kind: AggregateKind) -> &Mutex<()> {
        match kind {
            AggregateKind::Watch => &self.watch_lock,
            AggregateKind::Listen => &self.listen_lock,
        }
    }

    /// Loads one aggregate. Absent or corrupt data loads as empty.
    pub async fn load(&self, kind: AggregateKind) -> Result<DailyAggregate, StoreError> {
        let key = kind.aggregate_key();
        match self.store.get(&[key]).await {
            Ok(values) => Ok(values
                .get(key)
                .map(|value| DailyAggregate::from_value(key, value))
                .unwrap_or_default()),
            Err(StoreError::Corrupt { key, message }) => {
                tracing::warn!(%key, %message, "aggregate is unreadable, treating as empty");
                Ok(DailyAggregate::default())
            }
            Err(err) => Err(err),
        }
    }

    /// Loads the watch and listen aggregates.
    pub async fn load_both(&self) -> Result<(DailyAggregate, DailyAggregate), StoreError> {
        let watch = self.load(AggregateKind::Watch).await?;
        let listen = self.load(AggregateKind::Listen).await?;
        Ok((watch, listen))
    }

    /// Minutes stored for a single day.
    pub async fn minutes_on(&self, kind: AggregateKind, day: NaiveDate) -> Result<f64, StoreError> {
        Ok(self.load(kind).await?.get(day))
    }

    /// Adds minutes to one day and returns that day's new total.
    pub async fn add_minutes(
        &self,
        kind: AggregateKind,
        day: NaiveDate,
        minutes: f64,
        now: DateTime<Local>,
    ) -> Result<f64, StoreError> {
        let _guard = self.lock_for(kind).lock().await;
        let mut aggregate = self.load(kind).await?;
        let total = aggregate.add(day, minutes);
        self.write(kind, &aggregate, now).await?;
        Ok(total)
    }

    /// Overwrites an aggregate wholesale.
    pub async fn replace(
        &self,
        kind: AggregateKind,
        aggregate: &DailyAggregate,
        now: DateTime<Local>,
    ) -> Result<(), StoreError> {
        let _guard = self.lock_for(kind).lock().await;
        self.write(kind, aggregate, now).await
    }

    /// Runs `change` on the stored aggregate while holding its lock.
    ///
    /// The result is written back only when `change` returns true. Returns
    /// whether a write happened.
    pub async fn modify<F>(
        &self,
        kind: AggregateKind,
        now: DateTime<Local>,
        change: F,
    ) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut DailyAggregate) -> bool + Send,
    {
        let _guard = self.lock_for(kind).lock().await;
        let mut aggregate = self.load(kind).await?;
        if !change(&mut aggregate) {
            return Ok(false);
        }
        self.write(kind, &aggregate, now).await?;
        Ok(true)
    }

    /// When an aggregate was last written, if ever.
    pub async fn last_update(&self, kind: AggregateKind) -> Result<Option<DateTime<Utc>>, StoreError> {
        let key = kind.updated_key();
        let values = self.store.get(&[key]).await?;
        Ok(values
            .get(key)
            .and_then(Value::as_i64)
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()))
    }

    /// Writes an empty map for every aggregate that has never been stored.
    ///
    /// Returns whether anything was written.
    pub async fn initialize(&self, now: DateTime<Local>) -> Result<bool, StoreError> {
        let _watch = self.watch_lock.lock().await;
        let _listen = self.listen_lock.lock().await;

        let keys = AggregateKind::ALL.map(AggregateKind::aggregate_key);
        let existing = self.store.get(&keys).await?;

        let mut entries = Map::new();
        for kind in AggregateKind::ALL {
            if !existing.contains_key(kind.aggregate_key()) {
                entries.insert(kind.aggregate_key().to_string(), Value::Object(Map::new()));
                entries.insert(kind.updated_key().to_string(), Value::from(now.timestamp_millis()));
            }
        }
        if entries.is_empty() {
            return Ok(false);
        }
        self.store.set(entries).await?;
        Ok(true)
    }

    async fn write(
        &self,
        kind: AggregateKind,
        aggregate: &DailyAggregate,
        now: DateTime<Local>,
    ) -> Result<(), StoreError> {
        let mut entries = Map::new();
        entries.insert(kind.aggregate_key().to_string(), aggregate.to_value());
        entries.insert(kind.updated_key().to_string(), Value::from(now.timestamp_millis()));
        self.store.set(entries).await
    }
}

/// Parses a `YYYY-MM-DD` day key.
pub fn parse_day(s: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| ValidationError::InvalidDate {
        value: s.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn day(s: &str) -> NaiveDate {
        parse_day(s).unwrap()
    }

    fn repo() -> (Arc<MemoryStore>, Aggregates) {
        let store = Arc::new(MemoryStore::new());
        let aggregates = Aggregates::new(store.clone());
        (store, aggregates)
    }

    #[test]
    fn test_kind_keys_match_persisted_layout() {
        assert_eq!(AggregateKind::Watch.aggregate_key(), "watchAggregate");
        assert_eq!(AggregateKind::Listen.aggregate_key(), "listenAggregate");
        assert_eq!(AggregateKind::Watch.updated_key(), "lastWatchUpdate");
        assert_eq!(AggregateKind::Listen.updated_key(), "lastListenUpdate");
        assert_eq!("listen".parse::<AggregateKind>().unwrap(), AggregateKind::Listen);
        assert!("both".parse::<AggregateKind>().is_err());
    }

    #[test]
    fn test_from_value_coerces_malformed_entries() {
        let value = json!({
            "2025-01-01": 12.5,
            "2025-01-02": "lots",
            "2025-01-03": -4,
            "yesterday": 3.0,
        });
        let aggregate = DailyAggregate::from_value("watchAggregate", &value);

        assert_eq!(aggregate.len(), 3);
        assert!((aggregate.get(day("2025-01-01")) - 12.5).abs() < f64::EPSILON);
        assert!(aggregate.get(day("2025-01-02")).abs() < f64::EPSILON);
        assert!(aggregate.get(day("2025-01-03")).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_value_non_object_is_empty() {
        let aggregate = DailyAggregate::from_value("watchAggregate", &json!([1, 2, 3]));
        assert!(aggregate.is_empty());
    }

    #[test]
    fn test_add_never_decreases() {
        let mut aggregate = DailyAggregate::new();
        let d = day("2025-01-01");
        assert!((aggregate.add(d, 2.0) - 2.0).abs() < f64::EPSILON);
        assert!((aggregate.add(d, -1.0) - 2.0).abs() < f64::EPSILON);
        assert!((aggregate.add(d, f64::NAN) - 2.0).abs() < f64::EPSILON);
        assert!((aggregate.add(d, 0.5) - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_prune_before_is_strict() {
        let mut aggregate: DailyAggregate = [
            (day("2024-01-01"), 1.0),
            (day("2024-06-01"), 2.0),
            (day("2024-06-02"), 3.0),
        ]
        .into_iter()
        .collect();

        let removed = aggregate.prune_before(day("2024-06-01"));
        assert_eq!(removed, 1);
        assert_eq!(aggregate.len(), 2);
        assert!((aggregate.total() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sum_range_is_inclusive() {
        let aggregate: DailyAggregate = [
            (day("2025-01-01"), 1.0),
            (day("2025-01-02"), 2.0),
            (day("2025-01-03"), 4.0),
        ]
        .into_iter()
        .collect();

        assert!((aggregate.sum_range(day("2025-01-01")..=day("2025-01-02")) - 3.0).abs() < f64::EPSILON);
        assert!(aggregate.sum_range(day("2025-01-03")..=day("2025-01-01")).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_add_minutes_merges_into_existing_map() {
        let (store, aggregates) = repo();
        store.insert_raw("watchAggregate", json!({"2025-01-01": 10.0, "2025-01-02": 1.0}));
        let now = Local::now();

        let total = aggregates
            .add_minutes(AggregateKind::Watch, day("2025-01-02"), 2.5, now)
            .await
            .unwrap();

        assert!((total - 3.5).abs() < f64::EPSILON);
        assert_eq!(
            store.raw("watchAggregate").unwrap(),
            json!({"2025-01-01": 10.0, "2025-01-02": 3.5})
        );
        assert_eq!(
            store.raw("lastWatchUpdate").unwrap(),
            json!(now.timestamp_millis())
        );
        assert!(store.raw("listenAggregate").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_add_minutes_do_not_lose_increments() {
        let (_store, aggregates) = repo();
        let aggregates = Arc::new(aggregates);
        let d = day("2025-01-01");

        let mut handles = Vec::new();
        for _ in 0..10 {
            let aggregates = aggregates.clone();
            handles.push(tokio::spawn(async move {
                aggregates
                    .add_minutes(AggregateKind::Listen, d, 1.0, Local::now())
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let total = aggregates.minutes_on(AggregateKind::Listen, d).await.unwrap();
        assert!((total - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_initialize_only_writes_missing_keys() {
        let (store, aggregates) = repo();
        store.insert_raw("watchAggregate", json!({"2025-01-01": 10.0}));

        assert!(aggregates.initialize(Local::now()).await.unwrap());
        assert_eq!(store.raw("watchAggregate").unwrap(), json!({"2025-01-01": 10.0}));
        assert_eq!(store.raw("listenAggregate").unwrap(), json!({}));
        assert!(store.raw("lastListenUpdate").is_some());
        assert!(store.raw("lastWatchUpdate").is_none());

        assert!(!aggregates.initialize(Local::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_last_update_reads_epoch_millis() {
        let (store, aggregates) = repo();
        assert!(aggregates.last_update(AggregateKind::Watch).await.unwrap().is_none());

        store.insert_raw("lastWatchUpdate", json!(1_735_689_600_000_i64));
        let updated = aggregates.last_update(AggregateKind::Watch).await.unwrap().unwrap();
        assert_eq!(updated.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn test_offline_store_propagates_unavailable() {
        let (store, aggregates) = repo();
        store.set_offline(true);

        let err = aggregates
            .add_minutes(AggregateKind::Watch, day("2025-01-01"), 1.0, Local::now())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}

//! Session accounting.
//!
//! A [`Tracker`] owns the single in-progress session and decides, from the
//! ambient page state at the moment a [`Signal`] arrives, whether playback
//! counts as watching (foreground) or listening (background). Elapsed session
//! time is folded into today's aggregate when a session stops and on every
//! periodic [`Tracker::tick`], so at most one flush interval is lost if the
//! process dies.
//!
//! # Ordering
//!
//! Every operation takes `&mut self` and awaits its store access inline. A stop
//! therefore always finishes its flush before the next session's baseline is
//! read. Sessions also carry an epoch and a baseline is only applied to the
//! session that requested it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateKind, Aggregates};
use crate::clock::Clock;

/// Accumulation mode of an active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Watching,
    Listening,
}

impl Mode {
    /// The aggregate this mode accumulates into.
    pub const fn kind(self) -> AggregateKind {
        match self {
            Self::Watching => AggregateKind::Watch,
            Self::Listening => AggregateKind::Listen,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Watching => "watching",
            Self::Listening => "listening",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the tracker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerStatus {
    #[default]
    Idle,
    Watching,
    Listening,
}

impl From<Option<Mode>> for TrackerStatus {
    fn from(mode: Option<Mode>) -> Self {
        match mode {
            None => Self::Idle,
            Some(Mode::Watching) => Self::Watching,
            Some(Mode::Listening) => Self::Listening,
        }
    }
}

impl TrackerStatus {
    pub const fn mode(self) -> Option<Mode> {
        match self {
            Self::Idle => None,
            Self::Watching => Some(Mode::Watching),
            Self::Listening => Some(Mode::Listening),
        }
    }
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Watching => "watching",
            Self::Listening => "listening",
        };
        f.write_str(s)
    }
}

/// Fixed intervals that drive the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// How often an active session is flushed to storage.
    pub flush_interval: Duration,
    /// How often live totals are recomputed.
    pub live_refresh: Duration,
    /// How often a passive display re-reads storage.
    pub display_poll: Duration,
    /// Delay between a video change and re-arming, so the new element can mount.
    pub settle_delay: Duration,
    /// Intervals this short or shorter are discarded as noise.
    pub min_session: Duration,
}

impl TimingConfig {
    /// Longest interval or delay the loop will wait for. Larger values are capped.
    pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

    /// Caps every value at [`Self::MAX_DELAY`] and periodic intervals below at
    /// one millisecond.
    #[must_use]
    pub fn bounded(self) -> Self {
        let period = |d: Duration| d.clamp(Duration::from_millis(1), Self::MAX_DELAY);
        Self {
            flush_interval: period(self.flush_interval),
            live_refresh: period(self.live_refresh),
            display_poll: period(self.display_poll),
            settle_delay: self.settle_delay.min(Self::MAX_DELAY),
            min_session: self.min_session.min(Self::MAX_DELAY),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(60),
            live_refresh: Duration::from_secs(1),
            display_poll: Duration::from_secs(5),
            settle_delay: Duration::from_secs(1),
            min_session: Duration::from_secs(1),
        }
    }
}

/// Page state sampled when a signal is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ambient {
    pub page_visible: bool,
    pub video_playing: bool,
}

/// Inputs to the transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    VideoPlay,
    VideoPause,
    VideoEnded,
    /// The tab was shown or hidden; the new state is in [`Ambient::page_visible`].
    VisibilityChanged,
    FocusLost,
    FocusGained,
    VideoIdentityChanged,
    Unload,
}

/// The in-progress, not yet flushed interval.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub mode: Mode,
    /// Start of the unflushed interval. Re-stamped by every periodic flush.
    pub started_at: DateTime<Local>,
    /// Stored total for this mode on `baseline_day`, used for live display only.
    pub baseline_minutes: f64,
    pub baseline_day: NaiveDate,
    pub epoch: u64,
}

/// Live totals for presentation. Never written to storage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LiveStatus {
    pub status: TrackerStatus,
    /// Minutes in the current unflushed interval.
    pub session_minutes: f64,
    /// Today's total for the active mode including the unflushed interval.
    pub today_minutes: f64,
    /// [`Tracker::flush_count`] when the status was taken. Stored totals can
    /// only have changed when this moves.
    pub flushes: u64,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingFlush {
    kind: AggregateKind,
    day: NaiveDate,
    minutes: f64,
}

/// Session accounting state machine.
pub struct Tracker {
    aggregates: Arc<Aggregates>,
    clock: Arc<dyn Clock>,
    timing: TimingConfig,
    session: Option<Session>,
    epoch: u64,
    pending: Vec<PendingFlush>,
    flushes: u64,
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("timing", &self.timing)
            .field("session", &self.session)
            .field("epoch", &self.epoch)
            .field("pending", &self.pending)
            .field("flushes", &self.flushes)
            .finish_non_exhaustive()
    }
}

impl Tracker {
    pub fn new(aggregates: Arc<Aggregates>, clock: Arc<dyn Clock>, timing: TimingConfig) -> Self {
        Self {
            aggregates,
            clock,
            timing: timing.bounded(),
            session: None,
            epoch: 0,
            pending: Vec::new(),
            flushes: 0,
        }
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus::from(self.session.as_ref().map(|s| s.mode))
    }

    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub const fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Number of successful writes to the aggregates.
    pub const fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// Minutes waiting for storage to come back.
    pub fn pending_minutes(&self) -> f64 {
        self.pending.iter().map(|p| p.minutes).sum()
    }

    /// The transition function.
    pub async fn handle(&mut self, signal: Signal, ambient: Ambient) {
        tracing::debug!(?signal, ?ambient, status = %self.status(), "handling signal");
        match signal {
            Signal::VideoPlay => {
                let mode = if ambient.page_visible {
                    Mode::Watching
                } else {
                    Mode::Listening
                };
                self.start_session(mode).await;
            }
            Signal::VideoPause
            | Signal::VideoEnded
            | Signal::VideoIdentityChanged
            | Signal::Unload => self.stop_all().await,
            Signal::VisibilityChanged => {
                if ambient.page_visible {
                    self.stop_session(Mode::Listening).await;
                    if ambient.video_playing {
                        self.start_session(Mode::Watching).await;
                    }
                } else {
                    self.stop_session(Mode::Watching).await;
                    if ambient.video_playing {
                        self.start_session(Mode::Listening).await;
                    }
                }
            }
            Signal::FocusLost => {
                if self.status() == TrackerStatus::Watching && ambient.video_playing {
                    self.stop_session(Mode::Watching).await;
                    self.start_session(Mode::Listening).await;
                }
            }
            Signal::FocusGained => {
                if ambient.page_visible && ambient.video_playing {
                    self.stop_session(Mode::Listening).await;
                    self.start_session(Mode::Watching).await;
                }
            }
        }
    }

    /// Corrects a session that no longer matches the page.
    ///
    /// Watching on a hidden page is demoted as if the visibility change had been
    /// observed, and any session without a playing video is stopped.
    pub async fn reconcile(&mut self, ambient: Ambient) {
        match self.status() {
            TrackerStatus::Idle => {}
            _ if !ambient.video_playing => {
                tracing::debug!("video no longer playing, stopping session");
                self.stop_all().await;
            }
            TrackerStatus::Watching if !ambient.page_visible => {
                tracing::debug!("page hidden while watching, switching to listening");
                self.handle(Signal::VisibilityChanged, ambient).await;
            }
            _ => {}
        }
    }

    /// Starts a session, stopping the other mode first. No-op if `mode` is active.
    pub async fn start_session(&mut self, mode: Mode) {
        if let Some(active) = self.session.as_ref().map(|s| s.mode) {
            if active == mode {
                tracing::debug!(%mode, "session already active");
                return;
            }
            self.stop_session(active).await;
        }

        let now = self.clock.now();
        self.epoch += 1;
        let epoch = self.epoch;
        self.session = Some(Session {
            mode,
            started_at: now,
            baseline_minutes: 0.0,
            baseline_day: now.date_naive(),
            epoch,
        });
        tracing::info!(%mode, epoch, "session started");

        let kind = mode.kind();
        let day = now.date_naive();
        match self.aggregates.minutes_on(kind, day).await {
            Ok(stored) => {
                let baseline = stored + self.pending_for(kind, day);
                self.apply_baseline(epoch, baseline);
            }
            Err(err) => {
                tracing::warn!(%err, %mode, "could not load baseline, live totals start from zero");
            }
        }
    }

    /// Stops a session and flushes its elapsed time. No-op if `mode` is not active.
    pub async fn stop_session(&mut self, mode: Mode) {
        let Some(session) = self.session.take_if(|s| s.mode == mode) else {
            return;
        };
        let now = self.clock.now();
        let elapsed = now - session.started_at;
        tracing::info!(
            %mode,
            epoch = session.epoch,
            elapsed_ms = elapsed.num_milliseconds(),
            "session stopped"
        );
        if self.is_countable(elapsed) {
            self.flush(mode.kind(), now.date_naive(), minutes_of(elapsed), now)
                .await;
        } else {
            tracing::debug!(%mode, "discarding sub-threshold session");
        }
    }

    /// Stops whichever session is active.
    pub async fn stop_all(&mut self) {
        self.stop_session(Mode::Watching).await;
        self.stop_session(Mode::Listening).await;
    }

    /// Periodic flush: retries pending writes, then folds the active interval
    /// into storage and restarts it.
    pub async fn tick(&mut self) {
        if !self.pending.is_empty() {
            self.retry_pending().await;
        }

        let now = self.clock.now();
        let threshold = self.threshold();
        let due = match self.session.as_mut() {
            Some(session) if now - session.started_at > threshold => {
                let elapsed = now - session.started_at;
                session.started_at = now;
                Some((session.mode.kind(), elapsed))
            }
            _ => None,
        };
        if let Some((kind, elapsed)) = due {
            self.flush(kind, now.date_naive(), minutes_of(elapsed), now)
                .await;
        }
    }

    /// Adds minutes to one day of an aggregate.
    ///
    /// On success the active session's baseline follows the written total. A
    /// retryable failure keeps the minutes for the next [`Tracker::tick`].
    pub async fn flush(
        &mut self,
        kind: AggregateKind,
        day: NaiveDate,
        minutes: f64,
        now: DateTime<Local>,
    ) {
        match self.aggregates.add_minutes(kind, day, minutes, now).await {
            Ok(total) => {
                self.flushes += 1;
                tracing::debug!(%kind, %day, minutes, total, "flushed");
                self.follow_total(kind, day, total);
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(%err, %kind, minutes, "flush failed, will retry on next tick");
                self.queue_pending(kind, day, minutes);
                let pending = self.pending_for(kind, day);
                if let Some(session) = self.session.as_mut().filter(|s| s.mode.kind() == kind) {
                    if session.baseline_day == day {
                        session.baseline_minutes += minutes;
                    } else {
                        session.baseline_minutes = pending;
                        session.baseline_day = day;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%err, %kind, minutes, "flush failed, dropping interval");
            }
        }
    }

    /// Today's total for `mode` including the unflushed interval.
    pub fn live_minutes(&self, mode: Mode) -> Option<f64> {
        self.session
            .as_ref()
            .filter(|s| s.mode == mode)
            .map(|_| self.live_status().today_minutes)
    }

    pub fn live_status(&self) -> LiveStatus {
        let Some(session) = self.session.as_ref() else {
            return LiveStatus::default();
        };
        let now = self.clock.now();
        let session_minutes = minutes_of(now - session.started_at);
        LiveStatus {
            status: self.status(),
            session_minutes,
            today_minutes: self.baseline_on(session, now.date_naive()) + session_minutes,
            flushes: self.flushes,
        }
    }

    /// The session's baseline if it belongs to `today`. After midnight the old
    /// day's total no longer applies and only minutes still pending for `today` count.
    fn baseline_on(&self, session: &Session, today: NaiveDate) -> f64 {
        if session.baseline_day == today {
            session.baseline_minutes
        } else {
            self.pending_for(session.mode.kind(), today)
        }
    }

    async fn retry_pending(&mut self) {
        let mut pending = std::mem::take(&mut self.pending).into_iter();
        while let Some(item) = pending.next() {
            let now = self.clock.now();
            match self
                .aggregates
                .add_minutes(item.kind, item.day, item.minutes, now)
                .await
            {
                Ok(total) => {
                    self.flushes += 1;
                    tracing::info!(kind = %item.kind, day = %item.day, minutes = item.minutes, "pending flush written");
                    self.follow_total(item.kind, item.day, total);
                }
                Err(err) if err.is_retryable() => {
                    tracing::debug!(%err, "storage still unavailable");
                    self.pending.push(item);
                    self.pending.extend(pending);
                    return;
                }
                Err(err) => {
                    tracing::warn!(%err, kind = %item.kind, "dropping pending flush");
                }
            }
        }
    }

    fn queue_pending(&mut self, kind: AggregateKind, day: NaiveDate, minutes: f64) {
        if let Some(existing) = self
            .pending
            .iter_mut()
            .find(|p| p.kind == kind && p.day == day)
        {
            existing.minutes += minutes;
        } else {
            self.pending.push(PendingFlush { kind, day, minutes });
        }
    }

    fn pending_for(&self, kind: AggregateKind, day: NaiveDate) -> f64 {
        self.pending
            .iter()
            .filter(|p| p.kind == kind && p.day == day)
            .map(|p| p.minutes)
            .sum()
    }

    fn follow_total(&mut self, kind: AggregateKind, day: NaiveDate, total: f64) {
        let pending = self.pending_for(kind, day);
        if let Some(session) = self
            .session
            .as_mut()
            .filter(|s| s.mode.kind() == kind && s.started_at.date_naive() == day)
        {
            session.baseline_minutes = total + pending;
            session.baseline_day = day;
        }
    }

    fn apply_baseline(&mut self, epoch: u64, baseline: f64) {
        match self.session.as_mut() {
            Some(session) if session.epoch == epoch => session.baseline_minutes = baseline,
            _ => tracing::debug!(epoch, "discarding baseline for a stale session"),
        }
    }

    fn threshold(&self) -> TimeDelta {
        TimeDelta::from_std(self.timing.min_session).unwrap_or_else(|_| TimeDelta::zero())
    }

    fn is_countable(&self, elapsed: TimeDelta) -> bool {
        elapsed > self.threshold()
    }
}

#[allow(clippy::cast_precision_loss)]
fn minutes_of(elapsed: TimeDelta) -> f64 {
    elapsed.num_milliseconds().max(0) as f64 / 60_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    const VISIBLE_PLAYING: Ambient = Ambient {
        page_visible: true,
        video_playing: true,
    };
    const HIDDEN_PLAYING: Ambient = Ambient {
        page_visible: false,
        video_playing: true,
    };
    const VISIBLE_PAUSED: Ambient = Ambient {
        page_visible: true,
        video_playing: false,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        aggregates: Arc<Aggregates>,
        clock: Arc<ManualClock>,
        tracker: Tracker,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let aggregates = Arc::new(Aggregates::new(store.clone()));
        let start = Local.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let tracker = Tracker::new(aggregates.clone(), clock.clone(), TimingConfig::default());
        Fixture {
            store,
            aggregates,
            clock,
            tracker,
        }
    }

    impl Fixture {
        fn advance_secs(&self, secs: i64) {
            self.clock.advance(TimeDelta::seconds(secs));
        }

        async fn stored(&self, kind: AggregateKind) -> f64 {
            let today = self.clock.now().date_naive();
            self.aggregates.minutes_on(kind, today).await.unwrap()
        }
    }

    fn assert_minutes(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected} minutes, got {actual}"
        );
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut f = fixture();
        f.tracker.start_session(Mode::Watching).await;
        let first = f.tracker.session().cloned().unwrap();

        f.advance_secs(5);
        f.tracker.start_session(Mode::Watching).await;
        let second = f.tracker.session().cloned().unwrap();

        assert_eq!(first, second);
        assert_eq!(f.tracker.status(), TrackerStatus::Watching);
    }

    #[tokio::test]
    async fn test_stop_of_inactive_mode_is_a_no_op() {
        let mut f = fixture();
        f.tracker.start_session(Mode::Watching).await;
        f.advance_secs(30);

        f.tracker.stop_session(Mode::Listening).await;

        assert_eq!(f.tracker.status(), TrackerStatus::Watching);
        assert_minutes(f.stored(AggregateKind::Watch).await, 0.0);
        assert_eq!(f.tracker.flush_count(), 0);
    }

    #[tokio::test]
    async fn test_starting_one_mode_stops_the_other() {
        let mut f = fixture();
        f.tracker.start_session(Mode::Watching).await;
        f.advance_secs(30);

        f.tracker.start_session(Mode::Listening).await;

        assert_eq!(f.tracker.status(), TrackerStatus::Listening);
        assert_minutes(f.stored(AggregateKind::Watch).await, 0.5);
        assert_minutes(f.stored(AggregateKind::Listen).await, 0.0);
    }

    #[tokio::test]
    async fn test_periodic_flushes_do_not_double_count() {
        let mut f = fixture();
        f.tracker.start_session(Mode::Watching).await;

        for _ in 0..5 {
            f.advance_secs(60);
            f.tracker.tick().await;
        }
        f.advance_secs(30);
        f.tracker.stop_session(Mode::Watching).await;

        assert_minutes(f.stored(AggregateKind::Watch).await, 5.5);
        assert_eq!(f.tracker.flush_count(), 6);
    }

    #[tokio::test]
    async fn test_tick_restamps_start_and_tracks_baseline() {
        let mut f = fixture();
        f.tracker.start_session(Mode::Listening).await;
        f.advance_secs(90);
        f.tracker.tick().await;

        let session = f.tracker.session().unwrap();
        assert_eq!(session.started_at, f.clock.now());
        assert_minutes(session.baseline_minutes, 1.5);
        assert_minutes(f.tracker.live_minutes(Mode::Listening).unwrap(), 1.5);
    }

    #[tokio::test]
    async fn test_sub_second_sessions_are_discarded() {
        let mut f = fixture();
        f.tracker.start_session(Mode::Watching).await;
        f.clock.advance(TimeDelta::milliseconds(500));
        f.tracker.stop_session(Mode::Watching).await;

        f.tracker.start_session(Mode::Watching).await;
        f.advance_secs(1);
        f.tracker.stop_session(Mode::Watching).await;

        assert_eq!(f.tracker.flush_count(), 0);
        assert!(f.store.raw("watchAggregate").is_none());
    }

    #[tokio::test]
    async fn test_tick_below_threshold_keeps_interval_open() {
        let mut f = fixture();
        f.tracker.start_session(Mode::Watching).await;
        let started = f.tracker.session().unwrap().started_at;
        f.clock.advance(TimeDelta::milliseconds(800));

        f.tracker.tick().await;

        assert_eq!(f.tracker.session().unwrap().started_at, started);
        assert_eq!(f.tracker.flush_count(), 0);
    }

    #[tokio::test]
    async fn test_baseline_is_loaded_at_start() {
        let mut f = fixture();
        let today = f.clock.now().date_naive();
        f.aggregates
            .add_minutes(AggregateKind::Watch, today, 42.0, f.clock.now())
            .await
            .unwrap();

        f.tracker.start_session(Mode::Watching).await;
        f.advance_secs(30);

        assert_minutes(f.tracker.session().unwrap().baseline_minutes, 42.0);
        assert_minutes(f.tracker.live_minutes(Mode::Watching).unwrap(), 42.5);
        assert!(f.tracker.live_minutes(Mode::Listening).is_none());

        let live = f.tracker.live_status();
        assert_eq!(live.status, TrackerStatus::Watching);
        assert_minutes(live.session_minutes, 0.5);
        assert_minutes(live.today_minutes, 42.5);
    }

    #[tokio::test]
    async fn test_play_starts_watching_or_listening_by_visibility() {
        let mut f = fixture();
        f.tracker.handle(Signal::VideoPlay, VISIBLE_PLAYING).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Watching);

        f.tracker.handle(Signal::VideoPause, VISIBLE_PAUSED).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Idle);

        f.tracker.handle(Signal::VideoPlay, HIDDEN_PLAYING).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Listening);

        f.tracker.handle(Signal::VideoEnded, HIDDEN_PLAYING).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Idle);
    }

    #[tokio::test]
    async fn test_hiding_a_paused_video_goes_idle() {
        let mut f = fixture();
        f.tracker.start_session(Mode::Watching).await;
        f.advance_secs(10);

        let hidden_paused = Ambient {
            page_visible: false,
            video_playing: false,
        };
        f.tracker.handle(Signal::VisibilityChanged, hidden_paused).await;

        assert_eq!(f.tracker.status(), TrackerStatus::Idle);
        assert_minutes(f.stored(AggregateKind::Watch).await, 10.0 / 60.0);
    }

    #[tokio::test]
    async fn test_visibility_round_trip_switches_modes_and_flushes() {
        let mut f = fixture();
        f.tracker.handle(Signal::VideoPlay, VISIBLE_PLAYING).await;
        f.advance_secs(120);

        f.tracker.handle(Signal::VisibilityChanged, HIDDEN_PLAYING).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Listening);
        assert_minutes(f.stored(AggregateKind::Watch).await, 2.0);

        f.advance_secs(60);
        f.tracker.handle(Signal::VisibilityChanged, VISIBLE_PLAYING).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Watching);
        assert_minutes(f.stored(AggregateKind::Listen).await, 1.0);
        // New watch session re-read its baseline after the earlier flush.
        assert_minutes(f.tracker.session().unwrap().baseline_minutes, 2.0);

        f.advance_secs(60);
        f.tracker.handle(Signal::VisibilityChanged, HIDDEN_PLAYING).await;
        f.advance_secs(60);
        f.tracker.handle(Signal::VisibilityChanged, VISIBLE_PAUSED).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Idle);
        assert_minutes(f.stored(AggregateKind::Watch).await, 3.0);
        assert_minutes(f.stored(AggregateKind::Listen).await, 2.0);
    }

    #[tokio::test]
    async fn test_focus_loss_moves_watching_to_listening() {
        let mut f = fixture();
        f.tracker.handle(Signal::VideoPlay, VISIBLE_PLAYING).await;
        f.advance_secs(60);

        f.tracker.handle(Signal::FocusLost, VISIBLE_PLAYING).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Listening);
        assert_minutes(f.stored(AggregateKind::Watch).await, 1.0);

        f.advance_secs(60);
        f.tracker.handle(Signal::FocusGained, VISIBLE_PLAYING).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Watching);
        assert_minutes(f.stored(AggregateKind::Listen).await, 1.0);
    }

    #[tokio::test]
    async fn test_focus_gain_on_hidden_page_changes_nothing() {
        let mut f = fixture();
        f.tracker.handle(Signal::VideoPlay, HIDDEN_PLAYING).await;

        f.tracker.handle(Signal::FocusGained, HIDDEN_PLAYING).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Listening);

        f.tracker.handle(Signal::FocusLost, HIDDEN_PLAYING).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Listening);
    }

    #[tokio::test]
    async fn test_video_identity_change_flushes_and_idles() {
        let mut f = fixture();
        f.tracker.handle(Signal::VideoPlay, VISIBLE_PLAYING).await;
        let epoch = f.tracker.session().unwrap().epoch;
        f.advance_secs(45);

        f.tracker.handle(Signal::VideoIdentityChanged, VISIBLE_PLAYING).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Idle);
        assert_minutes(f.stored(AggregateKind::Watch).await, 0.75);

        f.tracker.handle(Signal::VideoPlay, VISIBLE_PLAYING).await;
        let session = f.tracker.session().unwrap();
        assert!(session.epoch > epoch);
        assert_minutes(session.baseline_minutes, 0.75);
    }

    #[tokio::test]
    async fn test_unload_flushes_active_session() {
        let mut f = fixture();
        f.tracker.handle(Signal::VideoPlay, HIDDEN_PLAYING).await;
        f.advance_secs(15);

        f.tracker.handle(Signal::Unload, HIDDEN_PLAYING).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Idle);
        assert_minutes(f.stored(AggregateKind::Listen).await, 0.25);
    }

    #[tokio::test]
    async fn test_reconcile_demotes_watching_on_hidden_page() {
        let mut f = fixture();
        f.tracker.handle(Signal::VideoPlay, VISIBLE_PLAYING).await;
        f.advance_secs(6);

        f.tracker.reconcile(HIDDEN_PLAYING).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Listening);

        f.advance_secs(6);
        f.tracker.reconcile(VISIBLE_PAUSED).await;
        assert_eq!(f.tracker.status(), TrackerStatus::Idle);
        assert_minutes(f.stored(AggregateKind::Watch).await, 0.1);
        assert_minutes(f.stored(AggregateKind::Listen).await, 0.1);
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried_on_next_tick() {
        let mut f = fixture();
        f.tracker.start_session(Mode::Watching).await;
        f.advance_secs(60);

        f.store.set_offline(true);
        f.tracker.stop_session(Mode::Watching).await;
        assert_minutes(f.tracker.pending_minutes(), 1.0);

        f.tracker.tick().await;
        assert_minutes(f.tracker.pending_minutes(), 1.0);

        f.store.set_offline(false);
        f.tracker.tick().await;
        assert_minutes(f.tracker.pending_minutes(), 0.0);
        assert_minutes(f.stored(AggregateKind::Watch).await, 1.0);
    }

    #[tokio::test]
    async fn test_failed_periodic_flush_keeps_live_total_continuous() {
        let mut f = fixture();
        f.tracker.start_session(Mode::Listening).await;
        f.advance_secs(60);
        f.store.set_offline(true);
        f.tracker.tick().await;

        f.advance_secs(30);
        assert_minutes(f.tracker.live_minutes(Mode::Listening).unwrap(), 1.5);

        f.store.set_offline(false);
        f.advance_secs(30);
        f.tracker.tick().await;
        assert_minutes(f.stored(AggregateKind::Listen).await, 2.0);
        assert_minutes(f.tracker.live_minutes(Mode::Listening).unwrap(), 2.0);
    }

    #[tokio::test]
    async fn test_live_total_starts_over_at_midnight() {
        let mut f = fixture();
        let day1 = f.clock.now().date_naive();
        f.aggregates
            .add_minutes(AggregateKind::Watch, day1, 100.0, f.clock.now())
            .await
            .unwrap();
        f.clock
            .set(Local.with_ymd_and_hms(2025, 3, 14, 23, 59, 30).unwrap());

        f.tracker.start_session(Mode::Watching).await;
        assert_minutes(f.tracker.live_status().today_minutes, 100.0);

        f.advance_secs(60);
        let day2 = f.clock.now().date_naive();
        assert_ne!(day1, day2);
        assert_minutes(f.tracker.live_status().today_minutes, 1.0);
        assert_minutes(f.tracker.live_minutes(Mode::Watching).unwrap(), 1.0);

        f.tracker.tick().await;
        assert_minutes(f.aggregates.minutes_on(AggregateKind::Watch, day2).await.unwrap(), 1.0);
        assert_minutes(f.aggregates.minutes_on(AggregateKind::Watch, day1).await.unwrap(), 100.0);
        let session = f.tracker.session().unwrap();
        assert_eq!(session.baseline_day, day2);
        assert_minutes(f.tracker.live_status().today_minutes, 1.0);
    }

    #[tokio::test]
    async fn test_failed_flush_after_midnight_rebases_live_total() {
        let mut f = fixture();
        f.clock
            .set(Local.with_ymd_and_hms(2025, 3, 14, 23, 59, 0).unwrap());
        let day1 = f.clock.now().date_naive();
        f.aggregates
            .add_minutes(AggregateKind::Listen, day1, 30.0, f.clock.now())
            .await
            .unwrap();
        f.tracker.start_session(Mode::Listening).await;

        f.advance_secs(120);
        f.store.set_offline(true);
        f.tracker.tick().await;

        assert_minutes(f.tracker.pending_minutes(), 2.0);
        assert_minutes(f.tracker.live_status().today_minutes, 2.0);
    }

    #[test]
    fn test_timing_is_bounded() {
        let huge = Duration::from_millis(u64::MAX);
        let timing = TimingConfig {
            flush_interval: Duration::ZERO,
            live_refresh: huge,
            display_poll: huge,
            settle_delay: huge,
            min_session: huge,
        }
        .bounded();
        assert_eq!(timing.flush_interval, Duration::from_millis(1));
        assert_eq!(timing.live_refresh, TimingConfig::MAX_DELAY);
        assert_eq!(timing.settle_delay, TimingConfig::MAX_DELAY);
        assert_eq!(timing.min_session, TimingConfig::MAX_DELAY);
        assert_eq!(TimingConfig::default().bounded(), TimingConfig::default());
    }

    #[tokio::test]
    async fn test_unavailable_baseline_starts_from_zero() {
        let mut f = fixture();
        f.store.set_offline(true);

        f.tracker.start_session(Mode::Watching).await;

        assert_eq!(f.tracker.status(), TrackerStatus::Watching);
        assert_minutes(f.tracker.session().unwrap().baseline_minutes, 0.0);
    }
}

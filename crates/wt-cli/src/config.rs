//! Configuration loading and management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use wt_core::TimingConfig;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Seconds between periodic flushes of an active session.
    pub flush_interval_secs: u64,
    /// Seconds between live total refreshes.
    pub live_refresh_secs: u64,
    /// Seconds between re-renders of `wt stats --follow`.
    pub display_poll_secs: u64,
    /// Milliseconds to wait for a new video element to mount.
    pub settle_delay_ms: u64,
    /// Sessions this long or shorter are discarded.
    pub min_session_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        let timing = TimingConfig::default();
        Self {
            database_path: data_dir.join("wt.db"),
            flush_interval_secs: timing.flush_interval.as_secs(),
            live_refresh_secs: timing.live_refresh.as_secs(),
            display_poll_secs: timing.display_poll.as_secs(),
            settle_delay_ms: duration_millis(timing.settle_delay),
            min_session_ms: duration_millis(timing.min_session),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (WT_*)
        figment = figment.merge(Env::prefixed("WT_"));

        figment.extract()
    }

    /// Tracker intervals. Periodic intervals are at least one second and no
    /// value exceeds [`TimingConfig::MAX_DELAY`].
    pub fn timing(&self) -> TimingConfig {
        let max_secs = TimingConfig::MAX_DELAY.as_secs();
        let max_millis = duration_millis(TimingConfig::MAX_DELAY);
        TimingConfig {
            flush_interval: Duration::from_secs(self.flush_interval_secs.clamp(1, max_secs)),
            live_refresh: Duration::from_secs(self.live_refresh_secs.clamp(1, max_secs)),
            display_poll: Duration::from_secs(self.display_poll_secs.clamp(1, max_secs)),
            settle_delay: Duration::from_millis(self.settle_delay_ms.min(max_millis)),
            min_session: Duration::from_millis(self.min_session_ms.min(max_millis)),
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Returns the platform-specific config directory for wt.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("wt"))
}

/// Returns the platform-specific data directory for wt.
///
/// On Linux: `~/.local/share/wt`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("wt"))
}

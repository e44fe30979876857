//! Video/page signal monitor.
//!
//! Translates page observations into [`Tracker`] signals. The monitor owns
//! the page and the tracker, remembers which video it is tracking and which
//! element it listens to, and re-arms after a settle delay whenever the page
//! switches to another video.

use tokio::time::Instant;

use crate::driver::deadline_after;
use crate::page::{HostPage, VideoEvent};
use crate::tracker::{Ambient, Signal, Tracker, TrackerStatus};
use crate::types::{ElementId, VideoId};

pub struct SignalMonitor<P> {
    page: P,
    tracker: Tracker,
    last_url: Option<String>,
    video_id: Option<VideoId>,
    attached: Option<ElementId>,
    settle_at: Option<Instant>,
}

impl<P: HostPage> SignalMonitor<P> {
    pub const fn new(page: P, tracker: Tracker) -> Self {
        Self {
            page,
            tracker,
            last_url: None,
            video_id: None,
            attached: None,
            settle_at: None,
        }
    }

    pub const fn page(&self) -> &P {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut P {
        &mut self.page
    }

    pub const fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub const fn video_id(&self) -> Option<&VideoId> {
        self.video_id.as_ref()
    }

    pub const fn attached(&self) -> Option<ElementId> {
        self.attached
    }

    /// When the pending re-arm is due.
    pub const fn settle_deadline(&self) -> Option<Instant> {
        self.settle_at
    }

    /// Snapshot of the page for the transition function.
    pub fn ambient(&self) -> Ambient {
        Ambient {
            page_visible: self.page.is_page_visible(),
            video_playing: self
                .attached
                .is_some_and(|element| self.page.is_video_playing(element)),
        }
    }

    /// The document changed.
    ///
    /// A new location is re-evaluated with [`Self::check_page`]. Otherwise a
    /// watch page whose mounted element differs from the attached one is
    /// re-armed, unless a settle is already pending.
    pub async fn on_mutation(&mut self) {
        let url = self.page.current_url().map(str::to_owned);
        if url != self.last_url {
            self.last_url = url;
            self.check_page().await;
            return;
        }
        if self.settle_at.is_some() || !self.page.is_watch_page() {
            return;
        }
        if self.page.find_video() != self.attached {
            tracing::debug!("video element changed, re-arming");
            self.arm().await;
        }
    }

    /// Re-evaluates the current location.
    pub async fn check_page(&mut self) {
        if !self.page.is_watch_page() {
            if let Some(previous) = self.video_id.take() {
                tracing::info!(video = %previous, "left watch page");
            }
            self.settle_at = None;
            self.tracker.stop_all().await;
            self.detach();
            return;
        }

        let current = self.page.current_video_id();
        if current == self.video_id {
            if self.settle_at.is_none() {
                self.arm().await;
            }
            return;
        }

        tracing::info!(
            video = current.as_ref().map_or("-", VideoId::as_str),
            "new video"
        );
        let ambient = self.ambient();
        self.tracker
            .handle(Signal::VideoIdentityChanged, ambient)
            .await;
        self.detach();
        self.video_id = current;
        self.settle_at = Some(deadline_after(self.tracker.timing().settle_delay));
    }

    /// The settle delay after a video change has passed.
    pub async fn on_settle_elapsed(&mut self) {
        if self.settle_at.take().is_none() {
            return;
        }
        if self.page.is_watch_page() {
            self.arm().await;
        }
    }

    pub async fn on_video_event(&mut self, element: ElementId, event: VideoEvent) {
        if self.attached != Some(element) {
            tracing::debug!(%element, ?event, "ignoring event from detached element");
            return;
        }
        let signal = match event {
            VideoEvent::Play => Signal::VideoPlay,
            VideoEvent::Pause => Signal::VideoPause,
            VideoEvent::Ended => Signal::VideoEnded,
        };
        let ambient = self.ambient();
        self.tracker.handle(signal, ambient).await;
    }

    pub async fn on_visibility_change(&mut self) {
        let ambient = self.ambient();
        self.tracker
            .handle(Signal::VisibilityChanged, ambient)
            .await;
    }

    pub async fn on_focus_change(&mut self, focused: bool) {
        let signal = if focused {
            Signal::FocusGained
        } else {
            Signal::FocusLost
        };
        let ambient = self.ambient();
        self.tracker.handle(signal, ambient).await;
    }

    pub async fn on_unload(&mut self) {
        self.settle_at = None;
        let ambient = self.ambient();
        self.tracker.handle(Signal::Unload, ambient).await;
        self.detach();
    }

    pub async fn tick(&mut self) {
        self.tracker.tick().await;
    }

    pub async fn reconcile(&mut self) {
        let ambient = self.ambient();
        self.tracker.reconcile(ambient).await;
    }

    /// Attaches to the mounted element and starts a session if it is already playing.
    async fn arm(&mut self) {
        let found = self.page.find_video();
        if found != self.attached {
            if self.attached.is_some() {
                self.tracker.stop_all().await;
            }
            self.detach();
            if let Some(element) = found {
                self.page.attach_listeners(element);
                self.attached = Some(element);
                tracing::debug!(%element, "listeners attached");
            }
        }

        if found.is_none() {
            tracing::debug!("no video element mounted yet");
            return;
        }

        let ambient = self.ambient();
        if ambient.video_playing && self.tracker.status() == TrackerStatus::Idle {
            self.tracker.handle(Signal::VideoPlay, ambient).await;
        }
    }

    fn detach(&mut self) {
        if let Some(element) = self.attached.take() {
            self.page.detach_listeners(element);
            tracing::debug!(%element, "listeners detached");
        }
    }
}

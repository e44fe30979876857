//! Host page seam.
//!
//! The monitor never touches a real document. It asks a [`HostPage`] where the
//! page is, whether it is visible and which video element is mounted, and it
//! tells the page when to attach or detach playback listeners.
//!
//! [`ReportedPage`] is the implementation used by `wt track`: a browser-side
//! bridge reports page changes as JSON lines ([`HostEvent`]) and the page
//! state is mirrored from them.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{ElementId, VideoId};

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i:[a-z][a-z0-9+.\-]*://[^/?#]*)?(?P<path>[^?#]*)")
        .expect("path regex is valid")
});

static VIDEO_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]v=(?P<id>[^&#]+)").expect("video param regex is valid"));

/// Whether `url` points at a single-video page.
pub fn is_watch_page(url: &str) -> bool {
    PATH_RE
        .captures(url)
        .and_then(|caps| caps.name("path"))
        .is_some_and(|path| path.as_str() == "/watch")
}

/// Extracts the `v` query parameter.
pub fn video_id_from_url(url: &str) -> Option<VideoId> {
    let query_start = url.find('?')?;
    let caps = VIDEO_PARAM_RE.captures(&url[query_start..])?;
    VideoId::new(caps.name("id")?.as_str()).ok()
}

/// Queries and listener control the monitor needs from the host page.
pub trait HostPage {
    fn current_url(&self) -> Option<&str>;

    fn is_page_visible(&self) -> bool;

    /// The video element currently mounted, if any.
    fn find_video(&self) -> Option<ElementId>;

    fn is_video_playing(&self, element: ElementId) -> bool;

    /// Subscribes to play/pause/ended events of `element`.
    fn attach_listeners(&mut self, element: ElementId);

    fn detach_listeners(&mut self, element: ElementId);

    fn is_watch_page(&self) -> bool {
        self.current_url().is_some_and(is_watch_page)
    }

    /// Identifier of the video on a watch page.
    fn current_video_id(&self) -> Option<VideoId> {
        if !self.is_watch_page() {
            return None;
        }
        self.current_url().and_then(video_id_from_url)
    }
}

/// Playback event emitted by a video element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEvent {
    Play,
    Pause,
    Ended,
}

/// A page change reported by the browser-side bridge, one JSON object per line.
///
/// ```text
/// {"type":"navigated","url":"https://www.youtube.com/watch?v=abc"}
/// {"type":"video_mounted","element":1,"playing":false}
/// {"type":"play","element":1}
/// {"type":"visibility","visible":false}
/// {"type":"unload"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    Navigated {
        url: String,
    },
    Visibility {
        visible: bool,
    },
    Focus {
        focused: bool,
    },
    VideoMounted {
        element: ElementId,
        #[serde(default)]
        playing: bool,
    },
    VideoRemoved,
    Play {
        element: ElementId,
    },
    Pause {
        element: ElementId,
    },
    Ended {
        element: ElementId,
    },
    Unload,
}

impl HostEvent {
    /// The element and event for playback events.
    pub const fn video_event(&self) -> Option<(ElementId, VideoEvent)> {
        match *self {
            Self::Play { element } => Some((element, VideoEvent::Play)),
            Self::Pause { element } => Some((element, VideoEvent::Pause)),
            Self::Ended { element } => Some((element, VideoEvent::Ended)),
            _ => None,
        }
    }

    /// Whether the event changes the document structure or location.
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Navigated { .. } | Self::VideoMounted { .. } | Self::VideoRemoved
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MountedVideo {
    element: ElementId,
    playing: bool,
}

/// Page state mirrored from [`HostEvent`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedPage {
    url: Option<String>,
    visible: bool,
    video: Option<MountedVideo>,
    attached: Option<ElementId>,
}

impl Default for ReportedPage {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportedPage {
    /// A blank, visible page.
    pub const fn new() -> Self {
        Self {
            url: None,
            visible: true,
            video: None,
            attached: None,
        }
    }

    pub fn apply(&mut self, event: &HostEvent) {
        match event {
            HostEvent::Navigated { url } => self.url = Some(url.clone()),
            HostEvent::Visibility { visible } => self.visible = *visible,
            HostEvent::VideoMounted { element, playing } => {
                self.video = Some(MountedVideo {
                    element: *element,
                    playing: *playing,
                });
            }
            HostEvent::VideoRemoved => self.video = None,
            HostEvent::Play { element } => self.set_playing(*element, true),
            HostEvent::Pause { element } | HostEvent::Ended { element } => {
                self.set_playing(*element, false);
            }
            HostEvent::Focus { .. } | HostEvent::Unload => {}
        }
    }

    /// Element whose listeners are attached.
    pub const fn attached(&self) -> Option<ElementId> {
        self.attached
    }

    fn set_playing(&mut self, element: ElementId, playing: bool) {
        match self.video.as_mut() {
            Some(video) if video.element == element => video.playing = playing,
            _ => tracing::debug!(%element, "playback event for unmounted element"),
        }
    }
}

impl HostPage for ReportedPage {
    fn current_url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn is_page_visible(&self) -> bool {
        self.visible
    }

    fn find_video(&self) -> Option<ElementId> {
        self.video.map(|v| v.element)
    }

    fn is_video_playing(&self, element: ElementId) -> bool {
        self.video
            .is_some_and(|v| v.element == element && v.playing)
    }

    fn attach_listeners(&mut self, element: ElementId) {
        self.attached = Some(element);
    }

    fn detach_listeners(&mut self, element: ElementId) {
        if self.attached == Some(element) {
            self.attached = None;
        }
    }
}

//! Perpetual playback loop.
//!
//! The scheduler owns a [`SchedulerState`] (current playlist plus index) and cycles through
//! it forever, picking up whatever playlist was most recently published on its watch
//! channel. An empty playlist keeps it idle; a failing iteration is logged and retried
//! after a short backoff without losing the playback position.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::types::{ContentKind, PlayableItem, PlayerConfig, ScaleMode};

/// Rendering backend the scheduler drives. Paths are local cache files, pages are URLs.
#[async_trait]
pub trait Surface: Send + Sync {
    /// Size and place the player window. Backends without a window can ignore it.
    async fn apply_window(&self, _config: &PlayerConfig) -> Result<()> { Ok(()) }
    /// Nothing to play: show the waiting screen.
    async fn show_idle(&self) -> Result<()>;
    async fn show_image(&self, path: &str, scale: ScaleMode) -> Result<()>;
    /// Set the video source; resolves once the backend reports its data loaded.
    async fn load_video(&self, path: &str, scale: ScaleMode) -> Result<()>;
    async fn play_video(&self) -> Result<()>;
    async fn show_page(&self, url: &str) -> Result<()>;
    async fn blank(&self) -> Result<()>;
    async fn pause_media(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Playing(usize),
}

/// Outcome of one [`Scheduler::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    Idle,
    Played(usize),
    /// The item at this index could not be loaded and was passed over.
    Skipped(usize),
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    playlist: Vec<PlayableItem>,
    index: usize,
}

impl SchedulerState {
    pub fn new(playlist: Vec<PlayableItem>) -> Self { Self { playlist, index: 0 } }

    /// Swap in a new playlist, wrapping the index into its bounds.
    pub fn replace_playlist(&mut self, playlist: Vec<PlayableItem>) {
        self.playlist = playlist;
        self.index = if self.playlist.is_empty() { 0 } else { self.index % self.playlist.len() };
    }

    pub fn playlist(&self) -> &[PlayableItem] { &self.playlist }
    pub fn index(&self) -> usize { self.index }
    pub fn current(&self) -> Option<&PlayableItem> { self.playlist.get(self.index) }

    pub fn advance(&mut self) {
        if !self.playlist.is_empty() {
            self.index = (self.index + 1) % self.playlist.len();
        }
    }

    pub fn phase(&self) -> Phase {
        if self.playlist.is_empty() { Phase::Idle } else { Phase::Playing(self.index) }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerTiming {
    /// Re-check interval while the playlist is empty.
    pub idle_interval: Duration,
    /// Pause after a failed iteration.
    pub error_backoff: Duration,
    /// Ceiling on waiting for a video to report it is ready.
    pub video_load_timeout: Duration,
}

impl Default for SchedulerTiming {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
            video_load_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Scheduler<S> {
    surface: S,
    playlists: watch::Receiver<Vec<PlayableItem>>,
    state: SchedulerState,
    timing: SchedulerTiming,
    idle_shown: bool,
}

impl<S: Surface> Scheduler<S> {
    pub fn new(surface: S, mut playlists: watch::Receiver<Vec<PlayableItem>>, timing: SchedulerTiming) -> Self {
        let state = SchedulerState::new(playlists.borrow_and_update().clone());
        Self { surface, playlists, state, timing, idle_shown: false }
    }

    pub fn state(&self) -> &SchedulerState { &self.state }
    pub fn phase(&self) -> Phase { self.state.phase() }
    pub fn surface(&self) -> &S { &self.surface }

    /// Play forever. Failed iterations back off and resume at the same position.
    pub async fn run(mut self) {
        loop {
            if let Err(e) = self.step().await {
                error!(error = %e, index = self.state.index(), "playback iteration failed");
                tokio::time::sleep(self.timing.error_backoff).await;
            }
        }
    }

    /// One playback iteration: show the current item for its duration, then advance.
    pub async fn step(&mut self) -> Result<Iteration> {
        self.take_latest_playlist();

        let Some(item) = self.state.current().cloned() else {
            if !self.idle_shown {
                self.surface.show_idle().await?;
                self.idle_shown = true;
            }
            tokio::time::sleep(self.timing.idle_interval).await;
            return Ok(Iteration::Idle);
        };
        self.idle_shown = false;
        let index = self.state.index();

        match self.present(&item).await {
            Ok(()) => {}
            Err(e @ Error::MediaLoad { .. }) => {
                warn!(url = %item.url, error = %e, "skipping item");
                if let Err(e) = self.surface.pause_media().await {
                    debug!(error = %e, "could not clear media after failed load");
                }
                self.state.advance();
                // A playlist of nothing but broken media must still yield
                tokio::time::sleep(self.timing.error_backoff).await;
                return Ok(Iteration::Skipped(index));
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(item.duration).await;
        if item.kind == ContentKind::Video {
            self.surface.pause_media().await?;
        }
        self.state.advance();
        Ok(Iteration::Played(index))
    }

    fn take_latest_playlist(&mut self) {
        // A closed channel just means no further updates
        if self.playlists.has_changed().unwrap_or(false) {
            let playlist = self.playlists.borrow_and_update().clone();
            debug!(items = playlist.len(), "received playlist");
            self.state.replace_playlist(playlist);
        }
    }

    async fn present(&self, item: &PlayableItem) -> Result<()> {
        debug!(url = %item.url, kind = %item.kind, "presenting");
        match &item.kind {
            ContentKind::Image => self.surface.show_image(&item.source, item.scale).await,
            ContentKind::Video => {
                let load = self.surface.load_video(&item.source, item.scale);
                match tokio::time::timeout(self.timing.video_load_timeout, load).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        return Err(Error::MediaLoad { url: item.url.clone(), reason: e.to_string() });
                    }
                    Err(_) => {
                        return Err(Error::MediaLoad {
                            url: item.url.clone(),
                            reason: format!("not ready after {:?}", self.timing.video_load_timeout),
                        });
                    }
                }
                self.surface.play_video().await
            }
            ContentKind::EmbeddedPage => self.surface.show_page(&item.source).await,
            ContentKind::Other(kind) => {
                warn!(url = %item.url, %kind, "unknown content type, showing blank");
                self.surface.blank().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Default)]
    struct FakeSurface {
        events: Mutex<Vec<String>>,
        stall_videos: AtomicBool,
        fail_videos: AtomicBool,
        fail_next_image: AtomicBool,
    }

    impl FakeSurface {
        fn record(&self, event: String) { self.events.lock().unwrap().push(event); }
        fn events(&self) -> Vec<String> { self.events.lock().unwrap().clone() }
    }

    #[async_trait]
    impl Surface for Arc<FakeSurface> {
        async fn show_idle(&self) -> Result<()> { self.record("idle".into()); Ok(()) }
        async fn show_image(&self, path: &str, scale: ScaleMode) -> Result<()> {
            if self.fail_next_image.swap(false, Ordering::SeqCst) {
                return Err(Error::Surface("image element missing".into()));
            }
            self.record(format!("image {path} {scale:?}"));
            Ok(())
        }
        async fn load_video(&self, path: &str, _scale: ScaleMode) -> Result<()> {
            if self.stall_videos.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.fail_videos.load(Ordering::SeqCst) {
                return Err(Error::Surface(format!("cannot decode {path}")));
            }
            self.record(format!("load {path}"));
            Ok(())
        }
        async fn play_video(&self) -> Result<()> { self.record("play".into()); Ok(()) }
        async fn show_page(&self, url: &str) -> Result<()> { self.record(format!("page {url}")); Ok(()) }
        async fn blank(&self) -> Result<()> { self.record("blank".into()); Ok(()) }
        async fn pause_media(&self) -> Result<()> { self.record("pause".into()); Ok(()) }
    }

    fn playable(url: &str, kind: ContentKind, secs: u64) -> PlayableItem {
        PlayableItem {
            url: url.to_string(),
            kind,
            duration: Duration::from_secs(secs),
            scale: ScaleMode::Contain,
            position: 0,
            source: url.to_string(),
        }
    }

    fn scheduler(list: Vec<PlayableItem>) -> (Arc<FakeSurface>, watch::Sender<Vec<PlayableItem>>, Scheduler<Arc<FakeSurface>>) {
        let surface = Arc::new(FakeSurface::default());
        let (tx, rx) = watch::channel(list);
        let sched = Scheduler::new(surface.clone(), rx, SchedulerTiming::default());
        (surface, tx, sched)
    }

    #[test]
    fn state_wraps_index_on_replace() {
        let mut state = SchedulerState::new(vec![
            playable("a", ContentKind::Image, 1),
            playable("b", ContentKind::Image, 1),
            playable("c", ContentKind::Image, 1),
        ]);
        state.advance();
        state.advance();
        assert_eq!(state.phase(), Phase::Playing(2));

        state.replace_playlist(vec![playable("a", ContentKind::Image, 1), playable("b", ContentKind::Image, 1)]);
        assert_eq!(state.index(), 0);

        state.replace_playlist(Vec::new());
        assert_eq!(state.phase(), Phase::Idle);
        assert!(state.current().is_none());
        state.advance();
        assert_eq!(state.index(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_cycle_returns_to_start() {
        let list = vec![
            playable("a.png", ContentKind::Image, 2),
            playable("b.mp4", ContentKind::Video, 3),
            playable("https://example.com", ContentKind::EmbeddedPage, 4),
        ];
        let (surface, _tx, mut sched) = scheduler(list);

        for expected in 0..3 {
            assert_eq!(sched.step().await.unwrap(), Iteration::Played(expected));
        }
        assert_eq!(sched.state().index(), 0);
        assert_eq!(
            surface.events(),
            vec!["image a.png Contain", "load b.mp4", "play", "pause", "page https://example.com"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn holds_each_item_for_its_length() {
        let (_surface, _tx, mut sched) = scheduler(vec![playable("a.mp4", ContentKind::Video, 5)]);
        let start = Instant::now();
        assert_eq!(sched.step().await.unwrap(), Iteration::Played(0));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(sched.state().index(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_playlist_idles_without_error() {
        let (surface, _tx, mut sched) = scheduler(Vec::new());
        for _ in 0..5 {
            assert_eq!(sched.step().await.unwrap(), Iteration::Idle);
        }
        assert_eq!(sched.phase(), Phase::Idle);
        assert_eq!(surface.events(), vec!["idle"]);
    }

    #[tokio::test(start_paused = true)]
    async fn latest_published_playlist_wins() {
        let (surface, tx, mut sched) = scheduler(Vec::new());
        assert_eq!(sched.step().await.unwrap(), Iteration::Idle);

        tx.send_replace(vec![playable("old.png", ContentKind::Image, 1)]);
        tx.send_replace(vec![playable("new.png", ContentKind::Image, 1)]);
        assert_eq!(sched.step().await.unwrap(), Iteration::Played(0));
        assert_eq!(surface.events(), vec!["idle", "image new.png Contain"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_video_is_skipped_after_timeout() {
        let (surface, _tx, mut sched) = scheduler(vec![
            playable("stuck.mp4", ContentKind::Video, 5),
            playable("a.png", ContentKind::Image, 5),
        ]);
        surface.stall_videos.store(true, Ordering::SeqCst);

        let timing = SchedulerTiming::default();
        let start = Instant::now();
        assert_eq!(sched.step().await.unwrap(), Iteration::Skipped(0));
        assert_eq!(start.elapsed(), timing.video_load_timeout + timing.error_backoff);
        assert_eq!(sched.state().index(), 1);
        assert_eq!(surface.events(), vec!["pause"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_video_loads_still_let_time_pass() {
        let (surface, _tx, mut sched) = scheduler(vec![playable("corrupt.mp4", ContentKind::Video, 5)]);
        surface.fail_videos.store(true, Ordering::SeqCst);

        let start = Instant::now();
        for round in 1..=3u32 {
            assert_eq!(sched.step().await.unwrap(), Iteration::Skipped(0));
            assert_eq!(start.elapsed(), SchedulerTiming::default().error_backoff * round);
        }
        assert_eq!(surface.events(), vec!["pause", "pause", "pause"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_kind_shows_blank_and_moves_on() {
        let (surface, _tx, mut sched) = scheduler(vec![
            playable("x.swf", ContentKind::Other("flash".into()), 2),
            playable("a.png", ContentKind::Image, 2),
        ]);
        assert_eq!(sched.step().await.unwrap(), Iteration::Played(0));
        assert_eq!(sched.state().index(), 1);
        assert_eq!(surface.events(), vec!["blank"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_iteration_keeps_position() {
        let (surface, _tx, mut sched) = scheduler(vec![
            playable("a.png", ContentKind::Image, 1),
            playable("b.png", ContentKind::Image, 1),
        ]);
        assert_eq!(sched.step().await.unwrap(), Iteration::Played(0));

        surface.fail_next_image.store(true, Ordering::SeqCst);
        assert!(sched.step().await.is_err());
        assert_eq!(sched.state().index(), 1);

        assert_eq!(sched.step().await.unwrap(), Iteration::Played(1));
        assert_eq!(surface.events(), vec!["image a.png Contain", "image b.png Contain"]);
    }
}

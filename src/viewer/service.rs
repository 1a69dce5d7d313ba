//! Viewport controller - the viewer's public face
//!
//! Commands never block: they update [`ViewportState`] and hand the
//! resulting effects to the [`PrefetchScheduler`]. Render completions are
//! picked up by [`Viewer::poll`] (or the `wait_*` helpers) on the owning
//! thread, which is the only place the displayed status changes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::cache::CacheStats;
use super::error::ViewerError;
use super::renderer::PageRenderer;
use super::scheduler::{PrefetchScheduler, SchedulerConfig, SchedulerEvent, Target};
use super::state::{Command, Effect, ViewStatus, ViewportState};
use super::types::{DocumentHandle, ScaleBucket};
use super::zoom::Zoom;
use crate::settings::ViewerSettings;

/// Everything the presentation layer needs to draw one frame
#[derive(Clone, Debug)]
pub struct ViewSnapshot {
    pub status: ViewStatus,
    pub page: usize,
    pub total_pages: usize,
    pub scale: f32,
    pub bucket: ScaleBucket,
    pub cache: CacheStats,
    pub in_flight: usize,
}

/// Paginated document viewer backed by a render cache
pub struct Viewer {
    state: ViewportState,
    status: ViewStatus,
    scheduler: PrefetchScheduler,
}

impl Viewer {
    /// Create a viewer from user settings
    #[must_use]
    pub fn new(renderer: Arc<dyn PageRenderer>, settings: &ViewerSettings) -> Self {
        Self::with_config(
            renderer,
            settings.scheduler_config(),
            settings.zoom(),
            settings.initial_scale,
        )
    }

    #[must_use]
    pub fn with_config(
        renderer: Arc<dyn PageRenderer>,
        config: SchedulerConfig,
        zoom: Zoom,
        initial_scale: f32,
    ) -> Self {
        Self {
            state: ViewportState::new(zoom, initial_scale),
            status: ViewStatus::Idle,
            scheduler: PrefetchScheduler::new(renderer, config),
        }
    }

    /// Open `document`, discarding anything cached for a previous one
    pub fn open_document(
        &mut self,
        document: DocumentHandle,
        total_pages: usize,
    ) -> Result<(), ViewerError> {
        if total_pages == 0 {
            return Err(ViewerError::EmptyDocument);
        }

        log::info!(
            "Opening {:?} as {} ({total_pages} pages)",
            document.path(),
            document.id()
        );
        self.apply_command(Command::Open {
            document,
            total_pages,
        });
        Ok(())
    }

    pub fn close_document(&mut self) {
        if let Some(document) = &self.state.document {
            log::info!("Closing {}", document.id());
        }
        self.apply_command(Command::Close);
    }

    pub fn go_to_page(&mut self, page: usize) {
        self.apply_command(Command::GoToPage(page));
    }

    pub fn next_page(&mut self) {
        self.apply_command(Command::NextPage);
    }

    pub fn prev_page(&mut self) {
        self.apply_command(Command::PrevPage);
    }

    pub fn first_page(&mut self) {
        self.apply_command(Command::FirstPage);
    }

    pub fn last_page(&mut self) {
        self.apply_command(Command::LastPage);
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.apply_command(Command::SetScale(scale));
    }

    pub fn zoom_in(&mut self) {
        self.apply_command(Command::ZoomIn);
    }

    pub fn zoom_out(&mut self) {
        self.apply_command(Command::ZoomOut);
    }

    /// Re-request the current page after a failure
    pub fn retry(&mut self) {
        if matches!(self.status, ViewStatus::Error(_)) {
            self.retarget();
        }
    }

    /// Apply a command to the viewport state
    pub fn apply_command(&mut self, cmd: Command) {
        let effects = self.state.apply(cmd);
        self.execute_effects(effects);
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Reset => {
                    self.scheduler.reset();
                }

                Effect::Retarget => {
                    self.retarget();
                }

                Effect::Teardown => {
                    self.scheduler.reset();
                    self.status = ViewStatus::Idle;
                }
            }
        }
    }

    fn retarget(&mut self) {
        let Some(document) = self.state.document.clone() else {
            return;
        };

        let outcome = self.scheduler.recompute(Target {
            document,
            page: self.state.page,
            bucket: self.state.bucket(),
            total_pages: self.state.total_pages,
        });

        self.status = match outcome.cached {
            Some(payload) => ViewStatus::Ready(payload),
            None => ViewStatus::Loading,
        };
    }

    fn apply_events(&mut self, events: Vec<SchedulerEvent>) -> bool {
        let changed = !events.is_empty();
        for event in events {
            self.status = match event {
                SchedulerEvent::Ready { payload, .. } => ViewStatus::Ready(payload),
                SchedulerEvent::Failed { key, error } => {
                    ViewStatus::Error(ViewerError::render_failure(key.page, error))
                }
            };
        }
        changed
    }

    /// Process finished renders without blocking.
    /// Returns true if the displayed status changed.
    pub fn poll(&mut self) -> bool {
        let events = self.scheduler.poll();
        self.apply_events(events)
    }

    /// Block until the displayed status changes or `timeout` elapses.
    /// Returns true if it changed.
    pub fn wait_for(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let events = if self.scheduler.is_idle() {
                self.scheduler.poll()
            } else {
                self.scheduler.wait(remaining)
            };
            if self.apply_events(events) {
                return true;
            }
            if self.scheduler.is_idle() || remaining.is_zero() {
                return false;
            }
        }
    }

    /// Block until no render is outstanding or `timeout` elapses.
    /// Returns true if the viewer went idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let events = self.scheduler.poll();
            self.apply_events(events);
            if self.scheduler.is_idle() {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let events = self.scheduler.wait(remaining);
            self.apply_events(events);
        }
    }

    #[must_use]
    pub fn status(&self) -> &ViewStatus {
        &self.status
    }

    #[must_use]
    pub fn page(&self) -> usize {
        self.state.page
    }

    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.state.total_pages
    }

    #[must_use]
    pub fn scale(&self) -> f32 {
        self.state.scale
    }

    #[must_use]
    pub fn document(&self) -> Option<&DocumentHandle> {
        self.state.document.as_ref()
    }

    #[must_use]
    pub fn scheduler(&self) -> &PrefetchScheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.scheduler.cache_stats()
    }

    #[must_use]
    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            status: self.status.clone(),
            page: self.state.page,
            total_pages: self.state.total_pages,
            scale: self.state.scale,
            bucket: self.state.bucket(),
            cache: self.scheduler.cache_stats(),
            in_flight: self.scheduler.in_flight().len(),
        }
    }
}

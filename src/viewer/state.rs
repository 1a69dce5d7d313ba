//! Viewport state management

use std::sync::Arc;

use super::error::ViewerError;
use super::types::{DocumentHandle, PagePayload, ScaleBucket};
use super::zoom::Zoom;

/// What the presentation layer should show
#[derive(Clone, Debug)]
pub enum ViewStatus {
    /// No document is open
    Idle,
    /// The active page is being rendered
    Loading,
    /// The active page is on screen
    Ready(Arc<PagePayload>),
    /// The active page could not be rendered; navigating again retries
    Error(ViewerError),
}

impl ViewStatus {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready(_) => "ready",
            Self::Error(_) => "error",
        }
    }

    #[must_use]
    pub fn image(&self) -> Option<&Arc<PagePayload>> {
        match self {
            Self::Ready(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Current page, scale and document
#[derive(Clone, Debug)]
pub struct ViewportState {
    pub document: Option<DocumentHandle>,

    /// Current page (1-indexed, 0 while idle)
    pub page: usize,

    /// Total page count
    pub total_pages: usize,

    /// User-specified scale, already clamped
    pub scale: f32,

    pub zoom: Zoom,

    /// Scale a freshly opened document starts at
    pub initial_scale: f32,
}

impl ViewportState {
    #[must_use]
    pub fn new(zoom: Zoom, initial_scale: f32) -> Self {
        let initial_scale = zoom.clamp(initial_scale);
        Self {
            document: None,
            page: 0,
            total_pages: 0,
            scale: initial_scale,
            zoom,
            initial_scale,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.document.is_some()
    }

    #[must_use]
    pub fn bucket(&self) -> ScaleBucket {
        self.zoom.bucket(self.scale)
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::Open {
                document,
                total_pages,
            } => {
                self.document = Some(document);
                self.total_pages = total_pages;
                self.page = 1;
                self.scale = self.initial_scale;
                vec![Effect::Reset, Effect::Retarget]
            }

            Command::Close => {
                self.document = None;
                self.total_pages = 0;
                self.page = 0;
                self.scale = self.initial_scale;
                vec![Effect::Teardown]
            }

            _ if !self.is_open() => {
                log::debug!("Ignoring {cmd:?}: no document open");
                vec![]
            }

            Command::GoToPage(page) => self.go_to(page),
            Command::NextPage => self.go_to(self.page.saturating_add(1)),
            Command::PrevPage => self.go_to(self.page.saturating_sub(1)),
            Command::FirstPage => self.go_to(1),
            Command::LastPage => self.go_to(self.total_pages),

            Command::SetScale(scale) => self.set_scale(scale),
            Command::ZoomIn => self.set_scale(self.zoom.step_in(self.scale)),
            Command::ZoomOut => self.set_scale(self.zoom.step_out(self.scale)),
        }
    }

    fn go_to(&mut self, page: usize) -> Vec<Effect> {
        let clamped = page.clamp(1, self.total_pages.max(1));
        if clamped != page {
            log::debug!(
                "{}",
                ViewerError::InvalidPage {
                    requested: page,
                    total_pages: self.total_pages,
                }
            );
        }

        if clamped == self.page {
            return vec![];
        }
        self.page = clamped;
        vec![Effect::Retarget]
    }

    fn set_scale(&mut self, scale: f32) -> Vec<Effect> {
        if self.zoom.is_out_of_range(scale) {
            log::debug!(
                "{}",
                ViewerError::InvalidScale {
                    requested: scale,
                    min: self.zoom.min,
                    max: self.zoom.max,
                }
            );
        }

        let before = self.bucket();
        self.scale = self.zoom.clamp(scale);
        if self.bucket() == before {
            vec![]
        } else {
            vec![Effect::Retarget]
        }
    }
}

/// Commands that modify viewport state
#[derive(Clone, Debug)]
pub enum Command {
    Open {
        document: DocumentHandle,
        total_pages: usize,
    },
    Close,
    GoToPage(usize),
    NextPage,
    PrevPage,
    FirstPage,
    LastPage,
    SetScale(f32),
    ZoomIn,
    ZoomOut,
}

/// Effects produced by state changes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Cancel outstanding renders and empty the cache
    Reset,
    /// Recompute the prefetch target for the current page and scale
    Retarget,
    /// Cancel outstanding renders, empty the cache and go idle
    Teardown,
}

//! Error types for rendering and viewing

use std::sync::Arc;

/// Errors produced by a renderer backend
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("renderer backend failed: {detail}")]
    Backend { detail: String },

    #[error("renderer I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not decode renderer output: {detail}")]
    Decode { detail: String },

    #[error("renderer returned no image data")]
    EmptyOutput,

    #[error("render did not finish within {millis} ms")]
    Timeout { millis: u64 },

    #[error("render was cancelled")]
    Cancelled,
}

impl RenderError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend { detail: msg.into() }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode { detail: msg.into() }
    }
}

/// Errors visible to the presentation layer
#[derive(Clone, Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("page {page} failed to render: {source}")]
    RenderFailure {
        page: usize,
        #[source]
        source: Arc<RenderError>,
    },

    #[error("document was closed")]
    DocumentClosed,

    #[error("page {requested} is outside 1..={total_pages}")]
    InvalidPage { requested: usize, total_pages: usize },

    #[error("scale {requested} is outside {min}..={max}")]
    InvalidScale { requested: f32, min: f32, max: f32 },

    #[error("document has no pages")]
    EmptyDocument,
}

impl ViewerError {
    pub fn render_failure(page: usize, error: RenderError) -> Self {
        Self::RenderFailure {
            page,
            source: Arc::new(error),
        }
    }

    /// True for failures caused by a render timing out
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::RenderFailure { source, .. } if matches!(**source, RenderError::Timeout { .. })
        )
    }
}

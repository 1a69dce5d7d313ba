//! Render request and response types

use std::sync::Arc;

use super::error::RenderError;
use super::inflight::CancellationToken;
use super::types::{DocumentHandle, PagePayload, RenderKey};

/// Unique identifier for render requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Which queue a render goes to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    /// The page the user is looking at
    Active,
    /// A neighbour inside the prefetch window
    Background,
}

/// Request sent to render workers
#[derive(Debug)]
pub enum RenderRequest {
    /// Render one page
    Page {
        id: RequestId,
        key: RenderKey,
        document: DocumentHandle,
        priority: Priority,
        cancel: CancellationToken,
    },

    /// Shutdown the worker
    Shutdown,
}

/// Response from render workers
#[derive(Debug)]
pub enum RenderResponse {
    /// Rendered page data
    Rendered {
        id: RequestId,
        key: RenderKey,
        priority: Priority,
        payload: Arc<PagePayload>,
    },

    /// The renderer failed
    Failed {
        id: RequestId,
        key: RenderKey,
        priority: Priority,
        error: RenderError,
    },

    /// The request was cancelled before or during rendering
    Cancelled { id: RequestId, key: RenderKey },
}

impl RenderResponse {
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            Self::Rendered { id, .. } | Self::Failed { id, .. } | Self::Cancelled { id, .. } => {
                *id
            }
        }
    }

    #[must_use]
    pub fn key(&self) -> RenderKey {
        match self {
            Self::Rendered { key, .. } | Self::Failed { key, .. } | Self::Cancelled { key, .. } => {
                *key
            }
        }
    }
}

//! Paginated page viewer with a prefetching render cache

pub mod cache;
pub mod error;
pub mod inflight;
pub mod renderer;
pub mod request;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod types;
pub mod worker;
pub mod zoom;

pub use cache::{CacheStats, PageCache};
pub use error::{RenderError, ViewerError};
pub use inflight::{CancellationToken, InFlightRegistry};
pub use renderer::{BASE_DPI, CommandRenderer, PageRenderer, decode_payload};
pub use request::{Priority, RequestId};
pub use scheduler::{PrefetchScheduler, SchedulerConfig, SchedulerEvent, Target};
pub use service::{ViewSnapshot, Viewer};
pub use state::{Command, ViewStatus};
pub use types::{DocumentHandle, DocumentId, PagePayload, RenderKey, ScaleBucket};
pub use zoom::Zoom;

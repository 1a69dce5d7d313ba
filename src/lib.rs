// Export modules for use in tests
pub mod panic_handler;
pub mod settings;
pub mod viewer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use settings::{ViewerSettings, load_settings};
pub use viewer::{DocumentHandle, PageRenderer, ViewStatus, Viewer};

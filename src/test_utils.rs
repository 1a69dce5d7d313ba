pub mod test_helpers {
    use std::collections::HashSet;
    use std::sync::{Arc, Condvar, Mutex, PoisonError};
    use std::time::{Duration, Instant};

    use crate::settings::ViewerSettings;
    use crate::viewer::{DocumentHandle, PageRenderer, RenderError, ScaleBucket, Viewer};

    /// Bytes every test renderer produces for a page
    pub fn page_bytes(page: usize, scale: f32) -> Vec<u8> {
        format!("page-{page}@{scale:.1}").into_bytes()
    }

    /// Settings with short timeouts suitable for tests
    pub fn test_settings() -> ViewerSettings {
        ViewerSettings {
            render_timeout_ms: 5_000,
            ..ViewerSettings::default()
        }
    }

    /// Renderer that records every call and can be told to fail pages
    #[derive(Default)]
    pub struct RecordingRenderer {
        calls: Mutex<Vec<(usize, ScaleBucket)>>,
        failing: Mutex<HashSet<usize>>,
        delay: Option<Duration>,
    }

    impl RecordingRenderer {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay: Some(delay),
                ..Self::default()
            })
        }

        pub fn set_failing(&self, page: usize, failing: bool) {
            let mut pages = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
            if failing {
                pages.insert(page);
            } else {
                pages.remove(&page);
            }
        }

        pub fn calls(&self) -> Vec<(usize, ScaleBucket)> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn calls_for(&self, page: usize) -> usize {
            self.calls().iter().filter(|(p, _)| *p == page).count()
        }

        pub fn total_calls(&self) -> usize {
            self.calls().len()
        }
    }

    impl PageRenderer for RecordingRenderer {
        fn render(
            &self,
            _document: &DocumentHandle,
            page: usize,
            scale: f32,
        ) -> Result<Vec<u8>, RenderError> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((page, ScaleBucket::from_scale(scale)));

            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }

            let failing = self
                .failing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&page);
            if failing {
                return Err(RenderError::backend(format!("page {page} is broken")));
            }
            Ok(page_bytes(page, scale))
        }
    }

    #[derive(Default)]
    struct Gates {
        gated: HashSet<usize>,
        started: Vec<usize>,
        failing: HashSet<usize>,
    }

    /// Renderer that holds chosen pages until the test releases them
    #[derive(Default)]
    pub struct GatedRenderer {
        gates: Mutex<Gates>,
        changed: Condvar,
    }

    impl GatedRenderer {
        pub fn gating(pages: impl IntoIterator<Item = usize>) -> Arc<Self> {
            let renderer = Self::default();
            renderer.lock().gated.extend(pages);
            Arc::new(renderer)
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Gates> {
            self.gates.lock().unwrap_or_else(PoisonError::into_inner)
        }

        pub fn gate(&self, page: usize) {
            self.lock().gated.insert(page);
        }

        /// Let a held page finish; it fails if `fail_on` was called for it
        pub fn release(&self, page: usize) {
            self.lock().gated.remove(&page);
            self.changed.notify_all();
        }

        pub fn release_all(&self) {
            self.lock().gated.clear();
            self.changed.notify_all();
        }

        pub fn fail_on(&self, page: usize) {
            self.lock().failing.insert(page);
        }

        /// Number of renders of `page` that have begun
        pub fn started(&self, page: usize) -> usize {
            self.lock().started.iter().filter(|p| **p == page).count()
        }

        /// Block until a render of `page` has begun
        pub fn wait_started(&self, page: usize, timeout: Duration) -> bool {
            let deadline = Instant::now() + timeout;
            let mut gates = self.lock();
            while !gates.started.contains(&page) {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return false;
                }
                gates = self
                    .changed
                    .wait_timeout(gates, remaining)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            true
        }
    }

    impl PageRenderer for GatedRenderer {
        fn render(
            &self,
            _document: &DocumentHandle,
            page: usize,
            scale: f32,
        ) -> Result<Vec<u8>, RenderError> {
            let mut gates = self.lock();
            gates.started.push(page);
            self.changed.notify_all();

            while gates.gated.contains(&page) {
                gates = self
                    .changed
                    .wait(gates)
                    .unwrap_or_else(PoisonError::into_inner);
            }

            if gates.failing.contains(&page) {
                return Err(RenderError::backend(format!("page {page} is broken")));
            }
            Ok(page_bytes(page, scale))
        }
    }

    /// Viewer over `renderer` with an open document of `total_pages`
    pub fn open_viewer(
        renderer: Arc<dyn PageRenderer>,
        settings: &ViewerSettings,
        total_pages: usize,
    ) -> Viewer {
        let mut viewer = Viewer::new(renderer, settings);
        viewer
            .open_document(DocumentHandle::new("test.pdf"), total_pages)
            .unwrap();
        viewer
    }
}

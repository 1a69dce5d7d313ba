use std::sync::Arc;
use std::time::{Duration, Instant};

use folio::settings::ViewerSettings;
use folio::test_utils::test_helpers::{
    GatedRenderer, RecordingRenderer, open_viewer, page_bytes, test_settings,
};
use folio::viewer::{ScaleBucket, ViewStatus, Viewer, ViewerError};

const SETTLE: Duration = Duration::from_secs(10);

fn shown_bytes(viewer: &Viewer) -> Option<Vec<u8>> {
    viewer.status().image().map(|image| image.bytes().to_vec())
}

fn wait_until(viewer: &mut Viewer, done: impl Fn(&ViewStatus) -> bool) -> bool {
    let deadline = Instant::now() + SETTLE;
    while Instant::now() < deadline {
        if done(viewer.status()) {
            return true;
        }
        viewer.wait_for(Duration::from_millis(50));
    }
    done(viewer.status())
}

#[test]
fn test_paging_through_a_document() {
    let renderer = RecordingRenderer::new();
    let mut viewer = open_viewer(renderer.clone(), &test_settings(), 20);

    assert!(matches!(viewer.status(), ViewStatus::Loading));
    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(1, 1.0)));
    assert_eq!(viewer.scheduler().cache().pages(), vec![1, 2, 3]);

    viewer.go_to_page(10);
    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(10, 1.0)));
    assert_eq!(viewer.scheduler().cache().pages(), vec![8, 9, 10, 11, 12]);

    let before = viewer.scheduler().dispatched_total();
    viewer.go_to_page(11);
    // Page 11 was prefetched, so it shows without waiting
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(11, 1.0)));
    assert_eq!(viewer.scheduler().dispatched_total(), before + 1);

    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(viewer.scheduler().cache().pages(), vec![9, 10, 11, 12, 13]);
    assert_eq!(renderer.calls_for(11), 1);
    assert_eq!(renderer.calls_for(13), 1);
}

#[test]
fn test_cached_page_needs_no_render() {
    let renderer = RecordingRenderer::new();
    let mut viewer = open_viewer(renderer.clone(), &test_settings(), 20);
    assert!(viewer.wait_idle(SETTLE));

    let calls = renderer.total_calls();
    viewer.go_to_page(2);
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(2, 1.0)));
    assert_eq!(renderer.calls_for(2), 1);

    assert!(viewer.wait_idle(SETTLE));
    // Only page 4 entered the window
    assert_eq!(renderer.total_calls(), calls + 1);
    assert_eq!(renderer.calls_for(4), 1);
}

#[test]
fn test_navigating_to_current_page_is_a_no_op() {
    let renderer = RecordingRenderer::new();
    let mut viewer = open_viewer(renderer.clone(), &test_settings(), 20);
    viewer.go_to_page(7);
    assert!(viewer.wait_idle(SETTLE));

    let dispatched = viewer.scheduler().dispatched_total();
    let stats = viewer.cache_stats();
    viewer.go_to_page(7);

    assert_eq!(viewer.scheduler().dispatched_total(), dispatched);
    assert_eq!(viewer.cache_stats().hits, stats.hits);
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(7, 1.0)));
}

#[test]
fn test_out_of_range_page_is_clamped() {
    let renderer = RecordingRenderer::new();
    let mut viewer = open_viewer(renderer, &test_settings(), 20);

    viewer.go_to_page(999);
    assert_eq!(viewer.page(), 20);
    viewer.go_to_page(0);
    assert_eq!(viewer.page(), 1);

    viewer.last_page();
    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(20, 1.0)));
    assert_eq!(viewer.scheduler().cache().pages(), vec![18, 19, 20]);
}

#[test]
fn test_stale_result_is_cached_but_not_shown() {
    let renderer = GatedRenderer::gating([5]);
    let settings = ViewerSettings {
        max_cache_size: 20,
        ..test_settings()
    };
    let mut viewer = open_viewer(renderer.clone(), &settings, 20);
    assert!(viewer.wait_idle(SETTLE));

    viewer.go_to_page(5);
    assert!(renderer.wait_started(5, SETTLE));

    viewer.go_to_page(15);
    assert!(wait_until(&mut viewer, |status| matches!(
        status,
        ViewStatus::Ready(_)
    )));
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(15, 1.0)));

    renderer.release(5);
    assert!(viewer.wait_idle(SETTLE));

    assert_eq!(shown_bytes(&viewer), Some(page_bytes(15, 1.0)));
    assert!(viewer.scheduler().cache().pages().contains(&5));

    // Going back is now a cache hit
    viewer.go_to_page(5);
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(5, 1.0)));
    assert_eq!(renderer.started(5), 1);
}

#[test]
fn test_rapid_navigation_renders_each_page_once() {
    let renderer = RecordingRenderer::with_delay(Duration::from_millis(20));
    let mut viewer = open_viewer(renderer.clone(), &test_settings(), 30);

    for page in [6, 7, 6, 7, 8, 7, 6] {
        viewer.go_to_page(page);
        assert!(viewer.scheduler().in_flight().len() <= 10);
    }
    assert!(viewer.wait_idle(SETTLE));

    for page in 1..=10 {
        assert!(
            renderer.calls_for(page) <= 1,
            "page {page} rendered {} times",
            renderer.calls_for(page)
        );
    }
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(6, 1.0)));
}

#[test]
fn test_cache_stays_within_bounds() {
    let renderer = RecordingRenderer::new();
    let mut viewer = open_viewer(renderer, &test_settings(), 50);

    for page in [3, 9, 10, 30, 29, 50, 1, 25] {
        viewer.go_to_page(page);
        let stats = viewer.cache_stats();
        assert!(stats.entries <= stats.ceiling);

        assert!(viewer.wait_idle(SETTLE));
        let stats = viewer.cache_stats();
        assert!(stats.entries <= stats.capacity, "{stats:?}");
    }

    let window: Vec<usize> = (23..=27).collect();
    assert_eq!(viewer.scheduler().cache().pages(), window);
    assert!(viewer.cache_stats().evictions > 0);
}

#[test]
fn test_active_failure_shows_error_until_retry() {
    let renderer = RecordingRenderer::new();
    renderer.set_failing(1, true);
    let mut viewer = open_viewer(renderer.clone(), &test_settings(), 10);
    assert!(viewer.wait_idle(SETTLE));

    match viewer.status() {
        ViewStatus::Error(ViewerError::RenderFailure { page, .. }) => assert_eq!(*page, 1),
        other => panic!("expected render failure, got {other:?}"),
    }
    assert!(!viewer.scheduler().cache().pages().contains(&1));

    renderer.set_failing(1, false);
    viewer.retry();
    assert!(matches!(viewer.status(), ViewStatus::Loading));
    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(1, 1.0)));
    assert_eq!(renderer.calls_for(1), 2);
}

#[test]
fn test_navigation_recovers_from_failure() {
    let renderer = RecordingRenderer::new();
    renderer.set_failing(4, true);
    let mut viewer = open_viewer(renderer, &test_settings(), 10);

    viewer.go_to_page(4);
    assert!(viewer.wait_idle(SETTLE));
    assert!(matches!(viewer.status(), ViewStatus::Error(_)));

    viewer.next_page();
    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(5, 1.0)));
}

#[test]
fn test_background_failure_is_silent() {
    let renderer = RecordingRenderer::new();
    renderer.set_failing(2, true);
    let mut viewer = open_viewer(renderer, &test_settings(), 10);
    assert!(viewer.wait_idle(SETTLE));

    assert_eq!(shown_bytes(&viewer), Some(page_bytes(1, 1.0)));
    assert_eq!(viewer.scheduler().cache().pages(), vec![1, 3]);
}

#[test]
fn test_active_timeout_is_reported() {
    let renderer = GatedRenderer::gating([1]);
    let settings = ViewerSettings {
        render_timeout_ms: 100,
        ..test_settings()
    };
    let mut viewer = open_viewer(renderer.clone(), &settings, 5);

    assert!(wait_until(&mut viewer, |status| matches!(
        status,
        ViewStatus::Error(_)
    )));
    match viewer.status() {
        ViewStatus::Error(error) => assert!(error.is_timeout(), "{error}"),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(!viewer.scheduler().in_flight().contains(
        &viewer.scheduler().target().unwrap().active_key()
    ));

    // The late result belongs to an abandoned request
    renderer.release_all();
    std::thread::sleep(Duration::from_millis(100));
    viewer.poll();
    assert!(matches!(viewer.status(), ViewStatus::Error(_)));
    assert!(!viewer.scheduler().cache().pages().contains(&1));

    viewer.retry();
    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(1, 1.0)));
}

#[test]
fn test_background_timeout_is_silent() {
    let renderer = GatedRenderer::gating([2]);
    let settings = ViewerSettings {
        render_timeout_ms: 100,
        ..test_settings()
    };
    let mut viewer = open_viewer(renderer.clone(), &settings, 5);

    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(1, 1.0)));
    assert!(viewer.scheduler().in_flight().is_empty());
    assert!(!viewer.scheduler().cache().pages().contains(&2));

    renderer.release_all();
}

#[test]
fn test_close_discards_late_results() {
    let renderer = GatedRenderer::gating([1]);
    let mut viewer = open_viewer(renderer.clone(), &test_settings(), 5);
    assert!(renderer.wait_started(1, SETTLE));

    viewer.close_document();
    assert!(matches!(viewer.status(), ViewStatus::Idle));
    assert!(viewer.scheduler().in_flight().is_empty());

    renderer.release_all();
    std::thread::sleep(Duration::from_millis(100));
    viewer.poll();

    let snapshot = viewer.snapshot();
    assert!(matches!(snapshot.status, ViewStatus::Idle));
    assert_eq!(snapshot.cache.entries, 0);

    // Commands without a document are ignored
    viewer.go_to_page(3);
    assert_eq!(viewer.page(), 0);
}

#[test]
fn test_reopening_starts_from_scratch() {
    let renderer = RecordingRenderer::new();
    let mut viewer = open_viewer(renderer.clone(), &test_settings(), 10);
    viewer.go_to_page(6);
    assert!(viewer.wait_idle(SETTLE));

    viewer
        .open_document(folio::DocumentHandle::new("other.pdf"), 3)
        .unwrap();
    assert_eq!(viewer.page(), 1);
    assert_eq!(viewer.total_pages(), 3);
    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(viewer.scheduler().cache().pages(), vec![1, 2, 3]);
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(1, 1.0)));
}

#[test]
fn test_scale_bucket_controls_rerendering() {
    let renderer = RecordingRenderer::new();
    let mut viewer = open_viewer(renderer.clone(), &test_settings(), 10);
    assert!(viewer.wait_idle(SETTLE));
    let calls = renderer.total_calls();

    viewer.set_scale(1.04);
    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(renderer.total_calls(), calls);
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(1, 1.0)));

    viewer.set_scale(1.5);
    assert!(matches!(viewer.status(), ViewStatus::Loading));
    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(1, 1.5)));
    assert!(
        renderer
            .calls()
            .contains(&(1, ScaleBucket::from_tenths(15)))
    );
    assert_eq!(viewer.cache_stats().entries, 3);

    viewer.zoom_out();
    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(1, 1.3)));
}

#[test]
fn test_zoom_is_clamped() {
    let renderer = RecordingRenderer::new();
    let mut viewer = open_viewer(renderer, &test_settings(), 3);

    viewer.set_scale(40.0);
    assert_eq!(viewer.scale(), 3.0);
    viewer.zoom_in();
    assert_eq!(viewer.scale(), 3.0);

    viewer.set_scale(0.0);
    assert_eq!(viewer.scale(), 0.5);
    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(shown_bytes(&viewer), Some(page_bytes(1, 0.5)));
}

#[test]
fn test_snapshot_reflects_viewport() {
    let renderer: Arc<RecordingRenderer> = RecordingRenderer::new();
    let mut viewer = open_viewer(renderer, &test_settings(), 12);
    viewer.go_to_page(4);
    viewer.zoom_in();
    assert!(viewer.wait_idle(SETTLE));

    let snapshot = viewer.snapshot();
    assert_eq!(snapshot.page, 4);
    assert_eq!(snapshot.total_pages, 12);
    assert_eq!(snapshot.bucket, ScaleBucket::from_tenths(12));
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.status.label(), "ready");
}

#[test]
fn test_window_wider_than_cache_renders_only_what_fits() {
    let renderer = RecordingRenderer::new();
    let settings = ViewerSettings {
        prefetch_radius: 3,
        max_cache_size: 2,
        ..test_settings()
    };
    let mut viewer = open_viewer(renderer.clone(), &settings, 30);
    assert!(viewer.wait_idle(SETTLE));
    assert_eq!(viewer.scheduler().cache().pages(), vec![1, 2]);
    assert_eq!(renderer.total_calls(), 2);

    let steps = [
        (10, vec![10, 11], 2),
        (11, vec![11, 12], 1),
        (12, vec![12, 13], 1),
        (11, vec![11, 12], 1),
        (10, vec![10, 11], 1),
    ];
    for (page, resident, renders) in steps {
        let calls = renderer.total_calls();
        viewer.go_to_page(page);
        assert!(viewer.wait_idle(SETTLE));

        assert_eq!(shown_bytes(&viewer), Some(page_bytes(page, 1.0)));
        assert_eq!(viewer.scheduler().cache().pages(), resident, "at page {page}");
        assert_eq!(
            renderer.total_calls() - calls,
            renders,
            "renders for page {page}"
        );
    }
}

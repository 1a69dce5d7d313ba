//! Render worker - runs in separate thread(s)

use std::sync::Arc;

use flume::{Receiver, Selector, Sender};

use super::renderer::{PageRenderer, decode_payload};
use super::request::{RenderRequest, RenderResponse};

/// Main worker function - runs in a dedicated thread.
///
/// Active-page requests are always taken before background ones; when both
/// queues are empty the worker blocks on whichever produces first.
#[expect(
    clippy::needless_pass_by_value,
    reason = "Values moved into thread, need ownership"
)]
pub fn render_worker(
    renderer: Arc<dyn PageRenderer>,
    priority: Receiver<RenderRequest>,
    background: Receiver<RenderRequest>,
    responses: Sender<RenderResponse>,
) {
    loop {
        let request = match priority.try_recv() {
            Ok(request) => request,
            Err(_) => {
                let next = Selector::new()
                    .recv(&priority, |r| r)
                    .recv(&background, |r| r)
                    .wait();
                match next {
                    Ok(request) => request,
                    // Every sender is gone: the viewer was dropped
                    Err(_) => break,
                }
            }
        };

        match request {
            RenderRequest::Page {
                id,
                key,
                document,
                priority,
                cancel,
            } => {
                if cancel.is_cancelled() {
                    let _ = responses.send(RenderResponse::Cancelled { id, key });
                    continue;
                }

                let result = renderer
                    .render(&document, key.page, key.bucket.scale())
                    .and_then(decode_payload);

                let response = if cancel.is_cancelled() {
                    RenderResponse::Cancelled { id, key }
                } else {
                    match result {
                        Ok(payload) => RenderResponse::Rendered {
                            id,
                            key,
                            priority,
                            payload: Arc::new(payload),
                        },
                        Err(error) => RenderResponse::Failed {
                            id,
                            key,
                            priority,
                            error,
                        },
                    }
                };

                if responses.send(response).is_err() {
                    break;
                }
            }

            RenderRequest::Shutdown => break,
        }
    }
}

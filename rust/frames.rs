//! One-shot query for the frames the robot currently publishes.

use serde_json::{Value, json};

use crate::{logging::Logger, transport::Transport};

/// Asks `service` for the known frame ids and hands the list to `on_done`.
///
/// The service is expected to answer `{"frames": [..]}` (or a bare array).
/// A failed call, or a reply without frames, falls back to `fallback` so the
/// caller always gets a usable list.
pub fn request_frame_list(
    transport: &dyn Transport,
    service: &str,
    fallback: Vec<String>,
    log: Logger,
    on_done: impl FnOnce(Vec<String>) + 'static,
) {
    let on_done = std::rc::Rc::new(std::cell::RefCell::new(Some(on_done)));
    let success_done = on_done.clone();
    let success_fallback = fallback.clone();
    let success_log = log.clone();
    let service_name = service.to_owned();

    transport.call_service(
        service,
        json!({}),
        Box::new(move |response| {
            let frames = parse_frames(&response);
            let frames = if frames.is_empty() {
                success_log.warn(format_args!(
                    "{service_name} returned no frames, using the default list"
                ));
                success_fallback
            } else {
                frames
            };
            if let Some(done) = success_done.borrow_mut().take() {
                done(frames);
            }
        }),
        Box::new(move |e| {
            log.warn(format_args!("frame list unavailable: {e}"));
            if let Some(done) = on_done.borrow_mut().take() {
                done(fallback);
            }
        }),
    );
}

fn parse_frames(response: &Value) -> Vec<String> {
    let list = response.get("frames").unwrap_or(response);
    list.as_array()
        .map(|frames| {
            frames
                .iter()
                .filter_map(Value::as_str)
                .map(|f| crate::tf::normalize_frame_id(f).to_owned())
                .collect()
        })
        .unwrap_or_default()
}

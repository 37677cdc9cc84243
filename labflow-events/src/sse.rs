//! ABOUTME: Server-sent-event framing and the catch-up-then-forward stream
//! ABOUTME: Events are single data: records; heartbeats are comment lines

use crate::bus::Subscription;
use futures::Stream;
use labflow_core::types::ProgressEvent;
use std::time::Duration;
use tracing::warn;

/// Comment frame that keeps proxies from idling out a stream.
pub const HEARTBEAT_FRAME: &str = ":\n\n";

/// Recommended cadence for heartbeat frames.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Serialize one event as a single `data:` record terminated by a blank line.
pub fn frame_event(event: &ProgressEvent) -> Result<String, serde_json::Error> {
    Ok(format!("data: {}\n\n", event.to_json()?))
}

/// The event stream one HTTP subscriber consumes: the catch-up snapshot
/// first, then bus events until the first terminal event, then end of
/// stream. Duplicates of already-rendered progress (from the subscribe /
/// snapshot race) are suppressed.
///
/// Dropping the stream unsubscribes promptly.
pub fn document_stream(
    catch_up: ProgressEvent,
    subscription: Subscription,
) -> impl Stream<Item = ProgressEvent> + Send {
    enum State {
        Start {
            catch_up: ProgressEvent,
            subscription: Subscription,
        },
        Forward {
            subscription: Subscription,
            last_progress: u8,
        },
        Done,
    }

    futures::stream::unfold(
        State::Start {
            catch_up,
            subscription,
        },
        |state| async move {
            match state {
                State::Start {
                    catch_up,
                    subscription,
                } => {
                    let next = if catch_up.is_terminal() {
                        State::Done
                    } else {
                        State::Forward {
                            subscription,
                            last_progress: catch_up.progress,
                        }
                    };
                    Some((catch_up, next))
                }
                State::Forward {
                    subscription,
                    mut last_progress,
                } => loop {
                    match subscription.recv().await {
                        Some(event) if event.is_terminal() => {
                            return Some((event, State::Done));
                        }
                        Some(event) => {
                            if event.progress <= last_progress {
                                continue;
                            }
                            last_progress = event.progress;
                            return Some((
                                event,
                                State::Forward {
                                    subscription,
                                    last_progress,
                                },
                            ));
                        }
                        None => return None,
                    }
                },
                State::Done => None,
            }
        },
    )
}

/// Map an event stream into SSE frames, skipping events that fail to
/// serialize.
pub fn frame_stream(
    events: impl Stream<Item = ProgressEvent> + Send,
) -> impl Stream<Item = String> + Send {
    use futures::StreamExt;
    events.filter_map(|event| async move {
        match frame_event(&event) {
            Ok(frame) => Some(frame),
            Err(error) => {
                warn!(document_id = %event.document_id, %error, "failed to serialize progress event");
                None
            }
        }
    })
}

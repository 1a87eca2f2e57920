// ── Inbound dispatcher ──
//
// Turns one server frame into listener calls. Decoding happens once per
// frame; a frame that does not decode is logged and dropped. Each listener
// runs in its own unwind boundary so one failing subscriber cannot starve
// the rest.

use std::panic::{AssertUnwindSafe, catch_unwind};

use momo_api::{Command, Frame};

use crate::model::InboundEvent;
use crate::registry::Target;

/// Deliver `frame` to `targets` in order.
///
/// `still_live` is consulted right before each call, so a listener
/// unsubscribed (or a session torn down) by an earlier callback is
/// skipped. Returns the number of listeners invoked.
pub(crate) fn dispatch(
    frame: &Frame,
    targets: &[Target],
    mut still_live: impl FnMut(&Target) -> bool,
) -> usize {
    if frame.command != Command::Message {
        tracing::trace!(command = frame.command.as_str(), "Ignoring non-MESSAGE frame");
        return 0;
    }
    let Some(first) = targets.first() else {
        tracing::debug!(
            destination = frame.header("destination").unwrap_or_default(),
            subscription = frame.header("subscription").unwrap_or_default(),
            "No live subscription for inbound frame"
        );
        return 0;
    };

    let destination = frame
        .header("destination")
        .unwrap_or(first.destination.as_str());
    let event = match InboundEvent::decode(destination, &frame.body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                destination,
                body_len = frame.body.len(),
                error = %e,
                "Dropping malformed inbound frame"
            );
            return 0;
        }
    };

    let mut delivered = 0;
    for target in targets {
        if !still_live(target) {
            tracing::trace!(handle = %target.handle, "Skipping listener detached mid-dispatch");
            continue;
        }
        let listener = &target.listener;
        if catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))).is_err() {
            tracing::error!(
                handle = %target.handle,
                destination = %target.destination,
                "Subscription listener panicked; continuing dispatch"
            );
        }
        delivered += 1;
    }
    delivered
}

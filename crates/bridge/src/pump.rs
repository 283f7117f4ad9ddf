//! Output pump: the worker that drains the platform codec's output side.
//!
//! Runs under the shared controller lock, releasing it only across the
//! blocking `dequeue_out` call. Frames are delivered to the host in the
//! order the platform codec produced them.

use parking_lot::MutexGuard;
use tracing::{error, warn};

use mb_common::BridgeResult;

use crate::audio;
use crate::controller::{Inner, Media, State};
use crate::platform::{DequeuedOutput, Output};
use crate::video;

/// Pump loop: wait for readiness, acknowledge flushes, dequeue, dispatch.
///
/// Exits on the first fatal error, latching `error` and signaling the decode
/// side.
pub(crate) fn run(inner: &Inner) {
    let mut st = inner.state.lock();
    loop {
        while !st.error && !st.flush_out && !st.output_ready {
            inner.output_cond.wait(&mut st);
        }
        if st.error {
            break;
        }
        if st.flush_out {
            // Acknowledge the flushed state.
            st.flush_out = false;
            inner.decode_cond.notify_all();
            continue;
        }

        let dequeued = MutexGuard::unlocked(&mut st, || inner.codec.dequeue_out(None));

        let event = match dequeued {
            Ok(event) => event,
            Err(e) => {
                if st.flush_out {
                    // Dequeue failures caused by a flush are expected.
                    continue;
                }
                error!(error = %e, "output dequeue failed");
                break;
            }
        };

        if st.flush_out {
            // Whatever surfaced belongs to the flushed stream; there is no
            // way to know whether the index is still ours, so release it
            // without checking the result.
            if let DequeuedOutput::Buffer(index) = event {
                let _ = inner.codec.release_out(index, false);
            }
            // Format and buffer-pool changes still apply after the flush.
            if !matches!(
                event,
                DequeuedOutput::FormatChanged | DequeuedOutput::BuffersChanged
            ) {
                continue;
            }
        }

        if event == DequeuedOutput::TryAgain {
            // The wait was cut short (flush, stop, or spurious wake); the
            // loop conditions above decide what happens next.
            continue;
        }

        match inner.codec.get_out(event) {
            Ok(Some(out)) => {
                if let Err(e) = process(inner, &mut st, out) {
                    error!(error = %e, "output processing failed");
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "output buffer lookup failed");
                break;
            }
        }
    }

    warn!("output pump stopped");
    st.error = true;
    inner.decode_cond.notify_all();
}

fn process(inner: &Inner, st: &mut State, out: Output) -> BridgeResult<()> {
    match st.media {
        Media::Video(_) => video::process_output(inner, st, out),
        Media::Audio(_) => audio::process_output(inner, st, out),
    }
}

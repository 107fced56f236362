//! Snapshot-then-live event sequence for relaying a job to one client.

use futures::{stream, Stream, StreamExt};
use simjob_core::progress::ProgressEvent;

use crate::publisher::Subscription;

/// Yield `snapshot` first, then live events from `subscription`.
///
/// The subscription must be opened before the snapshot is read so no
/// transition falls between the two. Live events older than the snapshot
/// (an earlier attempt, or lower progress within the same attempt) are
/// skipped so the client never sees progress move backwards. A terminal
/// snapshot ends the sequence immediately.
pub fn relay_stream(
    snapshot: ProgressEvent,
    subscription: Subscription,
) -> impl Stream<Item = ProgressEvent> + Send + 'static {
    let done = snapshot.is_terminal();
    let attempt = snapshot.attempt;
    let progress = snapshot.progress;

    let live = if done {
        drop(subscription);
        stream::empty().boxed()
    } else {
        subscription
            .into_stream()
            .filter(move |ev| {
                let stale = !ev.is_terminal()
                    && (ev.attempt < attempt || (ev.attempt == attempt && ev.progress < progress));
                futures::future::ready(!stale)
            })
            .boxed()
    };

    stream::once(futures::future::ready(snapshot)).chain(live)
}

// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Bounded task groups: start up to `width` futures at once, join them all.
//! Used across sources of one stop and across stops of one batch.

use futures::stream::{Stream, StreamExt};
use std::future::Future;

/// Width of a fan-out over `items` tasks, capped at `cap`.
pub fn fan_out_width(items: usize, cap: usize) -> usize {
    items.min(cap).max(1)
}

/// Runs every task and returns the outputs in input order, regardless of
/// which finished first.
pub async fn join_in_order<I, F, Fut>(items: I, width: usize, task: F) -> Vec<Fut::Output>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future,
{
    futures::stream::iter(items)
        .map(task)
        .buffered(width.max(1))
        .collect::<Vec<Fut::Output>>()
        .await
}

/// Yields outputs as tasks finish. Dropping the stream early cancels the
/// tasks that have not finished yet.
pub fn in_completion_order<I, F, Fut>(
    items: I,
    width: usize,
    task: F,
) -> impl Stream<Item = Fut::Output>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future,
{
    futures::stream::iter(items)
        .map(task)
        .buffer_unordered(width.max(1))
}

//! The bounded worker pool every network probe is submitted through.
//!
//! Discovery sweeps, port probes and delegated host scans all run on a
//! [`ProbePool`], so the number of in-flight probes never exceeds the
//! configured batch size no matter which component issued them.
use futures::future;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::num::NonZeroUsize;

/// Runs probe futures with at most `limit` of them in flight.
#[derive(Debug, Clone, Copy)]
pub struct ProbePool {
    limit: NonZeroUsize,
}

impl ProbePool {
    /// A limit of zero is corrected to one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN),
        }
    }

    /// Maximum number of probes in flight.
    pub fn limit(&self) -> usize {
        self.limit.get()
    }

    /// Feeds every job to `probe` and keeps the `Some` outcomes.
    ///
    /// Outcomes arrive in completion order; callers that need a canonical
    /// order must impose it themselves.
    pub async fn run<I, F, Fut, R>(&self, jobs: I, probe: F) -> Vec<R>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future<Output = Option<R>>,
    {
        stream::iter(jobs)
            .map(probe)
            .buffer_unordered(self.limit.get())
            .filter_map(future::ready)
            .collect()
            .await
    }
}

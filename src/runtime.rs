// SPDX-License-Identifier: MPL-2.0

//! Shared async runtime for callers that don't own one.
//!
//! UI code drives uploads from its own thread; rather than building a runtime
//! per upload it hands work to this process-wide one.

use once_cell::sync::Lazy;
use std::future::Future;
use tokio::runtime::Runtime;

/// Uploads are I/O bound, two workers keep the poll loop and the
/// progress stream responsive.
static RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .thread_name("bsky-media")
        .build()
        .expect("failed to create async runtime")
});

/// Execute a future on the shared runtime, blocking until completion.
/// Must not be called from inside another Tokio runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    RUNTIME.block_on(future)
}

/// Spawn a future on the shared runtime without blocking.
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    RUNTIME.spawn(future)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_and_block_on() {
        let handle = spawn(async { 40 + 2 });
        let value = block_on(handle).unwrap();
        assert_eq!(value, 42);
    }
}

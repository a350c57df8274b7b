use std::io;
use tokio::runtime::Runtime;
use tracing::info;

/// Multi-threaded runtime with all drivers enabled.
/// `threads` overrides the worker count, which defaults to the core count.
pub fn build(threads: Option<usize>) -> io::Result<Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name("uploader-worker");
    if let Some(threads) = threads.filter(|t| *t > 0) {
        info!("custom runtime threads: {}", threads);
        builder.worker_threads(threads);
    }

    builder.build()
}

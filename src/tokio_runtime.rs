//! Global Tokio runtime for async operations requiring Tokio (like reqwest)
//!
//! The transport controller and CLI run on plain threads, but the HTTP
//! client is async. This module provides a lazy-initialized global Tokio
//! runtime so network futures run off the interactive thread.

use std::future::Future;
use std::sync::OnceLock;
use tokio::runtime::Runtime;

static TOKIO_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Initialize the global Tokio runtime. Call this during app startup.
pub fn init() {
    TOKIO_RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("Failed to create Tokio runtime")
    });
}

/// Get the global Tokio runtime handle
pub fn handle() -> tokio::runtime::Handle {
    TOKIO_RUNTIME
        .get()
        .expect("Tokio runtime not initialized - call tokio_runtime::init() first")
        .handle()
        .clone()
}

/// Run a future to completion on the runtime from a synchronous context
pub fn block_on<F: Future>(future: F) -> F::Output {
    handle().block_on(future)
}

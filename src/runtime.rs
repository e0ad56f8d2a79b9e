// src/runtime.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Process-wide Tokio runtime for callers without one of their own.
//!
//! The runtime lives on a dedicated thread and is never shut down. Work is
//! spawned onto it and the calling thread blocks on the result, which makes it
//! safe to call from plain threads and from inside another runtime alike.

use anyhow::{Context, anyhow};
use std::future::Future;
use std::sync::mpsc;
use std::thread;
use tokio::runtime::{Builder as TokioBuilder, Handle};
use tokio::sync::oneshot;
use tracing::debug;

use crate::constants::MAX_RUNTIME_THREADS;
use crate::error::Result;

static RT_HANDLE: once_cell::sync::OnceCell<Handle> = once_cell::sync::OnceCell::new();

/// Worker threads for the global runtime, `S3FS_RT_THREADS` overriding.
fn get_runtime_threads() -> usize {
    std::env::var("S3FS_RT_THREADS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or_else(|| std::cmp::min(std::cmp::max(4, num_cpus::get()), MAX_RUNTIME_THREADS))
}

// Create (once) a background multi-thread runtime and return its Handle.
fn global_rt_handle() -> Result<&'static Handle> {
    let handle = RT_HANDLE.get_or_try_init(|| -> anyhow::Result<Handle> {
        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name("s3fs-rt".to_string())
            .spawn(move || {
                let threads = get_runtime_threads();
                debug!("Creating Tokio runtime with {} worker threads", threads);

                let rt = match TokioBuilder::new_multi_thread()
                    .enable_all()
                    .worker_threads(threads)
                    .thread_name("s3fs-rt-worker")
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };

                // Hand a Handle back to the creator, then park the runtime forever.
                if tx.send(Ok(rt.handle().clone())).is_ok() {
                    rt.block_on(std::future::pending::<()>());
                }
            })
            .context("failed to spawn runtime thread")?;

        rx.recv()
            .map_err(|_| anyhow!("runtime thread exited before reporting"))?
            .context("failed to build global tokio runtime")
    })?;
    Ok(handle)
}

/// Run `fut` on the global runtime and block until it finishes.
pub fn run_on_global_rt<F, T>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = global_rt_handle()?;

    match Handle::try_current() {
        Ok(_) => {
            // Inside some runtime: oneshot::blocking_recv would panic here.
            let (tx, rx) = mpsc::channel();
            handle.spawn(async move {
                let _ = tx.send(fut.await);
            });
            rx.recv().map_err(|_| anyhow!("global runtime task crashed"))?
        }
        Err(_) => {
            let (tx, rx) = oneshot::channel();
            handle.spawn(async move {
                let _ = tx.send(fut.await);
            });
            rx.blocking_recv().map_err(|_| anyhow!("global runtime task crashed"))?
        }
    }
}

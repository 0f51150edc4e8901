/*
 * Dependency Materialization Engine
 * Copyright (C) 2023 Broken-Deer <old_driver__@outlook.com> and contributors
 *
 * This program is free software, you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Worker Pool
//!
//! A bounded pool of `N` workers consumes artifact records from a shared
//! FIFO queue. See spec §4.5 for the supervisor contract this module
//! implements.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::core::artifact::Artifact;
use crate::core::resolver;
use crate::error::{EngineError, EngineResult};

/// Default worker count (spec §4.5).
pub const DEFAULT_WORKERS: usize = 4;
const EMPTY_QUEUE_GRACE_POLLS: u32 = 3;
const EMPTY_QUEUE_POLL_DELAY: Duration = Duration::from_millis(50);
const SUPERVISOR_TICK: Duration = Duration::from_millis(200);
const STATS_INTERVAL: Duration = Duration::from_secs(1);

struct PoolState {
    queue: Mutex<VecDeque<Artifact>>,
    bytes_total: AtomicU64,
    bytes_processed: AtomicU64,
    stop_flag: AtomicBool,
    error_flag: AtomicBool,
    finished: AtomicBool,
    workers_alive: AtomicUsize,
    notify: Notify,
}

impl PoolState {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            bytes_total: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
            stop_flag: AtomicBool::new(false),
            error_flag: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            workers_alive: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }
}

/// Capability object the Dependency Builder enqueues artifacts through,
/// so it never needs a concrete `WorkerPool` reference (spec §9 design
/// note).
pub trait ArtifactSink {
    fn enqueue(&self, artifact: Artifact);
}

/// A bounded-concurrency fetch/unpack/copy executor over a queue of
/// artifacts.
pub struct WorkerPool {
    state: Arc<PoolState>,
    worker_count: usize,
    verify_checksums: bool,
    supervisor: Option<JoinHandle<()>>,
    stats: Option<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(worker_count: usize, verify_checksums: bool) -> Self {
        Self {
            state: Arc::new(PoolState::new()),
            worker_count: worker_count.max(1),
            verify_checksums,
            supervisor: None,
            stats: None,
        }
    }

    /// `enqueue(artifact)` — thread-safe; also increments `bytes_total`.
    pub fn enqueue(&self, artifact: Artifact) {
        self.state.bytes_total.fetch_add(artifact.size, Ordering::SeqCst);
        self.state.queue.lock().unwrap().push_back(artifact);
        self.state.notify.notify_one();
    }

    pub fn progress(&self) -> f64 {
        let total = self.state.bytes_total.load(Ordering::SeqCst).max(1);
        let processed = self.state.bytes_processed.load(Ordering::SeqCst);
        processed as f64 / total as f64
    }

    pub fn bytes_total(&self) -> u64 {
        self.state.bytes_total.load(Ordering::SeqCst)
    }

    pub fn bytes_processed(&self) -> u64 {
        self.state.bytes_processed.load(Ordering::SeqCst)
    }

    pub fn has_error(&self) -> bool {
        self.state.error_flag.load(Ordering::SeqCst)
    }

    pub fn clear_error(&self) {
        self.state.error_flag.store(false, Ordering::SeqCst);
    }

    /// Starts the background supervisor loop and the progress-logging task.
    pub fn start(&mut self) {
        let supervisor_state = self.state.clone();
        let worker_count = self.worker_count;
        let verify_checksums = self.verify_checksums;
        self.supervisor = Some(tokio::spawn(async move {
            supervisor_loop(supervisor_state, worker_count, verify_checksums).await;
        }));

        let stats_state = self.state.clone();
        self.stats = Some(tokio::spawn(async move {
            stats_loop(stats_state).await;
        }));
    }

    /// Waits for the queue to drain and all workers to exit. Returns
    /// `Err(Interrupted)` if a worker latched the error flag.
    pub async fn drain(&mut self) -> EngineResult<()> {
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.stats.take() {
            handle.abort();
        }
        if self.state.error_flag.load(Ordering::SeqCst) {
            return Err(EngineError::Interrupted);
        }
        Ok(())
    }

    /// `stop()` — sets the stop flag, waits for workers to drain, stops the
    /// supervisor, clears the queue, and resets counters. Does not clear the
    /// error flag.
    pub async fn stop(&mut self) {
        self.state.stop_flag.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();

        while self.state.workers_alive.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(EMPTY_QUEUE_POLL_DELAY).await;
        }

        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
        if let Some(handle) = self.stats.take() {
            handle.abort();
        }

        self.state.queue.lock().unwrap().clear();
        self.state.bytes_total.store(0, Ordering::SeqCst);
        self.state.bytes_processed.store(0, Ordering::SeqCst);
        self.state.stop_flag.store(false, Ordering::SeqCst);
        self.state.finished.store(false, Ordering::SeqCst);
    }
}

impl ArtifactSink for WorkerPool {
    fn enqueue(&self, artifact: Artifact) {
        WorkerPool::enqueue(self, artifact);
    }
}

async fn supervisor_loop(state: Arc<PoolState>, worker_count: usize, verify_checksums: bool) {
    loop {
        if state.stop_flag.load(Ordering::SeqCst) {
            break;
        }

        let error = state.error_flag.load(Ordering::SeqCst);
        let queue_empty = state.queue.lock().unwrap().is_empty();
        let alive = state.workers_alive.load(Ordering::SeqCst);

        if !queue_empty && alive == 0 && !error {
            for _ in 0..worker_count {
                state.workers_alive.fetch_add(1, Ordering::SeqCst);
                let worker_state = state.clone();
                tokio::spawn(async move {
                    worker_loop(worker_state, verify_checksums).await;
                });
            }
        }

        if error && alive == 0 {
            // A worker has already latched the error flag and every worker
            // has exited: tear the run down rather than waiting for a queue
            // that will never be serviced again.
            state.finished.store(true, Ordering::SeqCst);
            break;
        }

        if queue_empty && alive == 0 {
            state.finished.store(true, Ordering::SeqCst);
            break;
        }

        tokio::select! {
            _ = state.notify.notified() => {}
            _ = tokio::time::sleep(SUPERVISOR_TICK) => {}
        }
    }
}

async fn worker_loop(state: Arc<PoolState>, verify_checksums: bool) {
    let mut empty_polls = 0;
    loop {
        if state.stop_flag.load(Ordering::SeqCst) {
            break;
        }
        if state.error_flag.load(Ordering::SeqCst) {
            break;
        }

        let artifact = state.queue.lock().unwrap().pop_front();
        let Some(artifact) = artifact else {
            empty_polls += 1;
            if empty_polls >= EMPTY_QUEUE_GRACE_POLLS {
                break;
            }
            tokio::time::sleep(EMPTY_QUEUE_POLL_DELAY).await;
            continue;
        };
        empty_polls = 0;

        match resolver::resolve(&artifact, verify_checksums).await {
            Ok(_) => {
                state.bytes_processed.fetch_add(artifact.size, Ordering::SeqCst);
            }
            Err(err) => {
                log::error!("artifact resolution failed: {err}");
                state.error_flag.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
    state.workers_alive.fetch_sub(1, Ordering::SeqCst);
    state.notify.notify_waiters();
}

async fn stats_loop(state: Arc<PoolState>) {
    loop {
        if state.finished.load(Ordering::SeqCst) {
            break;
        }
        let total = state.bytes_total.load(Ordering::SeqCst).max(1);
        let processed = state.bytes_processed.load(Ordering::SeqCst);
        log::info!("progress: {processed}/{total} bytes ({:.1}%)", processed as f64 / total as f64 * 100.0);
        tokio::time::sleep(STATS_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact::ArtifactOverrides;
    use serde_json::json;

    #[tokio::test]
    async fn drains_cleanly_when_all_artifacts_are_already_local() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = WorkerPool::new(2, true);

        for i in 0..5 {
            let name = format!("f{i}.jar");
            std::fs::write(dir.path().join(&name), b"payload").unwrap();
            let raw = json!({"path": name});
            let artifact = Artifact::from_raw(&raw, dir.path().to_path_buf(), ArtifactOverrides::default());
            pool.enqueue(artifact);
        }

        pool.start();
        pool.drain().await.unwrap();

        assert!(!pool.has_error());
        // Invariant 6: bytes_processed == bytes_total after a clean run.
        assert_eq!(pool.bytes_processed(), pool.bytes_total());
    }

    #[tokio::test]
    async fn failure_latches_error_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = WorkerPool::new(1, true);

        // No url and no local file: MissingField -> DownloadFailed path is
        // never reached, resolve() itself returns Err immediately.
        let raw = json!({});
        let artifact = Artifact::from_raw(&raw, dir.path().to_path_buf(), ArtifactOverrides::default());
        pool.enqueue(artifact);

        pool.start();
        let result = pool.drain().await;
        assert!(result.is_err());
        assert!(pool.has_error());
    }

    #[tokio::test]
    async fn bytes_processed_never_exceeds_bytes_total() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = WorkerPool::new(4, true);
        for i in 0..20 {
            let name = format!("f{i}.jar");
            std::fs::write(dir.path().join(&name), vec![0u8; 100]).unwrap();
            let raw = json!({"path": name, "size": 100});
            let artifact = Artifact::from_raw(&raw, dir.path().to_path_buf(), ArtifactOverrides::default());
            pool.enqueue(artifact);
        }
        pool.start();
        pool.drain().await.unwrap();
        assert!(pool.bytes_processed() <= pool.bytes_total());
    }

    // S6: retry. An artifact whose first two fetches checksum-mismatch and
    // third succeeds is only counted once in bytes_processed, not once per
    // attempt.
    #[tokio::test]
    async fn s6_retry_counts_bytes_processed_once_not_once_per_attempt() {
        use sha1::{Digest, Sha1};
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;

        let good_body = b"pool-level-retry-payload".to_vec();
        let mut hasher = Sha1::new();
        hasher.update(&good_body);
        let good_sha1: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();

        let requests = Arc::new(AtomicU32::new(0));
        let requests_in_mock = requests.clone();
        let good_body_in_mock = good_body.clone();
        let _mock = server
            .mock("GET", "/artifact.jar")
            .with_status(200)
            .with_body_from_request(move |_req| {
                let attempt = requests_in_mock.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    b"truncated-garbage".to_vec()
                } else {
                    good_body_in_mock.clone()
                }
            })
            .create_async()
            .await;

        let mut pool = WorkerPool::new(1, true);
        let raw = json!({
            "url": format!("{}/artifact.jar", server.url()),
            "path": "a.jar",
            "sha1": good_sha1,
            "size": good_body.len() as u64,
        });
        let artifact = Artifact::from_raw(&raw, dir.path().to_path_buf(), ArtifactOverrides::default());
        pool.enqueue(artifact);

        pool.start();
        pool.drain().await.unwrap();

        assert!(!pool.has_error());
        assert_eq!(pool.bytes_processed(), good_body.len() as u64);
        assert_eq!(requests.load(Ordering::SeqCst), 3);
    }
}

//! Worker pool management.
//!
//! Workers are expensive to create, so the pool keeps idle ones on a FIFO free
//! list and reuses them. The pool also owns the active server code: updating
//! it bumps the pool's version, and workers built from older code are
//! discarded the next time they are drawn from the free list.

use super::{Request, Response, Worker};
use crate::error::{ErrorCode, Result, RuntimeError};
use crate::metrics::{MetricsCollector, PoolStats};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Mutable pool state, guarded by a single lock
struct PoolState {
    /// Active server code
    code: Arc<str>,
    /// Version hash of the active code
    version: String,
    /// When the active code was installed
    updated_at: DateTime<Utc>,
    /// Idle workers, oldest first
    workers: VecDeque<Worker>,
    /// Shutdown flag
    shut_down: bool,
}

struct PoolInner {
    state: Mutex<PoolState>,
    metrics: MetricsCollector,
}

impl PoolInner {
    fn discard(&self, workers: &[Worker]) {
        if workers.is_empty() {
            return;
        }
        for worker in workers {
            worker.close();
        }
        self.metrics.record_workers_discarded(workers.len());
    }
}

/// Pool of render workers sharing one active code version
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool for `code`.
    ///
    /// The first worker is built immediately, so code that fails to load is
    /// reported here rather than on the first render.
    pub async fn new(code: &str) -> Result<Self> {
        let worker = Worker::new(code).await?;
        let version = worker.version().to_string();

        info!(version = %version, "Created render pool");

        let metrics = MetricsCollector::new();
        metrics.record_worker_created();

        Ok(Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    code: Arc::from(code),
                    version,
                    updated_at: Utc::now(),
                    workers: VecDeque::from([worker]),
                    shut_down: false,
                }),
                metrics,
            }),
        })
    }

    /// Render a request on a pooled worker.
    ///
    /// A worker whose render fails for any reason, timeouts included, is
    /// closed and never reused.
    #[instrument(skip(self, req), fields(view = %req.name))]
    pub async fn render(&self, req: Request) -> Result<Response> {
        let started = Instant::now();
        let metrics = &self.inner.metrics;

        let worker = match self.get().await {
            Ok(worker) => worker,
            Err(e) => {
                metrics.record_error(e.code());
                metrics.record_render(started.elapsed(), false);
                return Err(e);
            }
        };

        match worker.render(req).await {
            Ok(response) => {
                self.put(worker);
                metrics.record_render(started.elapsed(), true);
                Ok(response)
            }
            Err(e) => {
                warn!(worker = %worker.id(), error = %e, "Render failed, discarding worker");
                self.inner.discard(std::slice::from_ref(&worker));
                metrics.record_error(e.code());
                metrics.record_render(started.elapsed(), false);
                Err(e)
            }
        }
    }

    /// Take a worker running the active code version.
    ///
    /// Closed and stale workers found on the free list are discarded. When
    /// none is left, a new worker is built from the active code.
    pub async fn get(&self) -> Result<Worker> {
        let (found, discarded, code) = {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                return Err(RuntimeError::Shutdown);
            }

            let mut discarded = Vec::new();
            let mut found = None;
            while let Some(worker) = state.workers.pop_front() {
                if worker.is_closed() || worker.version() != state.version {
                    discarded.push(worker);
                } else {
                    found = Some(worker);
                    break;
                }
            }
            (found, discarded, Arc::clone(&state.code))
        };

        if !discarded.is_empty() {
            debug!(count = discarded.len(), "Discarding stale workers");
            self.inner.discard(&discarded);
        }

        if let Some(worker) = found {
            debug!(worker = %worker.id(), "Reusing pooled worker");
            return Ok(worker);
        }

        let worker = Worker::new(&code).await?;
        self.inner.metrics.record_worker_created();
        debug!(worker = %worker.id(), "Created new worker");
        Ok(worker)
    }

    /// Return a worker to the back of the free list.
    ///
    /// The worker is not inspected here; [`Pool::get`] filters it out later if
    /// it turns out closed or stale. After shutdown the worker is closed.
    pub fn put(&self, worker: Worker) {
        let mut state = self.inner.state.lock();
        if state.shut_down {
            drop(state);
            self.inner.discard(&[worker]);
            return;
        }
        state.workers.push_back(worker);
    }

    /// Replace the active code.
    ///
    /// A worker is built from `code` before anything changes, so code that
    /// fails to load leaves the previous version active. Idle workers are
    /// retired; workers checked out at the time keep running the old code and
    /// are discarded when they come back through [`Pool::get`].
    #[instrument(skip(self, code), fields(bytes = code.len()))]
    pub async fn update_code(&self, code: &str) -> Result<()> {
        self.ensure_running()?;

        let worker = match Worker::new(code).await {
            Ok(worker) => worker,
            Err(e) => {
                warn!(error = %e, "Rejected code update");
                self.inner.metrics.record_error(e.code());
                return Err(e);
            }
        };
        self.inner.metrics.record_worker_created();
        let version = worker.version().to_string();

        let mut state = self.inner.state.lock();
        if state.shut_down {
            drop(state);
            self.inner.discard(&[worker]);
            return Err(RuntimeError::Shutdown);
        }

        let previous = std::mem::replace(&mut state.version, version);
        state.code = Arc::from(code);
        state.updated_at = Utc::now();
        let retired = std::mem::replace(&mut state.workers, VecDeque::from([worker]));
        let version = state.version.clone();
        drop(state);

        self.inner.discard(Vec::from(retired).as_slice());
        self.inner.metrics.record_code_update();

        info!(previous = %previous, version = %version, "Updated render code");
        Ok(())
    }

    /// Version hash of the active code
    pub fn version(&self) -> String {
        self.inner.state.lock().version.clone()
    }

    /// Number of workers on the free list, stale ones included
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().workers.len()
    }

    /// Whether the pool has been shut down
    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shut_down
    }

    /// Pool metrics
    pub fn metrics(&self) -> &MetricsCollector {
        &self.inner.metrics
    }

    /// Export Prometheus-format metrics
    pub fn prometheus_metrics(&self) -> String {
        self.inner.metrics.to_prometheus()
    }

    /// Point-in-time statistics
    pub fn stats(&self) -> PoolStats {
        let (version, code_updated_at, idle_workers) = {
            let state = self.inner.state.lock();
            (state.version.clone(), state.updated_at, state.workers.len())
        };
        let metrics = &self.inner.metrics;

        PoolStats {
            version,
            code_updated_at,
            idle_workers,
            workers_created: metrics.workers_created(),
            workers_discarded: metrics.workers_discarded(),
            total_renders: metrics.total_renders(),
            successful_renders: metrics.successful_renders(),
            failed_renders: metrics.failed_renders(),
            timeouts: metrics.error_count(ErrorCode::Timeout),
            code_updates: metrics.code_updates(),
            avg_render_time_us: metrics.avg_render_time_us(),
        }
    }

    /// Shutdown the pool, closing every idle worker.
    ///
    /// Workers still checked out are closed when they are put back.
    pub fn shutdown(&self) {
        let idle = {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            std::mem::take(&mut state.workers)
        };

        info!(idle = idle.len(), "Shutting down render pool");
        self.inner.discard(Vec::from(idle).as_slice());
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(RuntimeError::Shutdown);
        }
        Ok(())
    }
}

impl Clone for Pool {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Pool")
            .field("version", &state.version)
            .field("idle", &state.workers.len())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

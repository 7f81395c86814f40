//! A single stateful rendering engine.
//!
//! A [`Worker`] owns one engine context with the server code loaded into it.
//! Renders are raced against a deadline; a render that loses the race is not
//! cancelled, its result is simply dropped once it arrives.

use super::{checksum, Request, Response};
use crate::engine::{self, ContextId, EngineContext};
use crate::error::{ErrorCode, Result, RuntimeError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Unique worker ID
pub type WorkerId = Uuid;

struct WorkerInner {
    id: WorkerId,
    context_id: ContextId,
    entry_point: String,
    debug: bool,
    closed: AtomicBool,
    renders: AtomicU64,
    engine: Mutex<Option<EngineContext>>,
}

impl WorkerInner {
    async fn execute(&self, req: Request) -> Result<Response> {
        let started = Instant::now();
        let payload = serde_json::to_string(&req)?;

        let output = self.call_entry_point(&payload).await;
        self.reap();
        let output = output?;
        if self.debug {
            debug!(worker = %self.id, %payload, %output, "Render payload");
        }

        let mut response: Response = serde_json::from_str(&output).map_err(|e| {
            RuntimeError::Serialization(format!("invalid render output {:?}: {}", output, e))
        })?;
        response.elapsed = started.elapsed();
        Ok(response)
    }

    async fn call_entry_point(&self, payload: &str) -> Result<String> {
        let engine = self.engine.lock().await;
        let context = match engine.as_ref() {
            Some(context) if !self.closed.load(Ordering::SeqCst) => context,
            _ => return Err(RuntimeError::Closed),
        };

        let mut value = context.call(&self.entry_point, &[payload]).await?;
        let output = value.stringify().await;
        value.release();
        self.renders.fetch_add(1, Ordering::Relaxed);
        Ok(output)
    }

    /// Release the engine if the worker is closed and nobody holds the engine.
    fn reap(&self) {
        if !self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(mut engine) = self.engine.try_lock() {
            if let Some(mut context) = engine.take() {
                context.release();
                debug!(worker = %self.id, "Released worker engine");
            }
        }
    }
}

/// A stateful engine instance loaded with one version of the server code
pub struct Worker {
    version: String,
    created_at: Instant,
    inner: Arc<WorkerInner>,
}

impl Worker {
    /// Create a worker and load `code` into a fresh engine context.
    ///
    /// Load failures are reported as [`ErrorCode::CompilationError`] carrying
    /// the script's error text.
    pub async fn new(code: &str) -> Result<Self> {
        let config = engine::runtime()?.config();
        let mut context = EngineContext::new()?;

        if let Err(e) = context.evaluate_release(code, &config.script_label).await {
            context.release();
            return Err(match e {
                RuntimeError::Script(err) => {
                    RuntimeError::Script(err.with_code(ErrorCode::CompilationError))
                }
                other => other,
            });
        }

        let worker = Self {
            version: checksum(code),
            created_at: Instant::now(),
            inner: Arc::new(WorkerInner {
                id: Uuid::new_v4(),
                context_id: context.id(),
                entry_point: config.entry_point.clone(),
                debug: config.debug,
                closed: AtomicBool::new(false),
                renders: AtomicU64::new(0),
                engine: Mutex::new(Some(context)),
            }),
        };
        debug!(worker = %worker.id(), version = %worker.version, "Created worker");
        Ok(worker)
    }

    /// Worker ID
    pub fn id(&self) -> WorkerId {
        self.inner.id
    }

    /// Version hash of the code this worker was built from
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether the worker has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Renders that reached the engine and produced a value
    pub fn render_count(&self) -> u64 {
        self.inner.renders.load(Ordering::Relaxed)
    }

    /// Whether the engine context has been released
    pub fn is_engine_released(&self) -> bool {
        match self.inner.engine.try_lock() {
            Ok(engine) => engine.is_none(),
            Err(_) => false,
        }
    }

    /// ID of the engine context backing this worker
    pub fn context_id(&self) -> ContextId {
        self.inner.context_id
    }

    /// Time since the worker was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Render a request, bounded by its timeout.
    ///
    /// A zero timeout uses the runtime default. The deadline is strict: a
    /// render that completes after it is still reported as timed out.
    #[instrument(skip(self, req), fields(worker = %self.inner.id, view = %req.name))]
    pub async fn render(&self, req: Request) -> Result<Response> {
        if self.is_closed() {
            return Err(RuntimeError::Closed);
        }

        let timeout = if req.timeout.is_zero() {
            engine::runtime()?.config().default_timeout()
        } else {
            req.timeout
        };

        let started = Instant::now();
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.execute(req).await });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(_)) if started.elapsed() > timeout => {
                warn!(?timeout, "Render finished past its deadline");
                Err(RuntimeError::TimedOut(timeout))
            }
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RuntimeError::Internal(format!("render task failed: {}", e))),
            Err(_) => {
                warn!(?timeout, "Render timed out");
                Err(RuntimeError::TimedOut(timeout))
            }
        }
    }

    /// Close the worker. Safe to call more than once and from any thread.
    ///
    /// Never blocks: if a render currently holds the engine, that render
    /// releases it when it finishes.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!(worker = %self.inner.id, "Closing worker");
        }
        self.inner.reap();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.inner.id)
            .field("version", &self.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}

//! Script engine binding.
//!
//! The engine is an external collaborator: this module only exposes the narrow
//! capability surface the reactor needs (create a context, evaluate, call,
//! stringify, release) over `boa_engine`. Within the crate, only
//! [`crate::render`] holds engine handles.
//!
//! ## Lifecycle
//!
//! The process-wide [`EngineRuntime`] is initialized exactly once with
//! [`init`] and never torn down. Every [`EngineContext`] runs on a dedicated
//! engine thread and is registered with the runtime until that thread has
//! dropped its context.

pub mod context;
mod isolate;

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

pub use context::{EngineContext, EngineValue};

/// Identifier of an engine context, unique for the life of the process
pub type ContextId = u64;

static RUNTIME: OnceCell<EngineRuntime> = OnceCell::new();

/// Registry entry for a live engine context
#[derive(Debug, Clone)]
pub struct ContextInfo {
    /// Context ID
    pub id: ContextId,
    /// Name of the engine thread hosting the context
    pub thread_name: String,
    /// When the context was created
    pub created_at: DateTime<Utc>,
}

/// Process-wide engine state
pub struct EngineRuntime {
    config: RuntimeConfig,
    started_at: DateTime<Utc>,
    next_context_id: AtomicU64,
    contexts: DashMap<ContextId, ContextInfo>,
}

impl EngineRuntime {
    fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            started_at: Utc::now(),
            next_context_id: AtomicU64::new(1),
            contexts: DashMap::new(),
        }
    }

    /// The configuration the runtime was initialized with
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// When the runtime was initialized
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Number of engine contexts whose thread is still holding a context
    pub fn live_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Whether the given context is still held by its engine thread
    pub fn is_live(&self, id: ContextId) -> bool {
        self.contexts.contains_key(&id)
    }

    /// Registry entry for a live context
    pub fn context_info(&self, id: ContextId) -> Option<ContextInfo> {
        self.contexts.get(&id).map(|entry| entry.value().clone())
    }

    /// Total contexts created since initialization
    pub fn contexts_created(&self) -> u64 {
        self.next_context_id.load(Ordering::Relaxed) - 1
    }

    fn register(&self) -> ContextInfo {
        let id = self.next_context_id.fetch_add(1, Ordering::Relaxed);
        let info = ContextInfo {
            id,
            thread_name: format!("reactor-engine-{}", id),
            created_at: Utc::now(),
        };
        self.contexts.insert(id, info.clone());
        info
    }

    fn unregister(&self, id: ContextId) {
        self.contexts.remove(&id);
    }
}

/// Initialize the process-wide engine runtime.
///
/// Call this once at process start, before constructing any pool or worker.
/// Later calls return the already-initialized runtime; a differing
/// configuration is ignored with a warning.
pub fn init(config: RuntimeConfig) -> Result<&'static EngineRuntime> {
    config.validate()?;

    let mut installed = false;
    let runtime = RUNTIME.get_or_init(|| {
        installed = true;
        EngineRuntime::new(config.clone())
    });

    if installed {
        info!(
            default_timeout_ms = runtime.config.default_timeout_ms,
            entry_point = %runtime.config.entry_point,
            "Initialized engine runtime"
        );
    } else if runtime.config != config {
        warn!("Engine runtime already initialized, ignoring new configuration");
    }

    Ok(runtime)
}

/// The process-wide engine runtime, if [`init`] has been called
pub fn runtime() -> Result<&'static EngineRuntime> {
    RUNTIME.get().ok_or(RuntimeError::NotInitialized)
}

/// Whether [`init`] has been called
pub fn is_initialized() -> bool {
    RUNTIME.get().is_some()
}

#[cfg(test)]
pub(crate) fn init_for_tests() -> &'static EngineRuntime {
    init(RuntimeConfig::default()).expect("default config is valid")
}

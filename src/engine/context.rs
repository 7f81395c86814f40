//! Owned handles to engine contexts and the values they produce.
//!
//! Both handles release their engine-side resources exactly once, either
//! explicitly through `release` or when dropped. Once a context is released,
//! its outstanding values become inert: stringifying one yields `"undefined"`
//! and releasing one only logs a warning.

use super::isolate::{self, Command, ValueId, UNDEFINED};
use super::ContextId;
use crate::error::{Result, RuntimeError};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

struct ContextShared {
    id: ContextId,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl ContextShared {
    fn send(&self, command: Command) -> std::result::Result<(), Command> {
        let commands = self.commands.lock();
        match commands.as_ref() {
            Some(tx) => tx.send(command).map_err(|e| e.0),
            None => Err(command),
        }
    }

    fn is_released(&self) -> bool {
        self.commands.lock().is_none()
    }
}

/// An isolated, stateful script execution environment
pub struct EngineContext {
    shared: Arc<ContextShared>,
}

impl EngineContext {
    /// Create a fresh context on its own engine thread.
    ///
    /// Fails with [`RuntimeError::NotInitialized`] before [`crate::init`].
    pub fn new() -> Result<Self> {
        let runtime = super::runtime()?;
        let info = runtime.register();

        let commands = match isolate::spawn(&info, runtime.config().engine_stack_size_bytes) {
            Ok(commands) => commands,
            Err(e) => {
                runtime.unregister(info.id);
                return Err(RuntimeError::Io(e));
            }
        };

        Ok(Self {
            shared: Arc::new(ContextShared {
                id: info.id,
                commands: Mutex::new(Some(commands)),
            }),
        })
    }

    /// Context ID
    pub fn id(&self) -> ContextId {
        self.shared.id
    }

    /// Evaluate source text, returning either a value or the script's error
    pub async fn evaluate(&self, source: &str, label: &str) -> Result<EngineValue> {
        let (reply, response) = oneshot::channel();
        self.shared
            .send(Command::Eval {
                source: source.to_string(),
                label: label.to_string(),
                reply,
            })
            .map_err(|_| RuntimeError::ContextReleased)?;

        let value = response
            .await
            .map_err(|_| RuntimeError::ContextReleased)??;

        Ok(EngineValue {
            id: Some(value),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Evaluate source text, keeping only the error
    pub async fn evaluate_release(&self, source: &str, label: &str) -> Result<()> {
        let mut value = self.evaluate(source, label).await?;
        value.release();
        Ok(())
    }

    /// Call a global function with JSON-encoded positional arguments
    pub async fn call<A: Serialize>(&self, name: &str, args: &[A]) -> Result<EngineValue> {
        let mut encoded = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let json = serde_json::to_string(arg).map_err(|e| {
                RuntimeError::Serialization(format!("can't encode argument {}: {}", i, e))
            })?;
            encoded.push(json);
        }

        let source = format!("{}({})", name, encoded.join(","));
        self.evaluate(&source, name).await
    }

    /// Whether the context has been released
    pub fn is_released(&self) -> bool {
        self.shared.is_released()
    }

    /// Release the context. Safe to call more than once.
    ///
    /// Commands already queued, including a call still running, finish before
    /// the engine thread drops the context.
    pub fn release(&mut self) {
        if self.shared.commands.lock().take().is_some() {
            debug!(context = self.shared.id, "Releasing engine context");
        }
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("id", &self.shared.id)
            .field("released", &self.is_released())
            .finish()
    }
}

/// A value held inside an engine context
pub struct EngineValue {
    id: Option<ValueId>,
    shared: Arc<ContextShared>,
}

impl std::fmt::Debug for EngineValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineValue")
            .field("id", &self.id)
            .field("context", &self.shared.id)
            .finish()
    }
}

impl EngineValue {
    /// Text form of the value, or `"undefined"` once it or its context is released
    pub async fn stringify(&self) -> String {
        let Some(value) = self.id else {
            return UNDEFINED.to_string();
        };

        let (reply, response) = oneshot::channel();
        if self.shared.send(Command::Stringify { value, reply }).is_err() {
            return UNDEFINED.to_string();
        }
        response.await.unwrap_or_else(|_| UNDEFINED.to_string())
    }

    /// Release the value. Safe to call more than once.
    pub fn release(&mut self) {
        let Some(value) = self.id.take() else {
            return;
        };

        if self.shared.send(Command::Release { value }).is_err() {
            warn!(
                context = self.shared.id,
                value, "Released a value whose engine context was already released"
            );
        }
    }
}

impl Drop for EngineValue {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::init_for_tests;
    use crate::error::ErrorCode;
    use std::time::Duration;

    async fn wait_until_dead(id: ContextId) -> bool {
        let runtime = init_for_tests();
        for _ in 0..200 {
            if !runtime.is_live(id) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_evaluate_and_stringify() {
        init_for_tests();
        let ctx = EngineContext::new().unwrap();

        let value = ctx.evaluate("5 + 5;", "sum.js").await.unwrap();
        assert_eq!(value.stringify().await, "10");
    }

    #[tokio::test]
    async fn test_evaluate_keeps_state() {
        init_for_tests();
        let ctx = EngineContext::new().unwrap();

        ctx.evaluate_release("var counter = 40;", "setup.js")
            .await
            .unwrap();
        let value = ctx.evaluate("counter + 2", "read.js").await.unwrap();
        assert_eq!(value.stringify().await, "42");
    }

    #[tokio::test]
    async fn test_call_with_json_arguments() {
        init_for_tests();
        let ctx = EngineContext::new().unwrap();
        ctx.evaluate_release("function double(n) { return n * 2; }", "double.js")
            .await
            .unwrap();

        let value = ctx.call("double", &[21]).await.unwrap();
        assert_eq!(value.stringify().await, "42");

        ctx.evaluate_release("function greet(a, b) { return a + ', ' + b; }", "greet.js")
            .await
            .unwrap();
        let value = ctx.call("greet", &["hello", "world"]).await.unwrap();
        assert_eq!(value.stringify().await, "hello, world");
    }

    #[tokio::test]
    async fn test_stringify_object_as_json() {
        init_for_tests();
        let ctx = EngineContext::new().unwrap();

        let value = ctx
            .evaluate("({ html: '<b>hi</b>' })", "object.js")
            .await
            .unwrap();
        assert_eq!(value.stringify().await, r#"{"html":"<b>hi</b>"}"#);

        let value = ctx.evaluate("undefined", "undefined.js").await.unwrap();
        assert_eq!(value.stringify().await, "undefined");
    }

    #[tokio::test]
    async fn test_thrown_value_is_reported() {
        init_for_tests();
        let ctx = EngineContext::new().unwrap();

        let err = ctx.evaluate("throw 'hi';", "server.js").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecutionError);
        let message = err.to_string();
        assert!(message.contains("Uncaught exception: hi"), "{}", message);
        assert!(message.contains("server.js"), "{}", message);
    }

    #[tokio::test]
    async fn test_missing_function_is_reported() {
        init_for_tests();
        let ctx = EngineContext::new().unwrap();

        let err = ctx.call("render", &["{}"]).await.unwrap_err();
        assert!(err.to_string().contains("render is not defined"), "{}", err);
    }

    #[tokio::test]
    async fn test_syntax_error_is_reported() {
        init_for_tests();
        let ctx = EngineContext::new().unwrap();

        let err = ctx.evaluate("function (", "broken.js").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecutionError);
    }

    #[tokio::test]
    async fn test_release_value_twice() {
        init_for_tests();
        let ctx = EngineContext::new().unwrap();

        let mut value = ctx.evaluate("5 + 5;", "").await.unwrap();
        value.release();
        value.release();
        assert_eq!(value.stringify().await, "undefined");
    }

    #[tokio::test]
    async fn test_release_context_twice() {
        let runtime = init_for_tests();
        let mut ctx = EngineContext::new().unwrap();
        let id = ctx.id();
        assert!(runtime.is_live(id));

        ctx.release();
        ctx.release();
        assert!(ctx.is_released());
        assert!(wait_until_dead(id).await);
    }

    #[tokio::test]
    async fn test_value_outlives_context() {
        init_for_tests();
        let mut ctx = EngineContext::new().unwrap();

        let mut value = ctx.evaluate("5 + 5;", "").await.unwrap();
        assert_eq!(value.stringify().await, "10");

        ctx.release();
        assert_eq!(value.stringify().await, "undefined");
        value.release();
    }

    #[tokio::test]
    async fn test_use_after_release_fails() {
        init_for_tests();
        let mut ctx = EngineContext::new().unwrap();
        ctx.release();

        let err = ctx.evaluate("1", "").await.unwrap_err();
        assert!(matches!(err, RuntimeError::ContextReleased));
    }

    #[tokio::test]
    async fn test_drop_releases_context() {
        init_for_tests();
        let ctx = EngineContext::new().unwrap();
        let id = ctx.id();
        drop(ctx);
        assert!(wait_until_dead(id).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_context_torture() {
        init_for_tests();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                tokio::spawn(async {
                    for _ in 0..5 {
                        let mut ctx = EngineContext::new().unwrap();
                        let value = ctx.evaluate("1 + 1", "").await.unwrap();
                        assert_eq!(value.stringify().await, "2");
                        drop(value);
                        ctx.release();
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
    }
}

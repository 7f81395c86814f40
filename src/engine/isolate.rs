//! Engine thread hosting a single boa context.
//!
//! A boa `Context` is single-threaded, so each one lives on its own OS thread
//! and is driven by commands sent over a channel. Commands run strictly in
//! order; the context is dropped only once the host has released its sender
//! and every queued command has run.

use super::{ContextId, ContextInfo};
use crate::error::ScriptError;
use boa_engine::{js_string, Context, JsError, JsValue, Source};
use std::collections::HashMap;
use std::io;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Handle of a value held by the engine thread
pub(super) type ValueId = u64;

pub(super) const UNDEFINED: &str = "undefined";

/// Work sent from the host side to an engine thread
pub(super) enum Command {
    Eval {
        source: String,
        label: String,
        reply: oneshot::Sender<Result<ValueId, ScriptError>>,
    },
    Stringify {
        value: ValueId,
        reply: oneshot::Sender<String>,
    },
    Release {
        value: ValueId,
    },
}

/// Start an engine thread for the given context.
pub(super) fn spawn(
    info: &ContextInfo,
    stack_size: usize,
) -> io::Result<mpsc::UnboundedSender<Command>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = info.id;

    std::thread::Builder::new()
        .name(info.thread_name.clone())
        .stack_size(stack_size)
        .spawn(move || run(id, rx))?;

    Ok(tx)
}

fn run(id: ContextId, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut isolate = Isolate::new();
    debug!(context = id, "Engine context created");

    while let Some(command) = commands.blocking_recv() {
        isolate.handle(command);
    }

    let leaked = isolate.values.len();
    drop(isolate);

    if let Ok(runtime) = super::runtime() {
        runtime.unregister(id);
    }
    debug!(context = id, unreleased_values = leaked, "Engine context released");
}

struct Isolate {
    context: Context,
    values: HashMap<ValueId, JsValue>,
    next_value: ValueId,
}

impl Isolate {
    fn new() -> Self {
        Self {
            context: Context::default(),
            values: HashMap::new(),
            next_value: 1,
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Eval {
                source,
                label,
                reply,
            } => {
                let outcome = self.eval(&source, &label);
                if let Err(Ok(value)) = reply.send(outcome) {
                    // Nobody is waiting for the result any more.
                    self.values.remove(&value);
                }
            }
            Command::Stringify { value, reply } => {
                let text = match self.values.get(&value).cloned() {
                    Some(value) => self.stringify(&value),
                    None => UNDEFINED.to_string(),
                };
                let _ = reply.send(text);
            }
            Command::Release { value } => {
                if self.values.remove(&value).is_none() {
                    trace!(value, "Release of unknown value ignored");
                }
            }
        }
    }

    fn eval(&mut self, source: &str, label: &str) -> Result<ValueId, ScriptError> {
        match self.context.eval(Source::from_bytes(source)) {
            Ok(value) => {
                let id = self.next_value;
                self.next_value += 1;
                self.values.insert(id, value);
                Ok(id)
            }
            Err(err) => Err(self.describe(err).with_label(label)),
        }
    }

    /// Strings verbatim, objects through `JSON.stringify`, anything else
    /// through `String()`.
    fn stringify(&mut self, value: &JsValue) -> String {
        if value.is_undefined() {
            return UNDEFINED.to_string();
        }

        if value.is_object() && !value.is_callable() {
            if let Some(json) = self.json_stringify(value) {
                return json;
            }
        }

        value
            .to_string(&mut self.context)
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_else(|_| UNDEFINED.to_string())
    }

    fn json_stringify(&mut self, value: &JsValue) -> Option<String> {
        let ctx = &mut self.context;
        let json = ctx.global_object().get(js_string!("JSON"), ctx).ok()?;
        let json = json.as_object()?;
        let stringify = json.get(js_string!("stringify"), ctx).ok()?;
        let stringify = stringify.as_object()?;

        let result = stringify
            .call(&JsValue::from(json.clone()), &[value.clone()], ctx)
            .ok()?;
        if result.is_undefined() {
            return None;
        }
        result
            .to_string(ctx)
            .ok()
            .map(|s| s.to_std_string_escaped())
    }

    fn describe(&mut self, err: JsError) -> ScriptError {
        let ctx = &mut self.context;

        let Some(thrown) = err.as_opaque().cloned() else {
            return ScriptError::execution_error(err.to_string());
        };

        let text = thrown
            .to_string(ctx)
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_else(|_| err.to_string());
        let mut script_error = ScriptError::execution_error(format!("Uncaught exception: {}", text));

        let stack = thrown
            .as_object()
            .and_then(|obj| obj.get(js_string!("stack"), ctx).ok())
            .filter(|stack| stack.is_string())
            .and_then(|stack| stack.to_string(ctx).ok())
            .map(|stack| stack.to_std_string_escaped())
            .filter(|stack| !stack.is_empty());
        if let Some(stack) = stack {
            script_error = script_error.with_stack(stack);
        }

        script_error
    }
}

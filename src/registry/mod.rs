//! Polymorphic dispatch by `kind` (§6, §9): the statically-typed
//! replacement for the source's import-by-string action lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineError;

/// The executable behaviour behind a leaf task's `kind`.
///
/// Implementations receive the task's merged `input` and return its
/// `output`, matching `Task.action()` in the source model. Errors
/// propagate as an `anyhow::Error`; the node wraps it into
/// [`EngineError::ActionFailed`] and transitions the task to `FAILED`.
#[async_trait]
pub trait TaskAction: Send + Sync {
    async fn run(&self, input: Option<Value>) -> anyhow::Result<Option<Value>>;
}

/// A `TaskAction` built directly from an async closure, for small
/// inline actions (demos, tests) that don't warrant a named type.
pub struct FnAction<F>(pub F);

#[async_trait]
impl<F, Fut> TaskAction for FnAction<F>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Option<Value>>> + Send,
{
    async fn run(&self, input: Option<Value>) -> anyhow::Result<Option<Value>> {
        (self.0)(input).await
    }
}

/// Maps a task's `kind` string to the `TaskAction` implementation that
/// must run it. Loading a task whose `kind` is unregistered fails
/// loudly (§6).
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn TaskAction>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, action: Arc<dyn TaskAction>) {
        self.actions.insert(kind.into(), action);
    }

    pub fn resolve(&self, kind: &str) -> Result<Arc<dyn TaskAction>, EngineError> {
        self.actions
            .get(kind)
            .cloned()
            .ok_or_else(|| EngineError::UnknownKind { kind: kind.to_string() })
    }
}

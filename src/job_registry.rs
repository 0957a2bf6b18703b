use crate::background_job::BackgroundJob;
use anyhow::Context as _;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A type-erased handler: takes the decoded payload, resolves once the work is done.
pub type HandlerFn = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Maps job types to the handlers that run them.
///
/// Built once at start-up and then shared (usually behind an `Arc`) by every
/// executor and worker of the process.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `job_type`, replacing any earlier registration.
    pub fn register<F, Fut>(&mut self, job_type: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |payload| handler(payload).boxed());
        self.handlers.insert(job_type.into(), handler);
        self
    }

    /// Registers the typed job `J`, running it with a clone of `context` each time.
    pub fn register_job<J: BackgroundJob>(&mut self, context: J::Context) -> &mut Self {
        self.register(J::JOB_TYPE, move |payload| {
            let context = context.clone();
            async move {
                let job: J = serde_json::from_value(payload)
                    .with_context(|| format!("failed to deserialize {} payload", J::JOB_TYPE))?;
                job.run(context).await
            }
        })
    }

    /// Looks up the handler for `job_type`.
    pub fn get(&self, job_type: &str) -> Option<HandlerFn> {
        self.handlers.get(job_type).cloned()
    }

    /// Whether a handler is registered for `job_type`.
    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut job_types: Vec<String> = self.handlers.keys().cloned().collect();
        job_types.sort_unstable();
        job_types
    }
}

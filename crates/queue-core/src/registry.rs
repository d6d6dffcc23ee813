use crate::collaborators::{ContainerRuntime, HealthProbe, ProjectStore, SessionServerClient};
use crate::jobs::{AdminApi, HandlerOutcome, Job, JobError, JobsRepo};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
type HandlerFn = dyn for<'a> Fn(&'a Job, &'a JobContext) -> BoxFuture<'a, HandlerOutcome> + Send + Sync;

/// Everything a handler needs besides the job itself: the Store (to check
/// cancellation), the Admin API (to enqueue successors), and the external
/// collaborators (§6.3).
#[derive(Clone)]
pub struct JobContext {
    pub worker_id: String,
    pub jobs: JobsRepo,
    pub admin: AdminApi,
    pub projects: Arc<dyn ProjectStore>,
    pub containers: Arc<dyn ContainerRuntime>,
    pub sessions: Arc<dyn SessionServerClient>,
    pub health: Arc<dyn HealthProbe>,
}

impl JobContext {
    /// `ThrowIfCancelRequested()` (§4.5): refetches `cancel_requested_at` from
    /// the Store. Infra failure is treated as "not cancelled" — the handler's
    /// own error path will surface the underlying problem.
    pub async fn cancel_requested(&self, job: &Job) -> bool {
        self.jobs.is_cancel_requested(job.id).await.unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct HandlerEntry {
    handler: Arc<HandlerFn>,
    timeout: Option<Duration>,
}

impl HandlerEntry {
    pub async fn run(&self, job: &Job, ctx: &JobContext) -> HandlerOutcome {
        let fut = (self.handler)(job, ctx);
        match self.timeout {
            Some(dur) => match timeout(dur, fut).await {
                Ok(outcome) => outcome,
                Err(_) => HandlerOutcome::Failed(JobError::new(
                    "TIMEOUT",
                    format!("handler timeout after {}ms", dur.as_millis()),
                )),
            },
            None => fut.await,
        }
    }
}

/// Maps each job `type` (closed set, §6.2) to its handler (§4.5).
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, job_type: &str, handler: F)
    where
        F: for<'a> Fn(&'a Job, &'a JobContext) -> BoxFuture<'a, HandlerOutcome> + Send + Sync + 'static,
    {
        self.register_with_timeout_opt(job_type, handler, None);
    }

    pub fn register_with_timeout<F>(&mut self, job_type: &str, handler: F, timeout_dur: Duration)
    where
        F: for<'a> Fn(&'a Job, &'a JobContext) -> BoxFuture<'a, HandlerOutcome> + Send + Sync + 'static,
    {
        self.register_with_timeout_opt(job_type, handler, Some(timeout_dur));
    }

    fn register_with_timeout_opt<F>(&mut self, job_type: &str, handler: F, timeout_dur: Option<Duration>)
    where
        F: for<'a> Fn(&'a Job, &'a JobContext) -> BoxFuture<'a, HandlerOutcome> + Send + Sync + 'static,
    {
        self.handlers.insert(
            job_type.to_string(),
            HandlerEntry {
                handler: Arc::new(handler),
                timeout: timeout_dur,
            },
        );
    }

    pub fn handler_for(&self, job_type: &str) -> Option<HandlerEntry> {
        self.handlers.get(job_type).cloned()
    }
}

pub fn boxed<'a, T>(fut: impl std::future::Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}

//! # Sequential Pipeline
//!
//! The executor every lifecycle in Microscopic is built from: service start,
//! service stop, request processing and response delivery are all ordered
//! lists of steps run by a [`Pipeline`].
//!
//! # Execution Model
//!
//! - **Ordered**: steps run strictly in insertion order, one at a time. Step
//!   `i + 1` is not polled until step `i` has resolved.
//! - **Short-circuit**: a step returning `Err` skips every remaining step and
//!   hands the error to the final hook. [`Flow::Stop`] ends the run without an
//!   error.
//! - **Exactly-once final hook**: [`Pipeline::start`] consumes the pipeline,
//!   so the final hook (an `FnOnce`) runs once per pipeline, whatever the
//!   outcome.
//! - **Empty slots**: a missing step (`None`) is a no-op that continues.
//!
//! The pipeline has no concurrency of its own. Steps may suspend on
//! asynchronous work before resolving.

use crate::error::BoxError;
use std::{future::Future, pin::Pin, sync::Arc};

/// Result of running a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// The step completed; run the next one.
    Continue,
    /// The step completed and the pipeline should end without an error.
    Stop,
}

/// The outcome of a step: a [`Flow`] or the error that terminates the pipeline.
pub type StepResult = Result<Flow, BoxError>;

/// A single unit of work in a [`Pipeline`].
///
/// Steps receive a shared reference to the pipeline context. Contexts in
/// Microscopic are cheap handles (`Request`, `Service`) so steps that need to
/// outlive the borrow can clone them.
///
/// # Static vs Dynamic Dispatch
///
/// This trait uses native `async fn` for static dispatch. Pipelines store
/// their steps as [`DynStep`] trait objects.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a pipeline step for `{C}`",
    label = "missing `Step<{C}>` implementation",
    note = "Steps must implement `run` for the context type `{C}`, or be a closure `Fn({C}) -> impl Future<Output = StepResult>`."
)]
pub trait Step<C>: Send + Sync + 'static {
    /// Runs the step against the pipeline context.
    fn run(&self, ctx: &C) -> impl Future<Output = StepResult> + Send;
}

/// Dynamic object-safe version of [`Step`].
pub trait DynStep<C>: Send + Sync + 'static {
    /// Runs the step (dynamic dispatch version).
    fn run_dyn<'a>(&'a self, ctx: &'a C) -> Pin<Box<dyn Future<Output = StepResult> + Send + 'a>>;
}

// Blanket implementation: any Step is a DynStep.
impl<C, T: Step<C>> DynStep<C> for T {
    fn run_dyn<'a>(&'a self, ctx: &'a C) -> Pin<Box<dyn Future<Output = StepResult> + Send + 'a>> {
        Box::pin(self.run(ctx))
    }
}

// Blanket impl for closures taking an owned context handle.
impl<C, F, Fut> Step<C> for F
where
    C: Clone + Send + Sync + 'static,
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult> + Send,
{
    fn run(&self, ctx: &C) -> impl Future<Output = StepResult> + Send {
        (self)(ctx.clone())
    }
}

/// A step shared between several pipelines.
pub type SharedStep<C> = Arc<dyn DynStep<C>>;

/// The per-step hook of a [`Pipeline`].
///
/// A driver decides how each step is invoked and whether the pipeline may
/// continue at all. It receives `None` for an empty slot.
pub trait Driver<C>: Send + Sync {
    /// Runs (or refuses to run) one slot of the pipeline.
    fn drive<'a>(
        &'a self,
        step: Option<&'a dyn DynStep<C>>,
        ctx: &'a C,
    ) -> impl Future<Output = StepResult> + Send + 'a;
}

/// The default driver: runs every step, treating empty slots as no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sequential;

impl<C: Sync + 'static> Driver<C> for Sequential {
    async fn drive<'a>(&'a self, step: Option<&'a dyn DynStep<C>>, ctx: &'a C) -> StepResult {
        match step {
            Some(step) => step.run_dyn(ctx).await,
            None => Ok(Flow::Continue),
        }
    }
}

/// The default final hook: surfaces the terminating error, if any.
pub fn propagate(error: Option<BoxError>) -> Result<(), BoxError> {
    match error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// An ordered list of steps with a per-step hook and a final hook.
///
/// # Example
///
/// ```rust,ignore
/// let mut pipeline = Pipeline::new();
/// pipeline.add(|svc: Service| async move { svc.bind().await?; Ok(Flow::Continue) });
/// pipeline.add_group(service.extensions(ServiceEvent::PostStart));
/// pipeline.start(&service).await?;
/// ```
pub struct Pipeline<C, D = Sequential, F = fn(Option<BoxError>) -> Result<(), BoxError>> {
    steps: Vec<Option<SharedStep<C>>>,
    driver: D,
    finish: F,
}

impl<C: Sync + 'static> Pipeline<C> {
    /// Create a pipeline with the [`Sequential`] driver and the [`propagate`] final hook.
    pub fn new() -> Self {
        Self::with_hooks(Sequential, propagate)
    }
}

impl<C: Sync + 'static> Default for Pipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, D, F, R> Pipeline<C, D, F>
where
    C: Sync + 'static,
    D: Driver<C>,
    F: FnOnce(Option<BoxError>) -> R,
{
    /// Create a pipeline from a per-step hook and a final hook.
    pub fn with_hooks(driver: D, finish: F) -> Self {
        Self {
            steps: Vec::new(),
            driver,
            finish,
        }
    }

    /// Append a single step.
    pub fn add<S: Step<C>>(&mut self, step: S) -> &mut Self {
        self.steps.push(Some(Arc::new(step)));
        self
    }

    /// Append a step that is shared with other pipelines.
    pub fn add_shared(&mut self, step: SharedStep<C>) -> &mut Self {
        self.steps.push(Some(step));
        self
    }

    /// Append a slot that may be empty. Empty slots are skipped.
    pub fn add_slot(&mut self, step: Option<SharedStep<C>>) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Append an ordered group of steps. The group is flattened into the pipeline.
    pub fn add_group<I>(&mut self, steps: I) -> &mut Self
    where
        I: IntoIterator<Item = SharedStep<C>>,
    {
        self.steps.extend(steps.into_iter().map(Some));
        self
    }

    /// Get the number of slots in the pipeline.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if the pipeline has no slots.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every slot in order, then invoke the final hook once.
    ///
    /// Returns whatever the final hook returns.
    pub async fn start(self, ctx: &C) -> R {
        let mut terminated = None;

        for (index, slot) in self.steps.iter().enumerate() {
            match self.driver.drive(slot.as_deref(), ctx).await {
                Ok(Flow::Continue) => continue,
                Ok(Flow::Stop) => {
                    tracing::trace!(index, "pipeline stopped");
                    break;
                }
                Err(error) => {
                    tracing::trace!(index, %error, "pipeline short-circuited");
                    terminated = Some(error);
                    break;
                }
            }
        }

        (self.finish)(terminated)
    }
}

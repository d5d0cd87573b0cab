//! Step pipelines: ordered async steps sharing one data bag.
//!
//! The decoded request sits under [`INPUT`]. A step returns
//! [`Flow::Continue`] with its result, [`Flow::Stop`] to end the pipeline
//! successfully, or an error, which aborts it. The pipeline output is the
//! bag value under [`OUTPUT`] if a step set one, otherwise the last result
//! stored through `returns`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use switchyard_core::{Codec, DataBag, StructuredError, Value};
use tracing::{debug, debug_span, Instrument};

use crate::invoke::{Handler, InvocationContext};

/// Bag key holding the decoded request.
pub const INPUT: &str = "input";
/// Bag key a step may set to choose the pipeline output.
pub const OUTPUT: &str = "output";

/// What a step tells the pipeline to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Run the next step. The value is stored if the step has a `returns` key.
    Continue(Value),
    /// Stop here; the remaining steps are skipped and the run succeeds.
    Stop,
}

impl Flow {
    /// `Continue` without a result.
    #[must_use]
    pub fn proceed() -> Self {
        Self::Continue(Value::Null)
    }
}

#[async_trait]
pub trait Step: Send + Sync + 'static {
    /// Runs the step against the shared bag.
    ///
    /// # Errors
    ///
    /// Any structured error; the pipeline records the step name under the
    /// `step` metadata key.
    async fn run(&self, bag: &mut DataBag) -> Result<Flow, StructuredError>;
}

/// Adapter returned by [`step_fn`].
#[derive(Debug, Clone)]
pub struct StepFn<F>(F);

/// Wraps an async closure as a [`Step`]. The closure gets a copy of the bag;
/// it contributes through its result (and `returns`) rather than by mutation.
pub fn step_fn<F, Fut>(f: F) -> StepFn<F>
where
    F: Fn(DataBag) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Flow, StructuredError>> + Send + 'static,
{
    StepFn(f)
}

#[async_trait]
impl<F, Fut> Step for StepFn<F>
where
    F: Fn(DataBag) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Flow, StructuredError>> + Send + 'static,
{
    async fn run(&self, bag: &mut DataBag) -> Result<Flow, StructuredError> {
        (self.0)(bag.clone()).await
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

struct StepEntry {
    name: String,
    returns: Option<String>,
    step: Arc<dyn Step>,
}

#[derive(Clone)]
pub struct Pipeline {
    name: String,
    steps: Arc<Vec<StepEntry>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Arc::new(Vec::new()),
        }
    }

    /// Appends a step whose result is discarded.
    #[must_use]
    pub fn then(self, name: impl Into<String>, step: impl Step) -> Self {
        self.push(name.into(), None, Arc::new(step))
    }

    /// Appends a step whose result is stored in the bag under `returns`.
    #[must_use]
    pub fn then_returning(self, name: impl Into<String>, returns: impl Into<String>, step: impl Step) -> Self {
        self.push(name.into(), Some(returns.into()), Arc::new(step))
    }

    fn push(mut self, name: String, returns: Option<String>, step: Arc<dyn Step>) -> Self {
        Arc::make_mut(&mut self.steps).push(StepEntry { name, returns, step });
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs the steps in order against `bag`.
    ///
    /// # Errors
    ///
    /// The first step error, tagged with `step` metadata.
    pub async fn run(&self, bag: &mut DataBag) -> Result<Option<Value>, StructuredError> {
        let mut last = None;
        for entry in self.steps.iter() {
            let span = debug_span!("step", pipeline = %self.name, step = %entry.name);
            let flow = entry
                .step
                .run(bag)
                .instrument(span)
                .await
                .map_err(|e| e.with_metadata("step", entry.name.as_str()))?;

            match flow {
                Flow::Continue(value) => {
                    if let Some(key) = &entry.returns {
                        bag.insert(key.clone(), value.clone());
                        last = Some(value);
                    }
                }
                Flow::Stop => {
                    debug!(pipeline = %self.name, step = %entry.name, "pipeline stopped");
                    break;
                }
            }
        }
        Ok(bag.get(OUTPUT).cloned().or(last))
    }
}

impl Clone for StepEntry {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            returns: self.returns.clone(),
            step: Arc::clone(&self.step),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps: Vec<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &steps)
            .finish()
    }
}

/// Serves a pipeline as a unary handler: decodes the payload into `input`
/// on a copy of the invocation's bag, runs, and encodes the output. No
/// output means an empty response.
#[derive(Debug, Clone)]
pub struct PipelineHandler {
    pipeline: Pipeline,
}

impl PipelineHandler {
    #[must_use]
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl Handler for PipelineHandler {
    async fn call(&self, ctx: InvocationContext, payload: Bytes) -> Result<Bytes, StructuredError> {
        let input = ctx.codec.decode(&payload)?;
        let mut bag = ctx.data.clone();
        bag.insert(INPUT, input);

        match self.pipeline.run(&mut bag).await? {
            Some(output) => Ok(Bytes::from(ctx.codec.encode(&output)?)),
            None => Ok(Bytes::new()),
        }
    }
}

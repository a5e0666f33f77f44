//! Generic ordered middleware-chain executor.
//!
//! A [`Pipeline`] runs [`Stage`]s in array order over one mutable context.
//! Each stage either declines ([`Flow::Continue`]) or settles the invocation
//! ([`Flow::Done`]) after recording a result or an error on the context. A
//! stage may also restart the whole chain against mutated context state
//! (e.g. a new URL discovered via HTML meta-refresh) through
//! [`Pipeline::rerun`], bounded by a per-context depth counter.
//!
//! Execution is strictly sequential and cooperative: one active context, no
//! concurrency inside an invocation. Concurrency across independent
//! invocations is the caller's concern - contexts are exclusively owned, so
//! no locks are involved.

use futures::future::BoxFuture;
use thiserror::Error;

/// Restarts allowed per context beyond the initial pass.
pub const MAX_RESTART_DEPTH: u32 = 3;

/// Outcome of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// The stage declined; the next stage in order runs.
    Continue,
    /// The stage settled the context (result or error recorded); the rest of
    /// the chain is skipped.
    Done,
}

/// Errors produced by the pipeline engine itself.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every stage declined. Carries the last HTTP status observed on the
    /// context, the one diagnostic available when nothing claimed the
    /// response.
    #[error("no pipeline stage produced a result (last status: {status:?})")]
    Unprocessed { status: Option<u16> },
    /// A stage restarted the chain more than [`MAX_RESTART_DEPTH`] times.
    #[error("pipeline restart depth exceeded ({0} restarts)")]
    DepthExceeded(u32),
    /// A stage-level failure with no safe fallback.
    #[error(transparent)]
    Stage(#[from] anyhow::Error),
}

impl PipelineError {
    /// Wraps a typed stage error.
    pub fn stage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PipelineError::Stage(anyhow::Error::new(err))
    }

    /// Downcast helper for callers that care about a specific stage error.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self {
            PipelineError::Stage(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// The shared mutable scratchpad a pipeline executes over.
///
/// An invocation terminates in exactly one of three states: output set, error
/// set, or neither - which the engine converts into
/// [`PipelineError::Unprocessed`]. Output and error are mutually exclusive by
/// construction: the engine checks the error first only when the output is
/// absent.
pub trait StageContext: Send {
    type Output: Send;

    fn take_output(&mut self) -> Option<Self::Output>;
    fn take_error(&mut self) -> Option<PipelineError>;
    /// True once a result or error is recorded; settled contexts skip the
    /// remaining stages.
    fn is_settled(&self) -> bool;
    /// Last HTTP status observed, for the `Unprocessed` diagnostic.
    fn observed_status(&self) -> Option<u16>;
    fn depth(&self) -> u32;
    fn bump_depth(&mut self);
}

/// One processor in the chain.
pub trait Stage<C: StageContext>: Send + Sync {
    /// Stable name for tracing.
    fn name(&self) -> &'static str;

    /// Runs the stage. `chain` is the owning pipeline, re-invocable through
    /// [`Pipeline::rerun`] for bounded restarts.
    fn run<'a>(
        &'a self,
        ctx: &'a mut C,
        chain: &'a Pipeline<C>,
    ) -> BoxFuture<'a, Result<Flow, PipelineError>>;
}

/// An ordered, reusable chain of stages.
pub struct Pipeline<C: StageContext> {
    stages: Vec<Box<dyn Stage<C>>>,
}

impl<C: StageContext> Pipeline<C> {
    pub fn new(stages: Vec<Box<dyn Stage<C>>>) -> Self {
        Self { stages }
    }

    /// Executes the chain over `ctx` and extracts the terminal state.
    pub async fn run(&self, ctx: &mut C) -> Result<C::Output, PipelineError> {
        self.execute(ctx).await?;
        if let Some(output) = ctx.take_output() {
            return Ok(output);
        }
        if let Some(error) = ctx.take_error() {
            return Err(error);
        }
        Err(PipelineError::Unprocessed {
            status: ctx.observed_status(),
        })
    }

    /// Re-invokes the chain from inside a stage, for restarts against
    /// mutated context state. Depth-bounded; the boxed future makes the
    /// async recursion finite-sized.
    pub fn rerun<'a>(&'a self, ctx: &'a mut C) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            ctx.bump_depth();
            if ctx.depth() > MAX_RESTART_DEPTH {
                return Err(PipelineError::DepthExceeded(ctx.depth()));
            }
            tracing::debug!(depth = ctx.depth(), "pipeline restart");
            self.execute(ctx).await
        })
    }

    async fn execute(&self, ctx: &mut C) -> Result<(), PipelineError> {
        for stage in &self.stages {
            if ctx.is_settled() {
                break;
            }
            tracing::trace!(stage = stage.name(), "running pipeline stage");
            match stage.run(ctx, self).await? {
                Flow::Continue => continue,
                Flow::Done => break,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct TestContext {
        trail: Vec<&'static str>,
        output: Option<String>,
        error: Option<PipelineError>,
        status: Option<u16>,
        depth: u32,
    }

    impl StageContext for TestContext {
        type Output = String;

        fn take_output(&mut self) -> Option<String> {
            self.output.take()
        }
        fn take_error(&mut self) -> Option<PipelineError> {
            self.error.take()
        }
        fn is_settled(&self) -> bool {
            self.output.is_some() || self.error.is_some()
        }
        fn observed_status(&self) -> Option<u16> {
            self.status
        }
        fn depth(&self) -> u32 {
            self.depth
        }
        fn bump_depth(&mut self) {
            self.depth += 1;
        }
    }

    struct Decline(&'static str);
    impl Stage<TestContext> for Decline {
        fn name(&self) -> &'static str {
            self.0
        }
        fn run<'a>(
            &'a self,
            ctx: &'a mut TestContext,
            _chain: &'a Pipeline<TestContext>,
        ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
            Box::pin(async move {
                ctx.trail.push(self.0);
                Ok(Flow::Continue)
            })
        }
    }

    struct Produce(&'static str);
    impl Stage<TestContext> for Produce {
        fn name(&self) -> &'static str {
            "produce"
        }
        fn run<'a>(
            &'a self,
            ctx: &'a mut TestContext,
            _chain: &'a Pipeline<TestContext>,
        ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
            Box::pin(async move {
                ctx.trail.push("produce");
                ctx.output = Some(self.0.to_owned());
                Ok(Flow::Done)
            })
        }
    }

    /// Restarts once, producing on the second pass.
    struct RestartOnce;
    impl Stage<TestContext> for RestartOnce {
        fn name(&self) -> &'static str {
            "restart-once"
        }
        fn run<'a>(
            &'a self,
            ctx: &'a mut TestContext,
            chain: &'a Pipeline<TestContext>,
        ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
            Box::pin(async move {
                ctx.trail.push("restart");
                if ctx.depth() == 0 {
                    chain.rerun(ctx).await?;
                    return Ok(Flow::Done);
                }
                ctx.output = Some(format!("depth-{}", ctx.depth()));
                Ok(Flow::Done)
            })
        }
    }

    /// Restarts forever; the depth bound must stop it.
    struct RestartForever;
    impl Stage<TestContext> for RestartForever {
        fn name(&self) -> &'static str {
            "restart-forever"
        }
        fn run<'a>(
            &'a self,
            ctx: &'a mut TestContext,
            chain: &'a Pipeline<TestContext>,
        ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
            Box::pin(async move {
                chain.rerun(ctx).await?;
                Ok(Flow::Done)
            })
        }
    }

    #[tokio::test]
    async fn runs_in_order_and_short_circuits() {
        let pipeline = Pipeline::new(vec![
            Box::new(Decline("a")) as Box<dyn Stage<TestContext>>,
            Box::new(Produce("hit")),
            Box::new(Decline("never")),
        ]);
        let mut ctx = TestContext::default();
        let output = pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(output, "hit");
        assert_eq!(ctx.trail, vec!["a", "produce"]);
    }

    #[tokio::test]
    async fn all_decline_yields_unprocessed_with_status() {
        let pipeline = Pipeline::new(vec![
            Box::new(Decline("a")) as Box<dyn Stage<TestContext>>,
            Box::new(Decline("b")),
        ]);
        let mut ctx = TestContext {
            status: Some(404),
            ..TestContext::default()
        };
        let err = pipeline.run(&mut ctx).await.unwrap_err();
        match err {
            PipelineError::Unprocessed { status } => assert_eq!(status, Some(404)),
            other => panic!("expected Unprocessed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn restart_reruns_the_chain() {
        let pipeline = Pipeline::new(vec![
            Box::new(Decline("pre")) as Box<dyn Stage<TestContext>>,
            Box::new(RestartOnce),
        ]);
        let mut ctx = TestContext::default();
        let output = pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(output, "depth-1");
        // Both passes traverse the full chain from the top.
        assert_eq!(ctx.trail, vec!["pre", "restart", "pre", "restart"]);
    }

    #[tokio::test]
    async fn unbounded_restart_hits_depth_limit() {
        let pipeline =
            Pipeline::new(vec![Box::new(RestartForever) as Box<dyn Stage<TestContext>>]);
        let mut ctx = TestContext::default();
        let err = pipeline.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::DepthExceeded(_)));
    }

    #[tokio::test]
    async fn recorded_error_is_raised() {
        struct Fail;
        impl Stage<TestContext> for Fail {
            fn name(&self) -> &'static str {
                "fail"
            }
            fn run<'a>(
                &'a self,
                ctx: &'a mut TestContext,
                _chain: &'a Pipeline<TestContext>,
            ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
                Box::pin(async move {
                    ctx.error = Some(PipelineError::Stage(anyhow::anyhow!("boom")));
                    Ok(Flow::Done)
                })
            }
        }
        let pipeline = Pipeline::new(vec![
            Box::new(Fail) as Box<dyn Stage<TestContext>>,
            Box::new(Produce("never")),
        ]);
        let mut ctx = TestContext::default();
        let err = pipeline.run(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}

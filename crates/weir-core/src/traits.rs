use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{Bundle, StepContext};

/// Step executor, the sole boundary to external operations.
///
/// One implementation wraps one kind of external operation (LLM generation,
/// document retrieval, web search). The flow controller assembles the
/// argument bundle from bound edges and external inputs; the executor
/// returns a named result bundle or a failure that is fatal to the run.
pub trait StepExecutor: Send + Sync + 'static {
    /// Execute the operation with the resolved arguments.
    ///
    /// `ctx.cancel` is a best-effort cancellation signal; implementations
    /// may observe it to abort in-flight external calls.
    fn execute(&self, args: Bundle, ctx: StepContext) -> BoxFuture<'_, Result<Bundle>>;
}

/// Adapter so a plain closure can act as an executor in tests and simple
/// wirings.
pub struct FnExecutor<F>(pub F);

impl<F> StepExecutor for FnExecutor<F>
where
    F: Fn(Bundle, StepContext) -> Result<Bundle> + Send + Sync + 'static,
{
    fn execute(&self, args: Bundle, ctx: StepContext) -> BoxFuture<'_, Result<Bundle>> {
        let out = (self.0)(args, ctx);
        Box::pin(async move { out })
    }
}

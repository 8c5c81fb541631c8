use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::HandleContext;
use crate::error::{HandlerError, PipelineError};
use crate::handler::HandlerResolver;
use crate::serialization::Message;

use super::{Middleware, Next};

/// Terminal stage: resolves the application handler and calls it.
pub struct HandlerInvocationMiddleware<M: Message> {
    resolver: Arc<dyn HandlerResolver<M>>,
}

impl<M: Message> HandlerInvocationMiddleware<M> {
    pub fn new(resolver: Arc<dyn HandlerResolver<M>>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl<M: Message> Middleware for HandlerInvocationMiddleware<M> {
    async fn handle(
        &self,
        ctx: &HandleContext,
        _next: Next<'_>,
        cancel: &CancellationToken,
    ) -> Result<bool, HandlerError> {
        let message = ctx.message::<M>().ok_or_else(|| PipelineError::TypeMismatch {
            expected: M::TYPE_TAG,
            actual: ctx.message_type.clone(),
        })?;

        let handler = self
            .resolver
            .resolve(ctx)
            .ok_or_else(|| PipelineError::NoHandlerResolved(ctx.message_type.clone()))?;

        handler.handle(message, cancel).await
    }
}

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::HandleContext;
use crate::error::HandlerError;
use crate::monitor::{MessageMonitor, MonitorGuard};

use super::{Middleware, Next};

/// Reports how long the inner stages took, whatever they returned.
pub struct StopwatchMiddleware {
    monitor: MonitorGuard,
    handler_type: String,
}

impl StopwatchMiddleware {
    pub fn new(monitor: MonitorGuard, handler_type: impl Into<String>) -> Self {
        Self {
            monitor,
            handler_type: handler_type.into(),
        }
    }
}

#[async_trait]
impl Middleware for StopwatchMiddleware {
    async fn handle(
        &self,
        ctx: &HandleContext,
        next: Next<'_>,
        cancel: &CancellationToken,
    ) -> Result<bool, HandlerError> {
        let started = Instant::now();
        let result = next.run(ctx, cancel).await;
        self.monitor
            .on_handle_time(started.elapsed(), &self.handler_type, &ctx.message_type);
        result
    }
}

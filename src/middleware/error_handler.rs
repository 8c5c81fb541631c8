use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::context::HandleContext;
use crate::error::HandlerError;
use crate::monitor::{MessageMonitor, MonitorGuard};

use super::{Middleware, Next};

/// Turns an error from the inner stages into "not handled".
///
/// The error is logged and reported to the monitor, and the message is
/// left for redelivery like any other unhandled message.
pub struct ErrorHandlerMiddleware {
    monitor: MonitorGuard,
}

impl ErrorHandlerMiddleware {
    pub fn new(monitor: MonitorGuard) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl Middleware for ErrorHandlerMiddleware {
    async fn handle(
        &self,
        ctx: &HandleContext,
        next: Next<'_>,
        cancel: &CancellationToken,
    ) -> Result<bool, HandlerError> {
        match next.run(ctx, cancel).await {
            Ok(handled) => Ok(handled),
            Err(err) => {
                error!(
                    queue = %ctx.queue,
                    message_id = %ctx.raw.id,
                    message_type = %ctx.message_type,
                    error = %err,
                    "handler failed"
                );
                self.monitor.on_exception(Some(&ctx.message_type), err.as_ref());
                Ok(false)
            }
        }
    }
}

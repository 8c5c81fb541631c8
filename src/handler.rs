use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::HandleContext;
use crate::error::HandlerError;
use crate::serialization::Message;

/// Application logic for one message type.
///
/// Return `Ok(true)` when the message is done with and may be deleted,
/// `Ok(false)` to leave it for redelivery. An `Err` is treated like
/// `Ok(false)` but reported as an exception.
#[async_trait]
pub trait Handler<M>: Send + Sync
where
    M: Message,
{
    async fn handle(&self, message: &M, cancel: &CancellationToken) -> Result<bool, HandlerError>;
}

/// Finds the handler instance for a message.
pub trait HandlerResolver<M>: Send + Sync
where
    M: Message,
{
    fn resolve(&self, ctx: &HandleContext) -> Option<Arc<dyn Handler<M>>>;

    /// Name reported to the monitor with handle timings.
    fn handler_type(&self) -> &str;
}

/// Resolves every message to the same shared handler.
pub struct StaticResolver<M: Message> {
    handler: Arc<dyn Handler<M>>,
    handler_type: String,
}

impl<M: Message> StaticResolver<M> {
    pub fn new<H>(handler: H) -> Self
    where
        H: Handler<M> + 'static,
    {
        Self {
            handler: Arc::new(handler),
            handler_type: short_type_name::<H>().to_string(),
        }
    }
}

impl<M: Message> HandlerResolver<M> for StaticResolver<M> {
    fn resolve(&self, _ctx: &HandleContext) -> Option<Arc<dyn Handler<M>>> {
        Some(self.handler.clone())
    }

    fn handler_type(&self) -> &str {
        &self.handler_type
    }
}

/// Resolves handlers with a closure, e.g. to build one per message.
pub struct FnResolver<M, F> {
    resolve: F,
    handler_type: String,
    _message: PhantomData<fn() -> M>,
}

impl<M, F> FnResolver<M, F>
where
    M: Message,
    F: Fn(&HandleContext) -> Option<Arc<dyn Handler<M>>> + Send + Sync,
{
    pub fn new(handler_type: impl Into<String>, resolve: F) -> Self {
        Self {
            resolve,
            handler_type: handler_type.into(),
            _message: PhantomData,
        }
    }
}

impl<M, F> HandlerResolver<M> for FnResolver<M, F>
where
    M: Message,
    F: Fn(&HandleContext) -> Option<Arc<dyn Handler<M>>> + Send + Sync,
{
    fn resolve(&self, ctx: &HandleContext) -> Option<Arc<dyn Handler<M>>> {
        (self.resolve)(ctx)
    }

    fn handler_type(&self) -> &str {
        &self.handler_type
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

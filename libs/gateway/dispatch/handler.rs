//! Processing callback seam

use crate::protocol::GatewayEnvelope;
use async_trait::async_trait;
use std::future::Future;

/// One dispatch event on its way from a shard to the application
#[derive(Debug)]
pub struct DispatchItem {
    pub shard_id: u32,
    pub envelope: GatewayEnvelope,
}

impl DispatchItem {
    pub fn new(shard_id: u32, envelope: GatewayEnvelope) -> Self {
        Self { shard_id, envelope }
    }

    pub fn event_type(&self) -> Option<&str> {
        self.envelope.event_type()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.envelope.s
    }

    /// Raw JSON of the event body
    pub fn payload(&self) -> &str {
        self.envelope.raw_payload()
    }
}

/// Application callback invoked once per dispatched event
///
/// Returning an error only gets the item logged; the pool moves on to the
/// next one.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// #[async_trait]
/// impl DispatchHandler for Printer {
///     async fn handle(&self, item: DispatchItem) -> anyhow::Result<()> {
///         println!("[{}] {:?}", item.shard_id, item.event_type());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait DispatchHandler: Send + Sync + 'static {
    async fn handle(&self, item: DispatchItem) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`DispatchHandler`]
pub struct FnHandler<F>(F);

/// Wrap `f` as a [`DispatchHandler`]
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(DispatchItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> DispatchHandler for FnHandler<F>
where
    F: Fn(DispatchItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, item: DispatchItem) -> anyhow::Result<()> {
        (self.0)(item).await
    }
}

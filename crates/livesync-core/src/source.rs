//! Source descriptors: what to poll, how often, and how much to trust it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::FetchError;
use crate::types::{PartialRecord, SourceId};

/// Fetch interface for one backing endpoint.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self) -> Result<PartialRecord, FetchError>;
}

/// Adapter turning an async closure into a [`Fetch`] implementation
pub struct FnFetcher<F> {
    f: F,
}

impl<F> FnFetcher<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Fetch for FnFetcher<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<PartialRecord, FetchError>> + Send + 'static,
{
    async fn fetch(&self) -> Result<PartialRecord, FetchError> {
        (self.f)().await
    }
}

type SkipFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Declarative description of a polled data source.
///
/// Higher `priority` wins when two sources supply the same field. Ties fall
/// back to freshness and then to registration order.
#[derive(Clone)]
pub struct SourceDescriptor {
    pub id: SourceId,
    pub priority: u32,
    /// Overrides the session's configured interval for this source
    pub interval: Option<Duration>,
    skip: SkipFn,
    fetcher: Arc<dyn Fetch>,
}

impl SourceDescriptor {
    pub fn new(id: impl Into<String>, priority: u32, fetcher: impl Fetch + 'static) -> Self {
        Self {
            id: SourceId::new(id),
            priority,
            interval: None,
            skip: Arc::new(|| false),
            fetcher: Arc::new(fetcher),
        }
    }

    /// Build a descriptor from an async closure
    pub fn from_fn<F, Fut>(id: impl Into<String>, priority: u32, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PartialRecord, FetchError>> + Send + 'static,
    {
        Self::new(id, priority, FnFetcher::new(f))
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Ticks where `skip` returns true do not fetch at all
    pub fn skip_when(mut self, skip: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.skip = Arc::new(skip);
        self
    }

    pub fn should_skip(&self) -> bool {
        (self.skip)()
    }

    pub fn fetch(&self) -> BoxFuture<'static, Result<PartialRecord, FetchError>> {
        let fetcher = self.fetcher.clone();
        Box::pin(async move { fetcher.fetch().await })
    }
}

impl fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

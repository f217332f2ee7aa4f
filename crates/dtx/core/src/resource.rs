//! Seams to the transactional resource: handle acquisition and statement execution.

use crate::error::ResourceError;
use crate::types::ResourceConfig;
use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// One exclusively-owned session on a transactional resource.
///
/// XA requires START, business statements, END and PREPARE on the same session, so a
/// handle is never shared between concurrent branch operations. Dropping it releases it.
#[async_trait]
pub trait ResourceHandle: Send {
    /// Execute one statement verbatim and report rows affected.
    async fn execute_raw(&mut self, statement: &str) -> Result<u64, ResourceError>;
}

/// Source of resource handles, typically a pool shared across invocations.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    type Handle: ResourceHandle;

    async fn acquire(&self, config: &ResourceConfig) -> Result<Self::Handle, ResourceError>;
}

/// Execute `statement` with timing, skipping empty statements.
pub async fn exec_statement<H>(handle: &mut H, statement: &str) -> Result<u64, ResourceError>
where
    H: ResourceHandle + ?Sized,
{
    if statement.is_empty() {
        return Ok(0);
    }
    let began = Instant::now();
    let result = handle.execute_raw(statement).await;
    let used_ms = began.elapsed().as_millis() as u64;
    match &result {
        Ok(affected) => debug!(used_ms, affected, statement, "exec"),
        Err(err) => error!(used_ms, error = %err, statement, "exec failed"),
    }
    result
}

/// Bound one statement's execution by `limit`; `None` waits indefinitely.
///
/// Expiry drops the in-flight execution and reports [`ResourceError::Timeout`].
pub async fn with_deadline<F>(
    limit: Option<Duration>,
    statement: &str,
    execution: F,
) -> Result<u64, ResourceError>
where
    F: Future<Output = Result<u64, ResourceError>>,
{
    let Some(limit) = limit else {
        return execution.await;
    };
    match tokio::time::timeout(limit, execution).await {
        Ok(result) => result,
        Err(_) => Err(ResourceError::Timeout {
            statement: statement.to_string(),
            elapsed_ms: limit.as_millis(),
        }),
    }
}

/// Wraps any provider so every statement on its handles runs under a deadline.
pub struct TimeoutProvider<P> {
    inner: P,
    limit: Duration,
}

impl<P> TimeoutProvider<P> {
    pub fn new(inner: P, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

pub struct TimeoutHandle<H> {
    inner: H,
    limit: Duration,
}

#[async_trait]
impl<H: ResourceHandle> ResourceHandle for TimeoutHandle<H> {
    async fn execute_raw(&mut self, statement: &str) -> Result<u64, ResourceError> {
        with_deadline(
            Some(self.limit),
            statement,
            self.inner.execute_raw(statement),
        )
        .await
    }
}

#[async_trait]
impl<P: ResourceProvider> ResourceProvider for TimeoutProvider<P> {
    type Handle = TimeoutHandle<P::Handle>;

    async fn acquire(&self, config: &ResourceConfig) -> Result<Self::Handle, ResourceError> {
        let inner = self.inner.acquire(config).await?;
        Ok(TimeoutHandle {
            inner,
            limit: self.limit,
        })
    }
}

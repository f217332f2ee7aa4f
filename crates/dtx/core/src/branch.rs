use crate::dialect::{dialect_for, XaDialect};
use crate::error::ResourceError;
use crate::guard::Completion;
use crate::resource::{exec_statement, ResourceProvider};
use crate::types::{BranchIdentity, ResourceConfig, XaAction};
use futures::future::BoxFuture;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, warn};

/// Drives one local resource through XA START -> business -> END -> PREPARE.
///
/// PREPARE is only issued when the business callback succeeds. A failed callback leaves
/// the branch ended but unprepared; the physical rollback is the coordinator's call and
/// arrives later through [`crate::CallbackDispatcher`].
pub struct ResourceBranchDriver<P> {
    provider: Arc<P>,
    config: ResourceConfig,
    dialect: Arc<dyn XaDialect>,
}

impl<P: ResourceProvider> ResourceBranchDriver<P> {
    pub fn new(provider: Arc<P>, config: ResourceConfig) -> Self {
        let dialect = dialect_for(config.driver);
        Self {
            provider,
            config,
            dialect,
        }
    }

    /// Override the engine dialect derived from the config's driver.
    pub fn with_dialect(mut self, dialect: Arc<dyn XaDialect>) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn dialect(&self) -> &dyn XaDialect {
        self.dialect.as_ref()
    }

    /// Run `callback` inside the XA bracket for `identity`.
    ///
    /// Ordering is START, callback, END, then PREPARE on success. A START failure returns
    /// before the callback runs. END is best-effort and never masks the callback's result.
    /// A PREPARE failure is returned. A panic in the callback still issues END and then
    /// resumes unwinding.
    pub async fn run_local_branch<F, E>(
        &self,
        identity: &BranchIdentity,
        callback: F,
    ) -> Result<(), E>
    where
        F: for<'h> FnOnce(&'h mut P::Handle) -> BoxFuture<'h, Result<(), E>> + Send,
        E: From<ResourceError> + Display + Send,
    {
        let xid = identity.xid();
        let mut handle = self.provider.acquire(&self.config).await?;

        let start = self.dialect.statement(XaAction::Start, &xid);
        exec_statement(&mut handle, &start).await?;
        debug!(xid = %xid, "branch started");

        let outcome = Completion::capture(callback(&mut handle)).await;

        let end = self.dialect.statement(XaAction::End, &xid);
        if let Err(err) = exec_statement(&mut handle, &end).await {
            warn!(xid = %xid, error = %err, "xa end failed, keeping business result");
        }

        let prepare = self.dialect.statement(XaAction::Prepare, &xid);
        let handle = &mut handle;
        outcome
            .resolve(
                move || async move {
                    exec_statement(handle, &prepare)
                        .await
                        .map(|_| ())
                        .map_err(E::from)
                },
                || async { Ok(()) },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::PostgresDialect;
    use crate::error::DtxError;
    use crate::resource::{ResourceHandle, TimeoutProvider};
    use crate::test_support::FakeResource;
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn driver(resource: &FakeResource) -> ResourceBranchDriver<FakeResource> {
        ResourceBranchDriver::new(
            Arc::new(resource.clone()),
            ResourceConfig::mysql("localhost", 3306, "root"),
        )
    }

    async fn explode() -> Result<(), DtxError> {
        panic!("ledger corrupted")
    }

    fn identity() -> BranchIdentity {
        BranchIdentity::new("g1", "b1").unwrap()
    }

    #[tokio::test]
    async fn success_issues_start_end_prepare_in_order() {
        let resource = FakeResource::default();
        let result: Result<(), DtxError> = driver(&resource)
            .run_local_branch(&identity(), |handle| {
                Box::pin(async move {
                    handle
                        .execute_raw("update account set money = money - 30")
                        .await?;
                    Ok::<(), DtxError>(())
                })
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(
            resource.log(),
            vec![
                "xa start 'g1-b1'",
                "update account set money = money - 30",
                "xa end 'g1-b1'",
                "xa prepare 'g1-b1'",
            ]
        );
        assert_eq!(resource.open_handles(), 0);
    }

    #[tokio::test]
    async fn callback_error_skips_prepare_and_is_returned() {
        let resource = FakeResource::default();
        let result: Result<(), DtxError> = driver(&resource)
            .run_local_branch(&identity(), |_| {
                Box::pin(async { Err(DtxError::business("insufficient balance")) })
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, DtxError::Business(ref m) if m == "insufficient balance"));
        assert_eq!(resource.log(), vec!["xa start 'g1-b1'", "xa end 'g1-b1'"]);
        assert_eq!(resource.open_handles(), 0);
    }

    #[tokio::test]
    async fn start_failure_skips_callback_end_and_prepare() {
        let resource = FakeResource::default();
        resource.fail_when("xa start", "XAER_DUPID: The XID already exists");
        let called = std::sync::Arc::new(AtomicBool::new(false));
        let flag = std::sync::Arc::clone(&called);

        let result: Result<(), DtxError> = driver(&resource)
            .run_local_branch(&identity(), move |_| {
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                })
            })
            .await;

        assert!(matches!(result, Err(DtxError::Resource(_))));
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(resource.log(), vec!["xa start 'g1-b1'"]);
        assert_eq!(resource.open_handles(), 0);
    }

    #[tokio::test]
    async fn end_failure_does_not_mask_callback_error() {
        let resource = FakeResource::default();
        resource.fail_when("xa end", "XAER_RMFAIL");

        let result: Result<(), DtxError> = driver(&resource)
            .run_local_branch(&identity(), |_| {
                Box::pin(async { Err(DtxError::business("rejected")) })
            })
            .await;

        assert!(matches!(result, Err(DtxError::Business(_))));
        assert_eq!(resource.log(), vec!["xa start 'g1-b1'", "xa end 'g1-b1'"]);
    }

    #[tokio::test]
    async fn end_failure_still_attempts_prepare_after_success() {
        let resource = FakeResource::default();
        resource.fail_when("xa end", "XAER_RMFAIL");

        let result: Result<(), DtxError> = driver(&resource)
            .run_local_branch(&identity(), |_| Box::pin(async { Ok(()) }))
            .await;

        assert!(result.is_ok());
        assert_eq!(resource.log().last().unwrap(), "xa prepare 'g1-b1'");
    }

    #[tokio::test]
    async fn prepare_failure_is_surfaced() {
        let resource = FakeResource::default();
        resource.fail_when("xa prepare", "XAER_RMERR");

        let result: Result<(), DtxError> = driver(&resource)
            .run_local_branch(&identity(), |_| Box::pin(async { Ok(()) }))
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("XAER_RMERR"));
        assert_eq!(resource.log().len(), 3);
    }

    #[tokio::test]
    async fn panic_ends_branch_without_prepare_and_resumes() {
        let resource = FakeResource::default();
        let driver = driver(&resource);
        let identity = identity();

        let outcome = AssertUnwindSafe(
            driver.run_local_branch::<_, DtxError>(&identity, |_| Box::pin(explode())),
        )
        .catch_unwind()
        .await;

        let payload = outcome.unwrap_err();
        assert_eq!(
            crate::guard::panic_message(payload.as_ref()),
            "ledger corrupted"
        );
        assert_eq!(resource.log(), vec!["xa start 'g1-b1'", "xa end 'g1-b1'"]);
        assert_eq!(resource.open_handles(), 0);
    }

    #[tokio::test]
    async fn postgres_dialect_has_no_end_statement() {
        let resource = FakeResource::default();
        let driver = driver(&resource).with_dialect(Arc::new(PostgresDialect));

        let result: Result<(), DtxError> = driver
            .run_local_branch(&identity(), |_| Box::pin(async { Ok(()) }))
            .await;

        assert!(result.is_ok());
        assert_eq!(
            resource.log(),
            vec!["begin", "prepare transaction 'g1-b1'"]
        );
    }

    #[tokio::test]
    async fn statement_timeout_in_callback_still_ends_and_releases() {
        let resource = FakeResource::default();
        resource.delay_when("select sleep", Duration::from_secs(2));
        let provider = TimeoutProvider::new(resource.clone(), Duration::from_millis(20));
        let driver = ResourceBranchDriver::new(
            Arc::new(provider),
            ResourceConfig::mysql("localhost", 3306, "root"),
        );

        let result: Result<(), DtxError> = driver
            .run_local_branch(&identity(), |handle| {
                Box::pin(async move {
                    handle.execute_raw("select sleep(10)").await?;
                    Ok::<(), DtxError>(())
                })
            })
            .await;

        match result {
            Err(DtxError::Resource(ResourceError::Timeout {
                statement,
                elapsed_ms,
            })) => {
                assert_eq!(statement, "select sleep(10)");
                assert_eq!(elapsed_ms, 20);
            }
            other => panic!("expected timeout, got {:?}", other.err()),
        }
        assert_eq!(
            resource.log(),
            vec!["xa start 'g1-b1'", "select sleep(10)", "xa end 'g1-b1'"]
        );
        assert_eq!(resource.open_handles(), 0);
    }
}

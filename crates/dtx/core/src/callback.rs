use crate::dialect::{dialect_for, XaDialect};
use crate::error::ResourceError;
use crate::resource::{exec_statement, ResourceProvider};
use crate::types::{BranchIdentity, Decision, ResourceConfig};
use std::sync::Arc;
use tracing::{info, warn};

/// Applies coordinator commit/rollback decisions to prepared local branches.
///
/// The coordinator delivers decisions at least once. A redelivered decision finds the
/// branch already finalized; the dialect recognizes that "no such branch" error and it
/// is reported as success.
pub struct CallbackDispatcher<P> {
    provider: Arc<P>,
    config: ResourceConfig,
    dialect: Arc<dyn XaDialect>,
}

impl<P: ResourceProvider> CallbackDispatcher<P> {
    pub fn new(provider: Arc<P>, config: ResourceConfig) -> Self {
        let dialect = dialect_for(config.driver);
        Self {
            provider,
            config,
            dialect,
        }
    }

    pub fn with_dialect(mut self, dialect: Arc<dyn XaDialect>) -> Self {
        self.dialect = dialect;
        self
    }

    pub async fn apply_decision(
        &self,
        identity: &BranchIdentity,
        decision: Decision,
    ) -> Result<(), ResourceError> {
        let mut handle = self.provider.acquire(&self.config).await?;
        let xid = identity.xid();
        let statement = self.dialect.statement(decision.action(), &xid);

        match exec_statement(&mut handle, &statement).await {
            Ok(_) => {
                info!(xid = %xid, decision = decision.as_str(), "branch finalized");
                Ok(())
            }
            Err(err) if self.dialect.is_missing_branch(&err) => {
                warn!(
                    xid = %xid,
                    decision = decision.as_str(),
                    error = %err,
                    "branch not found, treating as already finalized"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

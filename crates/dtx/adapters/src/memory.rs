//! In-process XA resource speaking the MySQL dialect.
//!
//! Models the resource-manager side of a branch closely enough to exercise the drivers:
//! per-branch state transitions, MySQL's XAER_* error texts, and the rule that a session
//! closing with an unprepared branch discards it.

use async_trait::async_trait;
use dtx_core::{
    ResourceConfig, ResourceDriver, ResourceError, ResourceHandle, ResourceProvider, XaAction,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const XAER_NOTA: &str = "1397 (XAE04): XAER_NOTA: Unknown XID";
const XAER_DUPID: &str = "1440 (XAE08): XAER_DUPID: The XID already exists";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    Active,
    Idle,
    Prepared,
    Committed,
    RolledBack,
}

impl BranchState {
    fn name(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Idle => "IDLE",
            Self::Prepared => "PREPARED",
            Self::Committed => "COMMITTED",
            Self::RolledBack => "ROLLED BACK",
        }
    }

    fn is_final(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

#[derive(Default)]
struct MemoryState {
    branches: HashMap<String, BranchState>,
    statements: Vec<String>,
    failures: HashMap<XaAction, String>,
    open_handles: usize,
    acquisitions: usize,
}

impl MemoryState {
    fn live(&self, xid: &str) -> Option<BranchState> {
        self.branches
            .get(xid)
            .copied()
            .filter(|state| !state.is_final())
    }

    fn apply(
        &mut self,
        session: &mut SessionState,
        action: XaAction,
        xid: &str,
    ) -> Result<(), String> {
        let current = self.live(xid);
        let next = match (action, current) {
            (XaAction::Start, _) if session.active.is_some() => {
                return Err(rmfail(BranchState::Active));
            }
            (XaAction::Start, Some(_)) => return Err(XAER_DUPID.to_string()),
            (XaAction::Start, None) => BranchState::Active,
            (_, None) => return Err(XAER_NOTA.to_string()),
            (XaAction::End, Some(BranchState::Active)) => BranchState::Idle,
            (XaAction::Prepare, Some(BranchState::Idle)) => BranchState::Prepared,
            (XaAction::Commit, Some(BranchState::Prepared)) => BranchState::Committed,
            (XaAction::Rollback, Some(BranchState::Idle | BranchState::Prepared)) => {
                BranchState::RolledBack
            }
            (_, Some(state)) => return Err(rmfail(state)),
        };

        match action {
            XaAction::Start => {
                session.active = Some(xid.to_string());
                session.owned.push(xid.to_string());
            }
            XaAction::End => session.active = None,
            _ => {}
        }
        self.branches.insert(xid.to_string(), next);
        Ok(())
    }
}

fn rmfail(state: BranchState) -> String {
    format!(
        "1399 (XAE07): XAER_RMFAIL: The command cannot be executed when global transaction is in the  {} state",
        state.name()
    )
}

/// Shared in-memory XA resource. Clones observe the same branches.
#[derive(Clone, Default)]
pub struct MemoryXaResource {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryXaResource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent statement for `action` fail with `message`.
    pub fn fail_on(&self, action: XaAction, message: impl Into<String>) {
        self.lock().failures.insert(action, message.into());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Every statement received, in order, including failed ones.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn branch_state(&self, xid: &str) -> Option<BranchState> {
        self.lock().branches.get(xid).copied()
    }

    pub fn open_handles(&self) -> usize {
        self.lock().open_handles
    }

    pub fn acquisitions(&self) -> usize {
        self.lock().acquisitions
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ResourceProvider for MemoryXaResource {
    type Handle = MemoryXaHandle;

    async fn acquire(&self, config: &ResourceConfig) -> Result<MemoryXaHandle, ResourceError> {
        if config.driver != ResourceDriver::Mysql {
            return Err(ResourceError::UnsupportedDriver(config.driver.to_string()));
        }
        let mut state = self.lock();
        state.open_handles += 1;
        state.acquisitions += 1;
        Ok(MemoryXaHandle {
            resource: self.clone(),
            session: SessionState::default(),
        })
    }
}

#[derive(Default)]
struct SessionState {
    active: Option<String>,
    owned: Vec<String>,
}

/// One session on a [`MemoryXaResource`].
pub struct MemoryXaHandle {
    resource: MemoryXaResource,
    session: SessionState,
}

#[async_trait]
impl ResourceHandle for MemoryXaHandle {
    async fn execute_raw(&mut self, statement: &str) -> Result<u64, ResourceError> {
        let mut state = self.resource.lock();
        state.statements.push(statement.to_string());

        let Some((action, xid)) = parse_xa(statement) else {
            return Ok(1);
        };
        if let Some(message) = state.failures.get(&action) {
            return Err(ResourceError::statement(statement, message));
        }
        state
            .apply(&mut self.session, action, &xid)
            .map(|_| 0)
            .map_err(|message| ResourceError::statement(statement, message))
    }
}

impl Drop for MemoryXaHandle {
    fn drop(&mut self) {
        let mut state = self.resource.lock();
        state.open_handles -= 1;
        // Closing a session discards its branches that never reached PREPARED.
        for xid in self.session.owned.drain(..) {
            if matches!(
                state.branches.get(&xid),
                Some(BranchState::Active | BranchState::Idle)
            ) {
                state.branches.remove(&xid);
            }
        }
    }
}

fn parse_xa(statement: &str) -> Option<(XaAction, String)> {
    let trimmed = statement.trim();
    let rest = trimmed
        .get(..3)
        .filter(|prefix| prefix.eq_ignore_ascii_case("xa "))
        .map(|_| &trimmed[3..])?;
    let (verb, quoted) = rest.trim_start().split_once(' ')?;
    let action = match verb.to_ascii_lowercase().as_str() {
        "start" | "begin" => XaAction::Start,
        "end" => XaAction::End,
        "prepare" => XaAction::Prepare,
        "commit" => XaAction::Commit,
        "rollback" => XaAction::Rollback,
        _ => return None,
    };
    let xid = quoted
        .trim()
        .strip_prefix('\'')?
        .strip_suffix('\'')?
        .replace("''", "'");
    Some((action, xid))
}

//! XA statement text and "no such branch" recognition per resource engine.

use crate::error::ResourceError;
use crate::types::{ResourceDriver, XaAction};
use std::sync::Arc;

/// Engine-specific XA vocabulary.
pub trait XaDialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Statement for `action` on branch `xid`. An empty string means the engine has no
    /// statement for that action.
    fn statement(&self, action: XaAction, xid: &str) -> String;

    /// Whether `err` means the branch is unknown to the resource manager, i.e. it was
    /// already finalized or never prepared.
    fn is_missing_branch(&self, err: &ResourceError) -> bool;
}

/// MySQL / MariaDB `XA ...` statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl XaDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn statement(&self, action: XaAction, xid: &str) -> String {
        format!("xa {} {}", action.as_str(), mysql_literal(xid))
    }

    fn is_missing_branch(&self, err: &ResourceError) -> bool {
        err.to_string().contains("XAER_NOTA")
    }
}

/// PostgreSQL two-phase commit. Postgres has no END phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl XaDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn statement(&self, action: XaAction, xid: &str) -> String {
        match action {
            XaAction::Start => "begin".to_string(),
            XaAction::End => String::new(),
            XaAction::Prepare => format!("prepare transaction {}", pg_literal(xid)),
            XaAction::Commit => format!("commit prepared {}", pg_literal(xid)),
            XaAction::Rollback => format!("rollback prepared {}", pg_literal(xid)),
        }
    }

    fn is_missing_branch(&self, err: &ResourceError) -> bool {
        err.to_string().contains("does not exist")
    }
}

pub fn dialect_for(driver: ResourceDriver) -> Arc<dyn XaDialect> {
    match driver {
        ResourceDriver::Mysql => Arc::new(MySqlDialect),
        ResourceDriver::Postgres => Arc::new(PostgresDialect),
    }
}

// MySQL treats backslash as an escape inside string literals unless NO_BACKSLASH_ESCAPES is set.
fn mysql_literal(xid: &str) -> String {
    format!("'{}'", xid.replace('\\', "\\\\").replace('\'', "''"))
}

// Standard-conforming strings: only the quote needs doubling.
fn pg_literal(xid: &str) -> String {
    format!("'{}'", xid.replace('\'', "''"))
}

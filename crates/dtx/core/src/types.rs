use crate::error::{DtxError, ResourceError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Identity of one participant branch inside a global transaction.
///
/// Both parts end up inside XA statement literals, so they are restricted to
/// `[A-Za-z0-9_.-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawIdentity")]
pub struct BranchIdentity {
    gid: String,
    branch_id: String,
}

#[derive(Deserialize)]
struct RawIdentity {
    gid: String,
    branch_id: String,
}

impl TryFrom<RawIdentity> for BranchIdentity {
    type Error = DtxError;

    fn try_from(raw: RawIdentity) -> Result<Self, Self::Error> {
        Self::new(raw.gid, raw.branch_id)
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

impl BranchIdentity {
    pub fn new(gid: impl Into<String>, branch_id: impl Into<String>) -> Result<Self, DtxError> {
        let gid = gid.into();
        let branch_id = branch_id.into();
        if gid.is_empty() || branch_id.is_empty() {
            return Err(DtxError::InvalidBranch(format!(
                "gid '{}' and branch_id '{}' must both be set",
                gid, branch_id
            )));
        }
        for (name, value) in [("gid", &gid), ("branch_id", &branch_id)] {
            if !value.chars().all(is_id_char) {
                return Err(DtxError::InvalidBranch(format!(
                    "{} {:?} may only contain letters, digits, '_', '.' and '-'",
                    name, value
                )));
            }
        }
        Ok(Self { gid, branch_id })
    }

    /// Identity of the global transaction itself, which owns no branch id.
    pub fn global(gid: impl Into<String>) -> Self {
        Self {
            gid: gid.into(),
            branch_id: String::new(),
        }
    }

    pub fn gid(&self) -> &str {
        &self.gid
    }

    pub fn branch_id(&self) -> &str {
        &self.branch_id
    }

    /// Composite key handed to the resource's XA statements.
    pub fn xid(&self) -> String {
        format!("{}-{}", self.gid, self.branch_id)
    }
}

impl fmt::Display for BranchIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.xid())
    }
}

/// Transaction mode a branch takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransType {
    Xa,
    Saga,
    Tcc,
    Msg,
}

impl TransType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xa => "xa",
            Self::Saga => "saga",
            Self::Tcc => "tcc",
            Self::Msg => "msg",
        }
    }
}

impl FromStr for TransType {
    type Err = DtxError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "xa" => Ok(Self::Xa),
            "saga" => Ok(Self::Saga),
            "tcc" => Ok(Self::Tcc),
            "msg" => Ok(Self::Msg),
            other => Err(DtxError::InvalidBranch(format!(
                "unknown trans_type '{}'",
                other
            ))),
        }
    }
}

/// Working context for one branch invocation. Never persisted by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransBase {
    identity: BranchIdentity,
    op: String,
    trans_type: TransType,
}

impl TransBase {
    pub fn new(identity: BranchIdentity, trans_type: TransType, op: impl Into<String>) -> Self {
        Self {
            identity,
            op: op.into(),
            trans_type,
        }
    }

    /// Build from the `gid`, `branch_id`, `trans_type` and `op` request parameters.
    ///
    /// `trans_type` defaults to `xa` when absent.
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self, DtxError> {
        let get = |key: &str| params.get(key).map(String::as_str).unwrap_or_default();
        let identity = BranchIdentity::new(get("gid"), get("branch_id"))?;
        let trans_type = match params.get("trans_type") {
            Some(value) if !value.is_empty() => value.parse()?,
            _ => TransType::Xa,
        };
        Ok(Self::new(identity, trans_type, get("op")))
    }

    pub fn identity(&self) -> &BranchIdentity {
        &self.identity
    }

    pub fn gid(&self) -> &str {
        self.identity.gid()
    }

    pub fn branch_id(&self) -> &str {
        self.identity.branch_id()
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn trans_type(&self) -> TransType {
        self.trans_type
    }
}

/// Supported resource engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceDriver {
    Mysql,
    Postgres,
}

impl ResourceDriver {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Postgres => "postgres",
        }
    }
}

impl FromStr for ResourceDriver {
    type Err = ResourceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "mysql" => Ok(Self::Mysql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(ResourceError::UnsupportedDriver(other.to_string())),
        }
    }
}

impl fmt::Display for ResourceDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enough information to open a handle on a transactional resource.
///
/// The branch engine passes this through to a [`crate::ResourceProvider`] untouched.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub driver: ResourceDriver,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub database: String,
}

impl ResourceConfig {
    pub fn mysql(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            driver: ResourceDriver::Mysql,
            host: host.into(),
            port,
            user: user.into(),
            password: String::new(),
            database: String::new(),
        }
    }

    pub fn postgres(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            driver: ResourceDriver::Postgres,
            ..Self::mysql(host, port, user)
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

impl fmt::Debug for ResourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"****")
            .field("database", &self.database)
            .finish()
    }
}

/// The five XA statements a resource understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XaAction {
    Start,
    End,
    Prepare,
    Commit,
    Rollback,
}

impl XaAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Prepare => "prepare",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }
}

/// Terminal decision delivered by the coordinator for a prepared branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Commit,
    Rollback,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        self.action().as_str()
    }

    pub fn action(self) -> XaAction {
        match self {
            Self::Commit => XaAction::Commit,
            Self::Rollback => XaAction::Rollback,
        }
    }
}

impl FromStr for Decision {
    type Err = DtxError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "commit" => Ok(Self::Commit),
            "rollback" => Ok(Self::Rollback),
            other => Err(DtxError::InvalidBranch(format!(
                "unknown action '{}'; expected commit or rollback",
                other
            ))),
        }
    }
}

/// Coordinator phases sequenced around a global business call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Prepare,
    Submit,
    Abort,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Submit => "submit",
            Self::Abort => "abort",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

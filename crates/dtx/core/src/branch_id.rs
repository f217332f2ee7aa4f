use crate::error::DtxError;

const MAX_SUB_BRANCHES: u32 = 99;
const MAX_PARENT_LEN: usize = 20;

/// Allocates sub-branch ids under a parent branch: the parent id followed by a two-digit
/// counter starting at `01`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchIdGenerator {
    parent: String,
    sub: u32,
}

impl BranchIdGenerator {
    pub fn new(parent: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            sub: 0,
        }
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn next_sub_branch_id(&mut self) -> Result<String, DtxError> {
        if self.sub >= MAX_SUB_BRANCHES {
            return Err(DtxError::InvalidBranch(format!(
                "branch id is larger than {}",
                MAX_SUB_BRANCHES
            )));
        }
        if self.parent.len() >= MAX_PARENT_LEN {
            return Err(DtxError::InvalidBranch(format!(
                "total branch id is longer than {}",
                MAX_PARENT_LEN
            )));
        }
        self.sub += 1;
        Ok(self.current_sub_branch_id())
    }

    pub fn current_sub_branch_id(&self) -> String {
        format!("{}{:02}", self.parent, self.sub)
    }
}

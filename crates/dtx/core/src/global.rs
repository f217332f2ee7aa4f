use crate::guard::settle;
use crate::types::{BranchIdentity, Phase};
use std::fmt::Display;
use std::future::Future;
use tracing::{debug, warn};

/// Sequence coordinator phases around one business call.
///
/// `prepare` runs first; if it fails nothing else is sent, and a prepare that succeeded
/// remotely but failed locally is left to the coordinator's timeout reconciliation. After
/// a successful prepare, exactly one of `submit` (business succeeded) or `abort` (business
/// failed or panicked) is sent.
pub async fn run_global_branch<C, CF, B, BF, E>(
    identity: &BranchIdentity,
    call_coordinator: C,
    call_business: B,
) -> Result<(), E>
where
    C: Fn(Phase) -> CF,
    CF: Future<Output = Result<(), E>>,
    B: FnOnce() -> BF,
    BF: Future<Output = Result<(), E>>,
    E: Display,
{
    if let Err(err) = call_coordinator(Phase::Prepare).await {
        warn!(gid = identity.gid(), error = %err, "global prepare failed");
        return Err(err);
    }
    debug!(gid = identity.gid(), "global transaction prepared");

    let call_coordinator = &call_coordinator;
    settle(
        call_business(),
        move || call_coordinator(Phase::Submit),
        move || call_coordinator(Phase::Abort),
    )
    .await
}

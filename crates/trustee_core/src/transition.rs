//! Transition rules of the election state machine.
//!
//! The rules are checked by each task when it starts, against the status it reads from storage.
//! Nothing here touches storage; the functions only decide what the task has to do.

use thiserror::Error;

use crate::ElectionStatus;

/// Number of records per storage transaction, progress report and cancellation check.
pub const COUNT_INTERVAL: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {operation} an election in state {from}")]
pub struct TransitionError {
    pub operation: &'static str,
    pub from: ElectionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializePlan {
    /// Nothing imported yet.
    Fresh,
    /// A previous import was interrupted: discard its ballots, then import from scratch.
    DiscardPartial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPlan {
    /// First verification attempt.
    Fresh,
    /// A previous verification was interrupted before the bundle was stored: read everything again.
    Restart,
    /// The bundle is already stored: only post it again.
    RepostBundle,
}

pub fn plan_initialize(status: ElectionStatus) -> Result<InitializePlan, TransitionError> {
    match status {
        ElectionStatus::Uninitialized => Ok(InitializePlan::Fresh),
        ElectionStatus::Initializing => Ok(InitializePlan::DiscardPartial),
        from => Err(TransitionError {
            operation: "initialize",
            from,
        }),
    }
}

pub fn plan_verify(status: ElectionStatus) -> Result<VerifyPlan, TransitionError> {
    match status {
        ElectionStatus::Initialized => Ok(VerifyPlan::Fresh),
        ElectionStatus::Verifying => Ok(VerifyPlan::Restart),
        ElectionStatus::Verified => Ok(VerifyPlan::RepostBundle),
        from => Err(TransitionError {
            operation: "verify",
            from,
        }),
    }
}

/// Converts a value in `0..=max` to a percentage, truncating. An empty range counts as done.
pub fn to_percentage(value: u64, max: u64) -> u64 {
    if max == 0 {
        return 100;
    }
    (u128::from(value) * 100 / u128::from(max)) as u64
}

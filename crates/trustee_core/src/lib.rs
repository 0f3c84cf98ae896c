//! Trustee core: election state machine, command model and fault taxonomy. No IO.
mod command;
mod fault;
mod registry;
mod status;
mod transition;

pub use command::{Command, CommandKind, Completion, DataSource, NewElection, PoolKind, Request};
pub use fault::{Fault, ParseFaultKind};
pub use registry::{CancellationRegistry, PendingEntry, Ticket};
pub use status::{ElectionStatus, StatusCode};
pub use transition::{
    plan_initialize, plan_verify, to_percentage, InitializePlan, TransitionError, VerifyPlan,
    COUNT_INTERVAL,
};

use trustee_core::{ElectionStatus, StatusCode};
use trustee_logging::{trustee_debug, trustee_info};

use super::{TaskContext, TaskError};

/// Erasing a missing election succeeds without the intermediate event.
pub(super) async fn erase(ctx: &mut TaskContext, election_id: &str) -> Result<(), TaskError> {
    if ctx.store.has_election(election_id)? {
        ctx.store.set_status(election_id, ElectionStatus::Erasing)?;
        ctx.emit(StatusCode::ErasingElection);
        ctx.store.erase_election(election_id)?;
        trustee_info!("Erased election {}", election_id);
    } else {
        trustee_debug!("Election {} is already gone", election_id);
    }
    ctx.succeed(StatusCode::ErasedElection);
    Ok(())
}

pub(super) async fn erase_all(ctx: &mut TaskContext) -> Result<(), TaskError> {
    ctx.store.clear_all()?;
    trustee_info!("Erased all elections");
    ctx.succeed(StatusCode::ErasedAllElections);
    Ok(())
}

use trustee_core::{ElectionStatus, Fault, NewElection, StatusCode};
use trustee_logging::trustee_info;

use super::{TaskContext, TaskError};

pub(super) async fn create(
    ctx: &mut TaskContext,
    election_id: &str,
    election: &NewElection,
) -> Result<(), TaskError> {
    if ctx.store.has_election(election_id)? {
        return Err(Fault::ElectionAlreadyExists.into());
    }
    ctx.store
        .create_election(election_id, election, ElectionStatus::Uninitialized)?;
    trustee_info!("Created election {}", election_id);
    ctx.succeed(StatusCode::CreatedElection);
    Ok(())
}

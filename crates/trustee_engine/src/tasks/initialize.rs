use trustee_core::{
    plan_initialize, DataSource, ElectionStatus, InitializePlan, ParseFaultKind, StatusCode,
    COUNT_INTERVAL,
};
use trustee_logging::{trustee_debug, trustee_info, trustee_warn};

use super::{finish_chunk, open_failed, TaskContext, TaskError};
use crate::import::{open_source, ImportReader, JsonLinesImportReader, ParseError};
use crate::notify::Notification;

pub(super) async fn initialize(
    ctx: &mut TaskContext,
    election_id: &str,
    source: DataSource,
) -> Result<(), TaskError> {
    let label = match &source {
        DataSource::File(path) => path.display().to_string(),
        DataSource::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
    };
    let stream = open_source(source)
        .await
        .map_err(|err| open_failed(label, err))?;

    let status = ctx.store.election_status(election_id)?;
    if plan_initialize(status)? == InitializePlan::DiscardPartial {
        trustee_warn!("Resuming interrupted import of {}; discarding partial ballots", election_id);
        ctx.store.erase_ballots(election_id)?;
    }
    ctx.store
        .set_status(election_id, ElectionStatus::Initializing)?;
    ctx.emit(StatusCode::InitializingElection);

    let mut reader = JsonLinesImportReader::new(stream);
    reader.parse_key(&mut *ctx.store, election_id).await?;

    loop {
        ctx.check_cancelled()?;
        ctx.store.begin_transaction()?;
        let chunk = import_chunk(&mut reader, ctx, election_id).await;
        let imported = finish_chunk(&mut *ctx.store, chunk)?;
        if imported < COUNT_INTERVAL {
            break;
        }
        let count = reader.parsed_count();
        trustee_debug!("Imported {} ballots of {}", count, election_id);
        ctx.emit_progress(StatusCode::InitializingProgress, count);
        ctx.notify_progress(Notification::OngoingImport { count });
    }

    let count = reader.parsed_count();
    if count == 0 {
        return Err(ParseError::invalid(ParseFaultKind::TruncatedFile, "no ballots").into());
    }
    ctx.store
        .set_status(election_id, ElectionStatus::Initialized)?;
    trustee_info!("Initialized {} with {} ballots", election_id, count);
    ctx.services.notifications.dismiss(ctx.ids.ongoing);
    ctx.notify(Notification::Imported { count });
    ctx.succeed(StatusCode::InitializedElection);
    Ok(())
}

/// Parses up to one chunk of ballots into the open transaction.
async fn import_chunk(
    reader: &mut dyn ImportReader,
    ctx: &mut TaskContext,
    election_id: &str,
) -> Result<u64, TaskError> {
    let mut imported = 0;
    while imported < COUNT_INTERVAL {
        if !reader.parse_next_ballot(&mut *ctx.store, election_id).await? {
            break;
        }
        imported += 1;
    }
    Ok(imported)
}

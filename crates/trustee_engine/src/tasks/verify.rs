use trustee_core::{
    plan_verify, to_percentage, ElectionStatus, StatusCode, VerifyPlan, COUNT_INTERVAL,
};
use trustee_logging::{trustee_debug, trustee_info};

use super::{finish_chunk, TaskContext, TaskError};
use crate::crypto::{CryptoSession, Cryptosystem};
use crate::net::{ballots_url, post_url, total_url, ByteStream};
use crate::notify::Notification;
use crate::response::ResponseReader;
use crate::store::{in_transaction, StoreError};

pub(super) async fn verify(ctx: &mut TaskContext, election_id: &str) -> Result<(), TaskError> {
    let record = ctx.store.election(election_id)?;
    let plan = plan_verify(record.status)?;
    let bundle = match plan {
        VerifyPlan::RepostBundle => {
            trustee_info!("Bundle of {} already stored; posting it again", election_id);
            record.decommitment_bundle.ok_or_else(|| {
                StoreError::fault(format!("verified election {election_id} has no bundle"))
            })?
        }
        VerifyPlan::Fresh | VerifyPlan::Restart => {
            let key = record.decommitment_key.ok_or_else(|| {
                StoreError::fault(format!("election {election_id} has no decommitment key"))
            })?;
            read_and_bundle(ctx, election_id, &record.abb_url, &key).await?
        }
    };

    let url = post_url(&record.abb_url, election_id)?;
    ctx.services.network.post(&url, &bundle).await?;
    ctx.store
        .set_status(election_id, ElectionStatus::Completed)?;
    trustee_info!("Posted bundle of {}", election_id);
    ctx.succeed(StatusCode::CompletedElection);
    Ok(())
}

/// Reads the ABB listing, accumulates the matching decommitments and stores the bundle
/// together with the Verified status.
async fn read_and_bundle(
    ctx: &mut TaskContext,
    election_id: &str,
    abb_url: &str,
    key: &str,
) -> Result<String, TaskError> {
    ctx.store
        .set_status(election_id, ElectionStatus::Verifying)?;
    ctx.emit(StatusCode::VerifyingElection);

    let network = ctx.services.network.clone();
    let total = network.get_total(&total_url(abb_url, election_id)?).await?;
    trustee_debug!("ABB lists {} ballots for {}", total, election_id);

    let crypto = ctx.services.crypto.clone();
    let mut session = crypto.acquire(key).await;
    let body = network
        .stream_get(&ballots_url(abb_url, election_id, 0, total)?)
        .await?;
    let mut reader = ResponseReader::new(body);

    loop {
        ctx.check_cancelled()?;
        ctx.store.begin_transaction()?;
        let chunk = verify_chunk(&mut reader, ctx, election_id, &mut session).await;
        let verified = finish_chunk(&mut *ctx.store, chunk)?;
        if verified < COUNT_INTERVAL {
            break;
        }
        let count = reader.parsed_count();
        ctx.emit_progress(StatusCode::VerifyingProgress, to_percentage(count, total));
        ctx.notify_progress(Notification::OngoingVerify { count, total });
    }

    let count = reader.parsed_count();
    let bundle = session.compute_bundle();
    drop(session);
    in_transaction(&mut *ctx.store, |store| {
        store.save_bundle(election_id, &bundle)?;
        store.set_status(election_id, ElectionStatus::Verified)
    })?;
    trustee_info!("Verified {} ballots of {}", count, election_id);
    ctx.services.notifications.dismiss(ctx.ids.ongoing);
    ctx.notify(Notification::Verified { count });
    ctx.emit(StatusCode::VerifiedElection);
    Ok(bundle)
}

async fn verify_chunk(
    reader: &mut ResponseReader<ByteStream>,
    ctx: &mut TaskContext,
    election_id: &str,
    session: &mut CryptoSession,
) -> Result<u64, TaskError> {
    let mut verified = 0;
    while verified < COUNT_INTERVAL {
        if !reader.parse_next(&mut *ctx.store, election_id, &mut *session).await? {
            break;
        }
        verified += 1;
    }
    Ok(verified)
}

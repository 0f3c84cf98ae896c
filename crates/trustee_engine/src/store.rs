use thiserror::Error;
use trustee_core::{ElectionStatus, Fault, NewElection};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage is full")]
    Full,
    #[error("unknown election {0}")]
    UnknownElection(String),
    #[error("{0}")]
    Fault(String),
    #[error("store session is closed")]
    Closed,
    #[error(transparent)]
    Persist(#[from] crate::PersistError),
}

impl StoreError {
    pub(crate) fn fault(message: impl Into<String>) -> Self {
        StoreError::Fault(message.into())
    }
}

impl From<StoreError> for Fault {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Full => Fault::StorageFull,
            StoreError::Persist(crate::PersistError::Io(io))
                if io.kind() == std::io::ErrorKind::StorageFull =>
            {
                Fault::StorageFull
            }
            other => Fault::Storage(other.to_string()),
        }
    }
}

/// Stored attributes of an election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionRecord {
    pub id: String,
    pub question: String,
    pub start_time: i64,
    pub end_time: i64,
    pub abb_url: String,
    pub status: ElectionStatus,
    pub decommitment_key: Option<String>,
    pub decommitment_bundle: Option<String>,
}

/// One side of a ballot as persisted: one row per vote code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BallotRecord<'a> {
    pub serial_no: &'a str,
    pub part_id: &'a str,
    pub vote_code: &'a str,
    pub decommitment: &'a str,
}

/// A transactional session on the election store.
///
/// Writes outside a transaction commit immediately. Inside `begin_transaction` ..
/// `end_transaction` they are rolled back unless `set_transaction_successful` was called.
/// Sessions are not shared between threads; each task opens its own.
pub trait ElectionStore: Send {
    fn begin_transaction(&mut self) -> Result<(), StoreError>;
    fn set_transaction_successful(&mut self) -> Result<(), StoreError>;
    fn end_transaction(&mut self) -> Result<(), StoreError>;

    fn has_election(&mut self, election_id: &str) -> Result<bool, StoreError>;
    /// Fails with [`StoreError::UnknownElection`] if the election does not exist.
    fn election(&mut self, election_id: &str) -> Result<ElectionRecord, StoreError>;
    fn create_election(
        &mut self,
        election_id: &str,
        election: &NewElection,
        status: ElectionStatus,
    ) -> Result<(), StoreError>;
    fn set_status(&mut self, election_id: &str, status: ElectionStatus) -> Result<(), StoreError>;
    fn save_key(&mut self, election_id: &str, decommitment_key: &str) -> Result<(), StoreError>;
    fn save_ballot(&mut self, election_id: &str, ballot: BallotRecord<'_>)
        -> Result<(), StoreError>;
    fn lookup_decommitment(
        &mut self,
        election_id: &str,
        serial_no: &str,
        vote_code: &str,
    ) -> Result<Option<String>, StoreError>;
    fn save_bundle(&mut self, election_id: &str, bundle: &str) -> Result<(), StoreError>;
    fn ballot_count(&mut self, election_id: &str) -> Result<u64, StoreError>;
    fn erase_ballots(&mut self, election_id: &str) -> Result<(), StoreError>;
    /// Erases the ballots first, then the election. Erasing a missing election is a no-op.
    fn erase_election(&mut self, election_id: &str) -> Result<(), StoreError>;
    fn clear_all(&mut self) -> Result<(), StoreError>;
    /// Rolls back any open transaction and releases the session.
    fn close(&mut self);

    fn election_status(&mut self, election_id: &str) -> Result<ElectionStatus, StoreError> {
        Ok(self.election(election_id)?.status)
    }
}

/// Opens store sessions. The dispatcher calls this once per command.
pub trait StoreProvider: Send + Sync {
    fn open(&self) -> Result<Box<dyn ElectionStore>, StoreError>;
}

/// Runs `body` inside one transaction; commits only if it returns `Ok`.
pub fn in_transaction<T, E>(
    store: &mut dyn ElectionStore,
    body: impl FnOnce(&mut dyn ElectionStore) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<StoreError>,
{
    store.begin_transaction()?;
    let result = body(&mut *store);
    if result.is_ok() {
        if let Err(err) = store.set_transaction_successful() {
            store.end_transaction()?;
            return Err(err.into());
        }
    }
    let ended = store.end_transaction();
    let value = result?;
    ended?;
    Ok(value)
}

//! In-process implementation of the election store.
//!
//! All sessions share one set of tables behind a mutex. Writes apply in place; each open
//! transaction keeps an undo log in the shared state, and ending it without marking it successful
//! replays the log backwards.
//!
//! When a snapshot file is configured, every committed unit of work (a write outside a
//! transaction, or a whole transaction) rewrites the snapshot atomically. The snapshot is taken
//! from a copy of the tables with every other session's open undo log applied, so a process
//! restart sees exactly the committed state. Sessions are expected to write disjoint rows.
//!
//! Each rewrite serializes the whole database, so an import costs one rewrite per chunk. This is
//! a reference store for the host binary and tests, not a database for large elections.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use trustee_core::{ElectionStatus, NewElection};
use trustee_logging::{trustee_debug, trustee_warn};

use crate::persist::{PersistError, SnapshotFile};
use crate::store::{BallotRecord, ElectionRecord, ElectionStore, StoreError, StoreProvider};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredElection {
    question: String,
    start_time: i64,
    end_time: i64,
    abb_url: String,
    status: i32,
    decommitment_key: Option<String>,
    decommitment_bundle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BallotRow {
    part_id: String,
    vote_code: String,
    decommitment: String,
}

/// Ballot rows of one election, grouped by serial number.
type BallotTable = BTreeMap<String, Vec<BallotRow>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    elections: BTreeMap<String, StoredElection>,
    ballots: BTreeMap<String, BallotTable>,
}

impl Tables {
    fn row_count(&self) -> u64 {
        self.ballots.values().map(table_rows).sum()
    }

    /// Reverts one write. Returns the change in the number of ballot rows.
    fn revert(&mut self, undo: Undo) -> i64 {
        match undo {
            Undo::RemoveElection(id) => {
                self.elections.remove(&id);
                0
            }
            Undo::RestoreElection(id, election) => {
                self.elections.insert(id, election);
                0
            }
            Undo::PopBallot {
                election_id,
                serial_no,
            } => {
                let Some(table) = self.ballots.get_mut(&election_id) else {
                    return 0;
                };
                let mut change = 0;
                if let Some(rows) = table.get_mut(&serial_no) {
                    if rows.pop().is_some() {
                        change = -1;
                    }
                    if rows.is_empty() {
                        table.remove(&serial_no);
                    }
                }
                if table.is_empty() {
                    self.ballots.remove(&election_id);
                }
                change
            }
            Undo::RestoreBallots(id, ballots) => {
                let added = table_rows(&ballots) as i64;
                let replaced = self
                    .ballots
                    .insert(id, ballots)
                    .map_or(0, |table| table_rows(&table) as i64);
                added - replaced
            }
            Undo::RestoreAll(previous) => {
                let change = previous.row_count() as i64 - self.row_count() as i64;
                *self = previous;
                change
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Undo {
    RemoveElection(String),
    RestoreElection(String, StoredElection),
    PopBallot { election_id: String, serial_no: String },
    RestoreBallots(String, BallotTable),
    RestoreAll(Tables),
}

#[derive(Debug)]
struct Shared {
    tables: Option<Tables>,
    rows: u64,
    snapshot: Option<SnapshotFile>,
    capacity: Option<u64>,
    /// Undo logs of open transactions, by session.
    open: BTreeMap<u64, Vec<Undo>>,
    next_session: u64,
}

impl Shared {
    fn tables(&mut self) -> Result<&mut Tables, StoreError> {
        self.tables.as_mut().ok_or(StoreError::Closed)
    }

    fn load(&mut self) -> Result<(), StoreError> {
        if self.tables.is_some() {
            return Ok(());
        }
        let tables = match &self.snapshot {
            Some(file) => match file.load()? {
                Some(bytes) => serde_json::from_slice::<Tables>(&bytes)
                    .map_err(|err| PersistError::Corrupt(err.to_string()))?,
                None => Tables::default(),
            },
            None => Tables::default(),
        };
        self.rows = tables.row_count();
        match &self.snapshot {
            Some(file) => trustee_debug!(
                "Loaded election store from {} with {} ballot rows",
                file.path().display(),
                self.rows
            ),
            None => trustee_debug!("Started empty in-memory election store"),
        }
        self.tables = Some(tables);
        Ok(())
    }

    /// Writes the committed state: open transactions are reverted on a copy first.
    fn flush(&self) -> Result<(), StoreError> {
        let (Some(file), Some(tables)) = (&self.snapshot, &self.tables) else {
            return Ok(());
        };
        let encoded = if self.open.values().all(Vec::is_empty) {
            serde_json::to_vec(tables)
        } else {
            let mut committed = tables.clone();
            for log in self.open.values() {
                for undo in log.iter().rev() {
                    committed.revert(undo.clone());
                }
            }
            serde_json::to_vec(&committed)
        };
        let bytes = encoded.map_err(|err| StoreError::fault(err.to_string()))?;
        file.store(&bytes)?;
        Ok(())
    }

    fn apply_undo(&mut self, undo: Undo) -> Result<(), StoreError> {
        let change = self.tables()?.revert(undo);
        self.rows = self.rows.saturating_add_signed(change);
        Ok(())
    }

    fn rollback(&mut self, log: Vec<Undo>) -> Result<(), StoreError> {
        for undo in log.into_iter().rev() {
            self.apply_undo(undo)?;
        }
        Ok(())
    }
}

fn table_rows(table: &BallotTable) -> u64 {
    table.values().map(|rows| rows.len() as u64).sum()
}

/// Shared in-memory election database. Cloning yields another handle to the same tables.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    shared: Arc<Mutex<Shared>>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    /// A database that lives only as long as the process.
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// A database persisted to `snapshot`. The file is read on the first `open`.
    pub fn with_snapshot(snapshot: SnapshotFile) -> Self {
        Self::build(Some(snapshot), None)
    }

    /// Limits the number of ballot rows; further inserts fail with [`StoreError::Full`].
    pub fn with_capacity(self, rows: u64) -> Self {
        if let Ok(mut shared) = self.shared.lock() {
            shared.capacity = Some(rows);
        }
        self
    }

    fn build(snapshot: Option<SnapshotFile>, capacity: Option<u64>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                tables: None,
                rows: 0,
                snapshot,
                capacity,
                open: BTreeMap::new(),
                next_session: 0,
            })),
        }
    }

    pub fn session(&self) -> Result<MemorySession, StoreError> {
        let mut shared = lock(&self.shared)?;
        shared.load()?;
        shared.next_session += 1;
        Ok(MemorySession {
            shared: self.shared.clone(),
            id: shared.next_session,
            in_transaction: false,
            successful: false,
            closed: false,
        })
    }
}

impl StoreProvider for MemoryDatabase {
    fn open(&self) -> Result<Box<dyn ElectionStore>, StoreError> {
        Ok(Box::new(self.session()?))
    }
}

fn lock(shared: &Mutex<Shared>) -> Result<MutexGuard<'_, Shared>, StoreError> {
    shared
        .lock()
        .map_err(|_| StoreError::fault("election store lock poisoned"))
}

/// One session on a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Mutex<Shared>>,
    id: u64,
    in_transaction: bool,
    successful: bool,
    closed: bool,
}

impl MemorySession {
    /// Applies one write. Inside a transaction the undo entry is logged; outside, the write is
    /// flushed immediately and undone if the flush fails.
    fn write<T>(
        &mut self,
        op: impl FnOnce(&mut Shared) -> Result<(T, Option<Undo>), StoreError>,
    ) -> Result<T, StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        let mut shared = lock(&self.shared)?;
        let (value, undo) = op(&mut shared)?;
        if self.in_transaction {
            if let Some(undo) = undo {
                shared.open.entry(self.id).or_default().push(undo);
            }
        } else if let Err(err) = shared.flush() {
            if let Some(undo) = undo {
                shared.apply_undo(undo)?;
            }
            return Err(err);
        }
        Ok(value)
    }

    fn read<T>(&self, op: impl FnOnce(&Tables) -> Result<T, StoreError>) -> Result<T, StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        let mut shared = lock(&self.shared)?;
        op(&*shared.tables()?)
    }

    /// Closes the open transaction and hands back its undo log.
    fn take_log(&mut self, shared: &mut Shared) -> Vec<Undo> {
        self.in_transaction = false;
        shared.open.remove(&self.id).unwrap_or_default()
    }
}

impl ElectionStore for MemorySession {
    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        if self.in_transaction {
            return Err(StoreError::fault("nested transactions are not supported"));
        }
        self.in_transaction = true;
        self.successful = false;
        Ok(())
    }

    fn set_transaction_successful(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::fault("no transaction in progress"));
        }
        self.successful = true;
        Ok(())
    }

    fn end_transaction(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::fault("no transaction in progress"));
        }
        let shared = self.shared.clone();
        let mut shared = lock(&shared)?;
        let log = self.take_log(&mut shared);
        if !std::mem::take(&mut self.successful) {
            trustee_debug!("Rolling back transaction of {} writes", log.len());
            return shared.rollback(log);
        }
        if let Err(err) = shared.flush() {
            trustee_warn!("Commit failed, rolling back: {}", err);
            shared.rollback(log)?;
            return Err(err);
        }
        Ok(())
    }

    fn has_election(&mut self, election_id: &str) -> Result<bool, StoreError> {
        self.read(|tables| Ok(tables.elections.contains_key(election_id)))
    }

    fn election(&mut self, election_id: &str) -> Result<ElectionRecord, StoreError> {
        self.read(|tables| {
            let stored = tables
                .elections
                .get(election_id)
                .ok_or_else(|| StoreError::UnknownElection(election_id.to_owned()))?;
            let status = ElectionStatus::from_value(stored.status).ok_or_else(|| {
                StoreError::fault(format!("invalid status value {}", stored.status))
            })?;
            Ok(ElectionRecord {
                id: election_id.to_owned(),
                question: stored.question.clone(),
                start_time: stored.start_time,
                end_time: stored.end_time,
                abb_url: stored.abb_url.clone(),
                status,
                decommitment_key: stored.decommitment_key.clone(),
                decommitment_bundle: stored.decommitment_bundle.clone(),
            })
        })
    }

    fn create_election(
        &mut self,
        election_id: &str,
        election: &NewElection,
        status: ElectionStatus,
    ) -> Result<(), StoreError> {
        self.write(|shared| {
            let tables = shared.tables()?;
            if tables.elections.contains_key(election_id) {
                return Err(StoreError::fault(format!(
                    "election {election_id} already exists"
                )));
            }
            tables.elections.insert(
                election_id.to_owned(),
                StoredElection {
                    question: election.question.clone(),
                    start_time: election.start_time,
                    end_time: election.end_time,
                    abb_url: election.abb_url.clone(),
                    status: status.value(),
                    decommitment_key: None,
                    decommitment_bundle: None,
                },
            );
            Ok(((), Some(Undo::RemoveElection(election_id.to_owned()))))
        })
    }

    fn set_status(&mut self, election_id: &str, status: ElectionStatus) -> Result<(), StoreError> {
        self.update_election(election_id, |stored| {
            stored.status = status.value();
            Ok(())
        })
    }

    fn save_key(&mut self, election_id: &str, decommitment_key: &str) -> Result<(), StoreError> {
        self.update_election(election_id, |stored| {
            stored.decommitment_key = Some(decommitment_key.to_owned());
            Ok(())
        })
    }

    fn save_ballot(
        &mut self,
        election_id: &str,
        ballot: BallotRecord<'_>,
    ) -> Result<(), StoreError> {
        self.write(|shared| {
            if shared.capacity.is_some_and(|capacity| shared.rows >= capacity) {
                return Err(StoreError::Full);
            }
            let tables = shared.tables()?;
            if !tables.elections.contains_key(election_id) {
                return Err(StoreError::UnknownElection(election_id.to_owned()));
            }
            let rows = tables
                .ballots
                .entry(election_id.to_owned())
                .or_default()
                .entry(ballot.serial_no.to_owned())
                .or_default();
            if rows
                .iter()
                .any(|row| row.part_id == ballot.part_id && row.vote_code == ballot.vote_code)
            {
                return Err(StoreError::fault(format!(
                    "duplicate ballot {} part {} vote code {}",
                    ballot.serial_no, ballot.part_id, ballot.vote_code
                )));
            }
            rows.push(BallotRow {
                part_id: ballot.part_id.to_owned(),
                vote_code: ballot.vote_code.to_owned(),
                decommitment: ballot.decommitment.to_owned(),
            });
            shared.rows += 1;
            Ok((
                (),
                Some(Undo::PopBallot {
                    election_id: election_id.to_owned(),
                    serial_no: ballot.serial_no.to_owned(),
                }),
            ))
        })
    }

    fn lookup_decommitment(
        &mut self,
        election_id: &str,
        serial_no: &str,
        vote_code: &str,
    ) -> Result<Option<String>, StoreError> {
        self.read(|tables| {
            Ok(tables
                .ballots
                .get(election_id)
                .and_then(|table| table.get(serial_no))
                .and_then(|rows| rows.iter().find(|row| row.vote_code == vote_code))
                .map(|row| row.decommitment.clone()))
        })
    }

    fn save_bundle(&mut self, election_id: &str, bundle: &str) -> Result<(), StoreError> {
        self.update_election(election_id, |stored| match &stored.decommitment_bundle {
            Some(existing) if existing != bundle => Err(StoreError::fault(
                "a different decommitment bundle is already stored",
            )),
            _ => {
                stored.decommitment_bundle = Some(bundle.to_owned());
                Ok(())
            }
        })
    }

    fn ballot_count(&mut self, election_id: &str) -> Result<u64, StoreError> {
        self.read(|tables| {
            Ok(tables
                .ballots
                .get(election_id)
                .map(table_rows)
                .unwrap_or(0))
        })
    }

    fn erase_ballots(&mut self, election_id: &str) -> Result<(), StoreError> {
        self.write(|shared| {
            let removed = shared.tables()?.ballots.remove(election_id);
            let undo = removed.map(|table| {
                shared.rows -= table_rows(&table);
                Undo::RestoreBallots(election_id.to_owned(), table)
            });
            Ok(((), undo))
        })
    }

    fn erase_election(&mut self, election_id: &str) -> Result<(), StoreError> {
        self.erase_ballots(election_id)?;
        self.write(|shared| {
            let removed = shared.tables()?.elections.remove(election_id);
            let undo = removed
                .map(|election| Undo::RestoreElection(election_id.to_owned(), election));
            Ok(((), undo))
        })
    }

    fn clear_all(&mut self) -> Result<(), StoreError> {
        self.write(|shared| {
            let previous = std::mem::take(shared.tables()?);
            shared.rows = 0;
            Ok(((), Some(Undo::RestoreAll(previous))))
        })
    }

    fn close(&mut self) {
        if self.in_transaction {
            trustee_warn!("Closing store session with an open transaction; rolling back");
            let shared = self.shared.clone();
            let rolled_back = lock(&shared).and_then(|mut shared| {
                let log = self.take_log(&mut shared);
                shared.rollback(log)
            });
            if let Err(err) = rolled_back {
                trustee_warn!("Rollback on close failed: {}", err);
            }
        }
        self.closed = true;
    }
}

impl MemorySession {
    fn update_election(
        &mut self,
        election_id: &str,
        change: impl FnOnce(&mut StoredElection) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        self.write(|shared| {
            let stored = shared
                .tables()?
                .elections
                .get_mut(election_id)
                .ok_or_else(|| StoreError::UnknownElection(election_id.to_owned()))?;
            let previous = stored.clone();
            change(stored)?;
            Ok((
                (),
                Some(Undo::RestoreElection(election_id.to_owned(), previous)),
            ))
        })
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if !self.closed {
            self.close();
        }
    }
}

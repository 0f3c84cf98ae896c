use pretty_assertions::assert_eq;
use tempfile::TempDir;
use trustee_core::{ElectionStatus, Fault, NewElection};
use trustee_engine::{
    in_transaction, BallotRecord, ElectionStore, MemoryDatabase, SnapshotFile, StoreError,
    StoreProvider,
};

fn election() -> NewElection {
    NewElection {
        question: "Approve the budget?".into(),
        start_time: 1_700_000_000_000,
        end_time: 1_700_086_400_000,
        abb_url: "http://abb.example/".into(),
    }
}

fn ballot<'a>(serial_no: &'a str, vote_code: &'a str) -> BallotRecord<'a> {
    BallotRecord {
        serial_no,
        part_id: "A",
        vote_code,
        decommitment: "d",
    }
}

#[test]
fn rolled_back_transaction_leaves_no_trace() {
    let db = MemoryDatabase::new();
    let mut store = db.session().unwrap();
    store
        .create_election("E1", &election(), ElectionStatus::Uninitialized)
        .unwrap();

    store.begin_transaction().unwrap();
    store.save_ballot("E1", ballot("1", "V1")).unwrap();
    store.save_ballot("E1", ballot("2", "V2")).unwrap();
    store
        .set_status("E1", ElectionStatus::Initializing)
        .unwrap();
    store.end_transaction().unwrap();

    assert_eq!(store.ballot_count("E1").unwrap(), 0);
    assert_eq!(
        store.election_status("E1").unwrap(),
        ElectionStatus::Uninitialized
    );
}

#[test]
fn committed_transaction_is_visible_to_other_sessions() {
    let db = MemoryDatabase::new();
    let mut writer = db.session().unwrap();
    writer
        .create_election("E1", &election(), ElectionStatus::Uninitialized)
        .unwrap();

    in_transaction(&mut writer, |store| {
        store.save_ballot("E1", ballot("1", "V1"))?;
        store.save_ballot("E1", ballot("1", "V2"))
    })
    .unwrap();

    let mut reader = db.open().unwrap();
    assert_eq!(reader.ballot_count("E1").unwrap(), 2);
    assert_eq!(
        reader.lookup_decommitment("E1", "1", "V2").unwrap(),
        Some("d".to_string())
    );
    assert_eq!(reader.lookup_decommitment("E1", "1", "V9").unwrap(), None);
}

#[test]
fn failing_body_rolls_back_the_transaction() {
    let db = MemoryDatabase::new();
    let mut store = db.session().unwrap();
    store
        .create_election("E1", &election(), ElectionStatus::Uninitialized)
        .unwrap();

    let result = in_transaction(&mut store, |store| {
        store.save_ballot("E1", ballot("1", "V1"))?;
        store.save_ballot("E1", ballot("1", "V1"))
    });
    assert!(result.is_err());
    assert_eq!(store.ballot_count("E1").unwrap(), 0);
}

#[test]
fn closing_a_session_rolls_back_its_open_transaction() {
    let db = MemoryDatabase::new();
    {
        let mut store = db.session().unwrap();
        store
            .create_election("E1", &election(), ElectionStatus::Uninitialized)
            .unwrap();
        store.begin_transaction().unwrap();
        store.save_ballot("E1", ballot("1", "V1")).unwrap();
    }
    let mut store = db.session().unwrap();
    assert_eq!(store.ballot_count("E1").unwrap(), 0);
    assert!(store.has_election("E1").unwrap());
}

#[test]
fn capacity_surfaces_as_storage_full() {
    let db = MemoryDatabase::new().with_capacity(2);
    let mut store = db.session().unwrap();
    store
        .create_election("E1", &election(), ElectionStatus::Uninitialized)
        .unwrap();
    store.save_ballot("E1", ballot("1", "V1")).unwrap();
    store.save_ballot("E1", ballot("2", "V2")).unwrap();

    let err = store.save_ballot("E1", ballot("3", "V3")).unwrap_err();
    assert!(matches!(err, StoreError::Full));
    assert_eq!(Fault::from(err), Fault::StorageFull);

    store.erase_ballots("E1").unwrap();
    store.save_ballot("E1", ballot("3", "V3")).unwrap();
}

#[test]
fn bundle_is_write_once() {
    let db = MemoryDatabase::new();
    let mut store = db.session().unwrap();
    store
        .create_election("E1", &election(), ElectionStatus::Verifying)
        .unwrap();
    store.save_bundle("E1", "abc").unwrap();
    store.save_bundle("E1", "abc").unwrap();
    assert!(store.save_bundle("E1", "other").is_err());
    assert_eq!(
        store.election("E1").unwrap().decommitment_bundle.as_deref(),
        Some("abc")
    );
}

#[test]
fn erase_removes_ballots_then_election_and_is_idempotent() {
    let db = MemoryDatabase::new();
    let mut store = db.session().unwrap();
    store
        .create_election("E1", &election(), ElectionStatus::Initialized)
        .unwrap();
    store.save_ballot("E1", ballot("1", "V1")).unwrap();

    store.erase_election("E1").unwrap();
    assert!(!store.has_election("E1").unwrap());
    assert_eq!(store.ballot_count("E1").unwrap(), 0);
    store.erase_election("E1").unwrap();

    let err = store.election("E1").unwrap_err();
    assert!(matches!(err, StoreError::UnknownElection(_)));
    assert!(matches!(Fault::from(err), Fault::Storage(_)));
}

#[test]
fn clear_all_inside_a_rolled_back_transaction_restores_everything() {
    let db = MemoryDatabase::new();
    let mut store = db.session().unwrap();
    for id in ["E1", "E2"] {
        store
            .create_election(id, &election(), ElectionStatus::Uninitialized)
            .unwrap();
        store.save_ballot(id, ballot("1", "V1")).unwrap();
    }

    store.begin_transaction().unwrap();
    store.clear_all().unwrap();
    assert!(!store.has_election("E1").unwrap());
    store.end_transaction().unwrap();

    assert!(store.has_election("E2").unwrap());
    assert_eq!(store.ballot_count("E1").unwrap(), 1);
}

#[test]
fn snapshot_survives_a_restart_with_committed_state_only() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("trustee.json");
    {
        let db = MemoryDatabase::with_snapshot(SnapshotFile::new(&path));
        let mut store = db.session().unwrap();
        store
            .create_election("E1", &election(), ElectionStatus::Uninitialized)
            .unwrap();
        store.save_key("E1", "key").unwrap();
        in_transaction(&mut store, |store| store.save_ballot("E1", ballot("1", "V1")))
            .unwrap();

        store.begin_transaction().unwrap();
        store.save_ballot("E1", ballot("2", "V2")).unwrap();
        // Never committed.
    }

    let db = MemoryDatabase::with_snapshot(SnapshotFile::new(&path));
    let mut store = db.session().unwrap();
    let record = store.election("E1").unwrap();
    assert_eq!(record.question, "Approve the budget?");
    assert_eq!(record.decommitment_key.as_deref(), Some("key"));
    assert_eq!(store.ballot_count("E1").unwrap(), 1);
}

#[test]
fn snapshot_excludes_another_sessions_open_transaction() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("trustee.json");
    {
        let db = MemoryDatabase::with_snapshot(SnapshotFile::new(&path));
        let mut importer = db.session().unwrap();
        importer
            .create_election("E1", &election(), ElectionStatus::Initializing)
            .unwrap();
        importer.begin_transaction().unwrap();
        importer.save_ballot("E1", ballot("1", "V1")).unwrap();

        // Another session commits while the chunk above is still open.
        let mut other = db.session().unwrap();
        other
            .create_election("E2", &election(), ElectionStatus::Uninitialized)
            .unwrap();
        assert_eq!(other.ballot_count("E1").unwrap(), 1);

        // Crash: the importer never ends its transaction.
        std::mem::forget(importer);
    }

    let db = MemoryDatabase::with_snapshot(SnapshotFile::new(&path));
    let mut store = db.session().unwrap();
    assert!(store.has_election("E2").unwrap());
    assert_eq!(
        store.election_status("E1").unwrap(),
        ElectionStatus::Initializing
    );
    assert_eq!(store.ballot_count("E1").unwrap(), 0);
}

#[test]
fn committing_one_session_keeps_the_other_uncommitted() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("trustee.json");
    let db = MemoryDatabase::with_snapshot(SnapshotFile::new(&path));
    let mut first = db.session().unwrap();
    let mut second = db.session().unwrap();
    first
        .create_election("E1", &election(), ElectionStatus::Uninitialized)
        .unwrap();
    second
        .create_election("E2", &election(), ElectionStatus::Uninitialized)
        .unwrap();

    first.begin_transaction().unwrap();
    second.begin_transaction().unwrap();
    first.save_ballot("E1", ballot("1", "V1")).unwrap();
    second.save_ballot("E2", ballot("1", "V1")).unwrap();
    second.save_ballot("E2", ballot("2", "V2")).unwrap();
    first.set_transaction_successful().unwrap();
    first.end_transaction().unwrap();

    let restarted = MemoryDatabase::with_snapshot(SnapshotFile::new(&path));
    let mut store = restarted.session().unwrap();
    assert_eq!(store.ballot_count("E1").unwrap(), 1);
    assert_eq!(store.ballot_count("E2").unwrap(), 0);

    // Rolling back the second transaction leaves the first commit in place.
    second.end_transaction().unwrap();
    assert_eq!(first.ballot_count("E1").unwrap(), 1);
    assert_eq!(first.ballot_count("E2").unwrap(), 0);
}

#[test]
fn corrupt_snapshot_fails_to_open() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("trustee.json");
    std::fs::write(&path, "{ not json").unwrap();

    let db = MemoryDatabase::with_snapshot(SnapshotFile::new(&path));
    let err = db.open().err().expect("open must fail");
    assert!(matches!(Fault::from(err), Fault::Storage(_)));
}

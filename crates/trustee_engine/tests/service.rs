use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio::sync::Notify;
use trustee_core::{Command, DataSource, ElectionStatus, NewElection, StatusCode};
use trustee_engine::{
    ByteStream, Cryptosystem, DigestCryptosystem, ElectionStore, MemoryDatabase, NetError,
    NetworkClient, Notification, NotificationId, Notifier, ServiceEvent, ServiceParts,
    StoreError, StoreProvider, TrusteeConfig, TrusteeEvent, TrusteeService,
};
use url::Url;
use wiremock::matchers::{body_string, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingNotifier {
    shown: Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
    fn show(&self, _: Option<&str>, _: NotificationId, notification: &Notification) {
        self.shown.lock().unwrap().push(notification.clone());
    }

    fn dismiss(&self, _: NotificationId) {}
}

/// Holds the worker inside the first ongoing-import notification: one `gate.wait()` meets it
/// there, a second one lets it continue.
struct GatedNotifier {
    armed: AtomicBool,
    gate: Barrier,
}

impl GatedNotifier {
    fn new() -> Self {
        Self {
            armed: AtomicBool::new(true),
            gate: Barrier::new(2),
        }
    }
}

impl Notifier for GatedNotifier {
    fn show(&self, _: Option<&str>, _: NotificationId, notification: &Notification) {
        if matches!(notification, Notification::OngoingImport { .. })
            && self.armed.swap(false, Ordering::SeqCst)
        {
            self.gate.wait();
            self.gate.wait();
        }
    }

    fn dismiss(&self, _: NotificationId) {}
}

/// Blocks `get_total` until released, then fails with a timeout.
#[derive(Default)]
struct GatedNetwork {
    gate: Notify,
}

#[async_trait::async_trait]
impl NetworkClient for GatedNetwork {
    async fn get_total(&self, _: &Url) -> Result<u64, NetError> {
        self.gate.notified().await;
        Err(NetError::Timeout("gate".into()))
    }

    async fn stream_get(&self, _: &Url) -> Result<ByteStream, NetError> {
        Err(NetError::Transport("unused".into()))
    }

    async fn post(&self, _: &Url, _: &str) -> Result<(), NetError> {
        Err(NetError::Transport("unused".into()))
    }
}

struct BrokenStore;

impl StoreProvider for BrokenStore {
    fn open(&self) -> Result<Box<dyn ElectionStore>, StoreError> {
        Err(StoreError::Closed)
    }
}

fn start(
    store: Arc<dyn StoreProvider>,
    network: Option<Arc<dyn NetworkClient>>,
    notifier: Arc<dyn Notifier>,
) -> TrusteeService {
    trustee_logging::initialize_for_tests();
    let config = TrusteeConfig::default();
    let mut parts = ServiceParts::new(store, &config)
        .expect("parts")
        .with_notifier(notifier);
    if let Some(network) = network {
        parts = parts.with_network(network);
    }
    TrusteeService::start(config, parts).expect("service")
}

fn start_plain(db: &MemoryDatabase) -> TrusteeService {
    start(
        Arc::new(db.clone()),
        None,
        Arc::new(RecordingNotifier::default()),
    )
}

/// Collects status events until the service reports that all work is done.
async fn until_idle(service: &TrusteeService) -> Vec<TrusteeEvent> {
    let deadline = Instant::now() + Duration::from_secs(20);
    let mut events = Vec::new();
    while Instant::now() < deadline {
        match service.try_recv_event() {
            Some(ServiceEvent::Status(event)) => events.push(event),
            Some(ServiceEvent::Idle) => return events,
            None => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    panic!("service never became idle; events so far: {events:?}");
}

/// Executes one command and waits for the service to drain.
async fn run(service: &TrusteeService, command: Command) -> (StatusCode, Vec<TrusteeEvent>) {
    let code = service.execute(command).await.expect("completion");
    (code, until_idle(service).await)
}

fn codes(events: &[TrusteeEvent]) -> Vec<(StatusCode, Option<u64>)> {
    events.iter().map(|e| (e.status, e.progress)).collect()
}

fn new_election(abb_url: &str) -> NewElection {
    NewElection {
        question: "Approve the budget?".into(),
        start_time: 1_700_000_000_000,
        end_time: 1_700_086_400_000,
        abb_url: abb_url.into(),
    }
}

fn create(id: &str, abb_url: &str) -> Command {
    Command::Create {
        election_id: id.into(),
        election: new_election(abb_url),
    }
}

fn initialize(id: &str, ballots: u64) -> Command {
    Command::Initialize {
        election_id: id.into(),
        source: DataSource::Bytes(import_data(ballots)),
    }
}

fn verify(id: &str) -> Command {
    Command::Verify {
        election_id: id.into(),
    }
}

/// Key record plus `ballots` ballots with one vote code per side.
fn import_data(ballots: u64) -> Vec<u8> {
    let mut data = String::from("{\"decommitment_key\": \"key\"}\n");
    for i in 1..=ballots {
        data.push_str(&format!(
            "{{\"serial_number\": \"{i}\", \
             \"part_a\": {{\"id\": \"A\", \"vote_codes\": [{{\"vote_code\": \"A{i}\", \"decommitment\": \"da{i}\"}}]}}, \
             \"part_b\": {{\"id\": \"B\", \"vote_codes\": [{{\"vote_code\": \"B{i}\", \"decommitment\": \"db{i}\"}}]}}}}\n"
        ));
    }
    data.into_bytes()
}

/// Seeds an election directly in the store.
fn seed(db: &MemoryDatabase, id: &str, status: ElectionStatus) {
    let mut store = db.session().unwrap();
    store
        .create_election(id, &new_election("http://abb.invalid/"), status)
        .unwrap();
    store.save_key(id, "key").unwrap();
}

fn status_of(db: &MemoryDatabase, id: &str) -> ElectionStatus {
    db.session().unwrap().election_status(id).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn import_then_verify_completes_the_election() {
    let server = MockServer::start().await;
    let base = format!("{}/abb/", server.uri());

    let mut listing = String::new();
    let mut expected = DigestCryptosystem::new("key");
    for i in 1..=250 {
        listing.push_str(&format!("{i} A{i}\n"));
        expected.add(&format!("da{i}"));
        if i % 60 == 0 {
            listing.push_str("999999 NOTOURS\n");
        }
    }
    let bundle = expected.compute_bundle();

    Mock::given(method("GET"))
        .and(path("/abb/gettotal/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("250"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/abb/"))
        .and(query_param("id", "E1"))
        .and(query_param("start", "0"))
        .and(query_param("stop", "250"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/abb/post/"))
        .and(body_string(bundle.clone()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let db = MemoryDatabase::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let service = start(Arc::new(db.clone()), None, notifier.clone());

    let (code, events) = run(&service, create("E1", &base)).await;
    assert_eq!(code, StatusCode::CreatedElection);
    assert_eq!(codes(&events), vec![(StatusCode::CreatedElection, None)]);

    let (code, events) = run(&service, initialize("E1", 250)).await;
    assert_eq!(code, StatusCode::InitializedElection);
    assert_eq!(
        codes(&events),
        vec![
            (StatusCode::InitializingElection, None),
            (StatusCode::InitializingProgress, Some(100)),
            (StatusCode::InitializingProgress, Some(200)),
            (StatusCode::InitializedElection, None),
        ]
    );
    assert_eq!(status_of(&db, "E1"), ElectionStatus::Initialized);
    assert_eq!(db.session().unwrap().ballot_count("E1").unwrap(), 500);

    let (code, events) = run(&service, verify("E1")).await;
    assert_eq!(code, StatusCode::CompletedElection);
    assert_eq!(
        codes(&events),
        vec![
            (StatusCode::VerifyingElection, None),
            (StatusCode::VerifyingProgress, Some(40)),
            (StatusCode::VerifyingProgress, Some(80)),
            (StatusCode::VerifiedElection, None),
            (StatusCode::CompletedElection, None),
        ]
    );
    assert!(events
        .iter()
        .all(|e| e.election_id.as_deref() == Some("E1")));

    let record = db.session().unwrap().election("E1").unwrap();
    assert_eq!(record.status, ElectionStatus::Completed);
    assert_eq!(record.decommitment_bundle, Some(bundle));

    let shown = notifier.shown.lock().unwrap().clone();
    assert!(shown.contains(&Notification::OngoingImport { count: 200 }));
    assert!(shown.contains(&Notification::Imported { count: 250 }));
    assert!(shown.contains(&Notification::OngoingVerify {
        count: 100,
        total: 250
    }));
    assert!(shown.contains(&Notification::Verified { count: 250 }));

    service.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupted_import_is_discarded_and_redone() {
    let db = MemoryDatabase::new();
    seed(&db, "E1", ElectionStatus::Initializing);
    {
        let mut store = db.session().unwrap();
        for serial in ["1", "2", "3"] {
            store
                .save_ballot(
                    "E1",
                    trustee_engine::BallotRecord {
                        serial_no: serial,
                        part_id: "A",
                        vote_code: "STALE",
                        decommitment: "old",
                    },
                )
                .unwrap();
        }
    }

    let service = start_plain(&db);
    let (code, _) = run(&service, initialize("E1", 120)).await;
    assert_eq!(code, StatusCode::InitializedElection);

    let mut store = db.session().unwrap();
    assert_eq!(store.ballot_count("E1").unwrap(), 240);
    assert_eq!(store.lookup_decommitment("E1", "1", "STALE").unwrap(), None);
    assert_eq!(store.election_status("E1").unwrap(), ElectionStatus::Initialized);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_before_start_never_runs_the_import() {
    let db = MemoryDatabase::new();
    seed(&db, "E0", ElectionStatus::Initialized);
    seed(&db, "E1", ElectionStatus::Uninitialized);
    let network = Arc::new(GatedNetwork::default());
    let service = start(
        Arc::new(db.clone()),
        Some(network.clone()),
        Arc::new(RecordingNotifier::default()),
    );

    let blocker = service.execute(verify("E0"));
    let import = service.execute(initialize("E1", 10));
    let cancel = service.execute(Command::Cancel {
        election_id: "E1".into(),
    });

    assert_eq!(cancel.await.unwrap(), StatusCode::CancelledOperation);
    network.gate.notify_one();
    assert_eq!(blocker.await.unwrap(), StatusCode::SocketTimeout);
    assert_eq!(import.await.unwrap(), StatusCode::CancelledOperation);

    let events = until_idle(&service).await;
    let e1: Vec<_> = events
        .iter()
        .filter(|e| e.election_id.as_deref() == Some("E1"))
        .map(|e| e.status)
        .collect();
    assert_eq!(e1, vec![StatusCode::CancelledOperation]);
    assert_eq!(status_of(&db, "E1"), ElectionStatus::Uninitialized);
    assert_eq!(status_of(&db, "E0"), ElectionStatus::Verifying);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_a_running_import_stops_at_the_next_chunk() {
    let db = MemoryDatabase::new();
    seed(&db, "E1", ElectionStatus::Uninitialized);
    let notifier = Arc::new(GatedNotifier::new());
    let service = start(Arc::new(db.clone()), None, notifier.clone());

    let import = service.execute(initialize("E1", 250));
    // The first chunk is committed and reported; the worker waits before the next one.
    notifier.gate.wait();
    let cancel = service.execute(Command::Cancel {
        election_id: "E1".into(),
    });
    assert_eq!(cancel.await.unwrap(), StatusCode::CancelledOperation);
    notifier.gate.wait();
    assert_eq!(import.await.unwrap(), StatusCode::CancelledOperation);

    let events = until_idle(&service).await;
    assert_eq!(
        codes(&events),
        vec![
            (StatusCode::InitializingElection, None),
            (StatusCode::InitializingProgress, Some(100)),
            (StatusCode::CancelledOperation, None),
        ]
    );
    let mut store = db.session().unwrap();
    assert_eq!(store.ballot_count("E1").unwrap(), 200);
    assert_eq!(store.election_status("E1").unwrap(), ElectionStatus::Initializing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn follow_up_right_after_completion_is_not_pending() {
    let db = MemoryDatabase::new();
    let service = start_plain(&db);
    for i in 0..200 {
        let id = format!("E{i}");
        seed(&db, &id, ElectionStatus::Uninitialized);
        let code = service.execute(initialize(&id, 1)).await.unwrap();
        assert_eq!(code, StatusCode::InitializedElection);
        // Straight after the completion, without waiting for the service to go idle.
        let code = service.execute(initialize(&id, 1)).await.unwrap();
        assert_eq!(code, StatusCode::InvalidState, "follow-up on {id}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_pending_operation_is_rejected() {
    let db = MemoryDatabase::new();
    seed(&db, "E0", ElectionStatus::Initialized);
    seed(&db, "E1", ElectionStatus::Uninitialized);
    let network = Arc::new(GatedNetwork::default());
    let service = start(
        Arc::new(db.clone()),
        Some(network.clone()),
        Arc::new(RecordingNotifier::default()),
    );

    let blocker = service.execute(verify("E0"));
    let first = service.execute(initialize("E1", 5));
    let second = service.execute(initialize("E1", 5));
    assert_eq!(second.await.unwrap(), StatusCode::OperationPending);

    network.gate.notify_one();
    assert_eq!(blocker.await.unwrap(), StatusCode::SocketTimeout);
    assert_eq!(first.await.unwrap(), StatusCode::InitializedElection);
    until_idle(&service).await;

    // Once finished, the election accepts a new cancellable command again.
    let (code, _) = run(&service, initialize("E1", 5)).await;
    assert_eq!(code, StatusCode::InvalidState);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_with_nothing_pending_is_silent() {
    let db = MemoryDatabase::new();
    let service = start_plain(&db);
    let cancel = service.execute(Command::Cancel {
        election_id: "E9".into(),
    });
    assert!(cancel.await.is_err());
    let (code, events) = run(&service, Command::EraseAll).await;
    assert_eq!(code, StatusCode::ErasedAllElections);
    assert_eq!(codes(&events), vec![(StatusCode::ErasedAllElections, None)]);
    assert_eq!(events[0].election_id, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_create_changes_nothing() {
    let db = MemoryDatabase::new();
    let service = start_plain(&db);
    let (code, _) = run(&service, create("E1", "http://first/")).await;
    assert_eq!(code, StatusCode::CreatedElection);
    let (code, events) = run(&service, create("E1", "http://second/")).await;
    assert_eq!(code, StatusCode::ElectionExists);
    assert_eq!(codes(&events), vec![(StatusCode::ElectionExists, None)]);
    let record = db.session().unwrap().election("E1").unwrap();
    assert_eq!(record.abb_url, "http://first/");
    assert_eq!(record.status, ElectionStatus::Uninitialized);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn erase_is_idempotent() {
    let db = MemoryDatabase::new();
    seed(&db, "E1", ElectionStatus::Verifying);
    let service = start_plain(&db);
    let erase = || Command::Erase {
        election_id: "E1".into(),
    };

    let (code, events) = run(&service, erase()).await;
    assert_eq!(code, StatusCode::ErasedElection);
    assert_eq!(
        codes(&events),
        vec![
            (StatusCode::ErasingElection, None),
            (StatusCode::ErasedElection, None),
        ]
    );

    let (code, events) = run(&service, erase()).await;
    assert_eq!(code, StatusCode::ErasedElection);
    assert_eq!(codes(&events), vec![(StatusCode::ErasedElection, None)]);
    assert!(!db.session().unwrap().has_election("E1").unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn verify_from_verified_only_reposts_the_stored_bundle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("0"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/post/"))
        .and(body_string("stored-bundle"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let db = MemoryDatabase::new();
    {
        let mut store = db.session().unwrap();
        let abb = format!("{}/", server.uri());
        store
            .create_election("E1", &new_election(&abb), ElectionStatus::Verified)
            .unwrap();
        store.save_bundle("E1", "stored-bundle").unwrap();
    }
    let service = start_plain(&db);

    let (code, events) = run(&service, verify("E1")).await;
    assert_eq!(code, StatusCode::CompletedElection);
    assert_eq!(codes(&events), vec![(StatusCode::CompletedElection, None)]);
    assert_eq!(status_of(&db, "E1"), ElectionStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failures_map_to_status_codes_and_keep_status() {
    let db = MemoryDatabase::new();
    seed(&db, "E1", ElectionStatus::Uninitialized);
    seed(&db, "E2", ElectionStatus::Uninitialized);
    let service = start_plain(&db);

    let missing = Command::Initialize {
        election_id: "E1".into(),
        source: DataSource::File("/definitely/not/here.jsonl".into()),
    };
    let (code, events) = run(&service, missing).await;
    assert_eq!(code, StatusCode::FileNotFound);
    assert_eq!(codes(&events), vec![(StatusCode::FileNotFound, None)]);
    assert_eq!(status_of(&db, "E1"), ElectionStatus::Uninitialized);

    let (code, events) = run(&service, verify("E1")).await;
    assert_eq!(code, StatusCode::InvalidState);
    assert_eq!(codes(&events), vec![(StatusCode::InvalidState, None)]);
    assert_eq!(status_of(&db, "E1"), ElectionStatus::Uninitialized);

    let (code, events) = run(&service, initialize("E2", 0)).await;
    assert_eq!(code, StatusCode::ParseError);
    assert_eq!(
        codes(&events),
        vec![
            (StatusCode::InitializingElection, None),
            (StatusCode::ParseError, None),
        ]
    );
    assert_eq!(status_of(&db, "E2"), ElectionStatus::Initializing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_storage_rolls_back_the_chunk() {
    let db = MemoryDatabase::new().with_capacity(150);
    seed(&db, "E1", ElectionStatus::Uninitialized);
    let service = start_plain(&db);

    let (code, _) = run(&service, initialize("E1", 250)).await;
    assert_eq!(code, StatusCode::StorageFullError);
    let mut store = db.session().unwrap();
    assert_eq!(store.ballot_count("E1").unwrap(), 0);
    assert_eq!(store.election_status("E1").unwrap(), ElectionStatus::Initializing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn storage_open_failure_creates_no_task() {
    let service = start(
        Arc::new(BrokenStore),
        None,
        Arc::new(RecordingNotifier::default()),
    );
    assert_eq!(
        service.execute(create("E1", "http://abb/")).await.unwrap(),
        StatusCode::StorageError
    );
    let event = service.recv_event_timeout(Duration::from_secs(5));
    assert_eq!(
        event,
        Some(ServiceEvent::Status(TrusteeEvent::new(
            Some("E1"),
            StatusCode::StorageError
        )))
    );
    // No job was queued, so there is nothing to report idle about.
    assert_eq!(service.recv_event_timeout(Duration::from_millis(200)), None);
}

//! Trustee engine: dispatcher, worker pools, import/verify pipelines and their collaborators.
mod crypto;
mod dispatcher;
mod events;
mod import;
mod memory_store;
mod net;
mod notify;
mod persist;
mod pool;
mod response;
mod store;
mod tasks;

pub use crypto::{
    CryptoEngine, CryptoSession, Cryptosystem, CryptosystemFactory, DigestCryptosystem,
    DigestFactory,
};
pub use dispatcher::{
    completion_channel, ServiceError, ServiceParts, TrusteeConfig, TrusteeService,
};
pub use events::{ChannelEventSink, EventSink, ServiceEvent, TrusteeEvent};
pub use import::{open_source, ImportReader, JsonLinesImportReader, ParseError};
pub use memory_store::{MemoryDatabase, MemorySession};
pub use net::{
    ballots_url, post_url, total_url, ByteStream, NetError, NetworkClient, NetworkSettings,
    ReqwestClient,
};
pub use notify::{
    next_notification_id, LogNotifier, Notification, NotificationCenter, NotificationId,
    NotificationIds, Notifier,
};
pub use persist::{ensure_data_dir, PersistError, SnapshotFile};
pub use pool::{Job, WorkerPool};
pub use response::{ResponseReader, MAX_TOKEN_LEN};
pub use store::{
    in_transaction, BallotRecord, ElectionRecord, ElectionStore, StoreError, StoreProvider,
};

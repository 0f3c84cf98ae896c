//! The service front end: one dispatcher thread (the lane) and two worker pools.
//!
//! The lane owns the cancellation registry and the idle bookkeeping. Workers report back to it
//! with messages, so neither needs a lock.

use std::collections::VecDeque;
use std::io;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use trustee_core::{
    CancellationRegistry, Command, Completion, PoolKind, Request, StatusCode, Ticket,
};
use trustee_logging::{trustee_debug, trustee_error, trustee_info, trustee_warn};

use crate::crypto::CryptoEngine;
use crate::events::{ChannelEventSink, EventSink, ServiceEvent, TrusteeEvent};
use crate::net::{NetError, NetworkClient, NetworkSettings, ReqwestClient};
use crate::notify::{LogNotifier, NotificationCenter, Notifier};
use crate::pool::{Job, WorkerPool};
use crate::store::StoreProvider;
use crate::tasks::{self, Release, TaskContext, TaskServices};

#[derive(Debug, Clone)]
pub struct TrusteeConfig {
    pub network: NetworkSettings,
    pub show_notifications: bool,
}

impl Default for TrusteeConfig {
    fn default() -> Self {
        Self {
            network: NetworkSettings::default(),
            show_notifications: true,
        }
    }
}

/// The external collaborators of a service.
pub struct ServiceParts {
    pub store: Arc<dyn StoreProvider>,
    pub network: Arc<dyn NetworkClient>,
    pub crypto: CryptoEngine,
    pub notifier: Arc<dyn Notifier>,
}

impl ServiceParts {
    /// HTTP networking, the digest accumulator and log notifications.
    pub fn new(store: Arc<dyn StoreProvider>, config: &TrusteeConfig) -> Result<Self, NetError> {
        Ok(Self {
            store,
            network: Arc::new(ReqwestClient::new(config.network.clone())?),
            crypto: CryptoEngine::default(),
            notifier: Arc::new(LogNotifier),
        })
    }

    pub fn with_network(mut self, network: Arc<dyn NetworkClient>) -> Self {
        self.network = network;
        self
    }

    pub fn with_crypto(mut self, crypto: CryptoEngine) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("cannot start service thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Creates a completion whose status code can be awaited (or `blocking_recv`ed).
pub fn completion_channel() -> (Completion, oneshot::Receiver<StatusCode>) {
    let (tx, rx) = oneshot::channel();
    let completion = Completion::new(move |code| {
        let _ = tx.send(code);
    });
    (completion, rx)
}

enum LaneMessage {
    Submit(Request),
    TaskFinished { election_id: String, ticket: Ticket },
    JobDone,
    Shutdown,
}

pub struct TrusteeService {
    lane_tx: mpsc::Sender<LaneMessage>,
    event_rx: mpsc::Receiver<ServiceEvent>,
    services: Arc<TaskServices>,
    lane: Option<JoinHandle<()>>,
}

impl TrusteeService {
    pub fn start(config: TrusteeConfig, parts: ServiceParts) -> Result<Self, ServiceError> {
        let (lane_tx, lane_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let events: Arc<dyn EventSink> = Arc::new(ChannelEventSink::new(event_tx));
        let services = Arc::new(TaskServices {
            network: parts.network,
            crypto: parts.crypto,
            notifications: NotificationCenter::new(parts.notifier, config.show_notifications),
            events,
        });

        let light = spawn_pool("light", &lane_tx)?;
        let heavy = spawn_pool("heavy", &lane_tx)?;
        let mut lane = Lane {
            store: parts.store,
            services: services.clone(),
            light,
            heavy,
            registry: CancellationRegistry::new(),
            started: VecDeque::new(),
            last_started: 0,
            next_start: 1,
            lane_tx: lane_tx.clone(),
        };
        let handle = thread::Builder::new()
            .name("trustee-dispatch".into())
            .spawn(move || {
                trustee_logging::set_lane_label("dispatch");
                lane.run(lane_rx);
            })?;

        Ok(Self {
            lane_tx,
            event_rx,
            services,
            lane: Some(handle),
        })
    }

    /// Queues a command. Never blocks.
    pub fn submit(&self, request: Request) {
        if let Err(mpsc::SendError(LaneMessage::Submit(request))) =
            self.lane_tx.send(LaneMessage::Submit(request))
        {
            trustee_warn!("Service is shut down; dropping {:?}", request.command.kind());
        }
    }

    /// Queues a command and returns a receiver for its terminal status code.
    pub fn execute(&self, command: Command) -> oneshot::Receiver<StatusCode> {
        let (completion, rx) = completion_channel();
        self.submit(Request::with_completion(command, completion));
        rx
    }

    pub fn try_recv_event(&self) -> Option<ServiceEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<ServiceEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    pub fn set_show_notifications(&self, shown: bool) {
        self.services.notifications.set_shown(shown);
    }

    /// Stops accepting commands, drains both pools and joins every thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(lane) = self.lane.take() {
            let _ = self.lane_tx.send(LaneMessage::Shutdown);
            if lane.join().is_err() {
                trustee_error!("Dispatcher thread panicked");
            }
        }
    }
}

impl Drop for TrusteeService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_pool(lane: &'static str, lane_tx: &mpsc::Sender<LaneMessage>) -> io::Result<WorkerPool> {
    let done_tx = lane_tx.clone();
    WorkerPool::spawn(lane, lane, move || {
        let _ = done_tx.send(LaneMessage::JobDone);
    })
}

struct Lane {
    store: Arc<dyn StoreProvider>,
    services: Arc<TaskServices>,
    light: WorkerPool,
    heavy: WorkerPool,
    registry: CancellationRegistry<CancellationToken>,
    /// Start ids of queued or running jobs, oldest first.
    started: VecDeque<u64>,
    last_started: u64,
    next_start: u64,
    lane_tx: mpsc::Sender<LaneMessage>,
}

impl Lane {
    fn run(&mut self, rx: mpsc::Receiver<LaneMessage>) {
        while let Ok(message) = rx.recv() {
            match message {
                LaneMessage::Submit(request) => self.dispatch(request),
                LaneMessage::TaskFinished {
                    election_id,
                    ticket,
                } => {
                    self.registry.finish(&election_id, ticket);
                }
                LaneMessage::JobDone => self.job_done(),
                LaneMessage::Shutdown => break,
            }
        }
        trustee_info!("Shutting down; draining worker queues");
        self.light.shutdown();
        self.heavy.shutdown();
    }

    fn emit(&self, election_id: Option<&str>, status: StatusCode) {
        self.services
            .events
            .emit(ServiceEvent::Status(TrusteeEvent::new(election_id, status)));
    }

    fn dispatch(&mut self, mut request: Request) {
        let kind = request.command.kind();
        let election_id = request.command.election_id().map(str::to_owned);
        trustee_debug!("Dispatching {:?} for {:?}", kind, election_id);

        let store = match self.store.open() {
            Ok(store) => store,
            Err(err) => {
                trustee_error!("Cannot open election store: {}", err);
                self.emit(election_id.as_deref(), StatusCode::StorageError);
                request.complete(StatusCode::StorageError);
                return;
            }
        };

        if let Command::Cancel { election_id } = &request.command {
            self.dispatch_cancel(election_id.clone(), request);
            return;
        }

        let token = CancellationToken::new();
        let mut ticket = None;
        if kind.is_cancellable() {
            let id = election_id.clone().unwrap_or_default();
            match self.registry.register(&id, token.clone()) {
                Some(registered) => ticket = Some(registered),
                None => {
                    trustee_warn!("{:?} of {} rejected: another operation is pending", kind, id);
                    self.emit(Some(id.as_str()), StatusCode::OperationPending);
                    request.complete(StatusCode::OperationPending);
                    return;
                }
            }
        }

        // Sent before the completion fires, so the lane sees it ahead of any follow-up command.
        let release = match (election_id.clone(), ticket) {
            (Some(election_id), Some(ticket)) => {
                let lane_tx = self.lane_tx.clone();
                let release: Release = Box::new(move || {
                    let _ = lane_tx.send(LaneMessage::TaskFinished {
                        election_id,
                        ticket,
                    });
                });
                Some(release)
            }
            _ => None,
        };
        let Request {
            command,
            completion,
        } = request;
        let ctx = TaskContext::new(
            election_id,
            store,
            self.services.clone(),
            token,
            release,
            completion,
        );
        let job: Job = Box::new(move || tasks::run(ctx, command).boxed_local());
        self.enqueue(kind.pool(), job);
    }

    /// Trips the pending entry right here, so a queued job is skipped as soon as it is dequeued.
    fn dispatch_cancel(&mut self, election_id: String, mut request: Request) {
        let Some(entry) = self.registry.cancel(&election_id) else {
            trustee_debug!("Nothing to cancel for {}", election_id);
            return;
        };
        trustee_info!("Cancelling pending operation of {}", election_id);
        entry.handle.cancel();
        let services = self.services.clone();
        let job: Job = Box::new(move || {
            async move {
                services
                    .events
                    .emit(ServiceEvent::Status(TrusteeEvent::new(
                        Some(election_id.as_str()),
                        StatusCode::CancelledOperation,
                    )));
                request.complete(StatusCode::CancelledOperation);
            }
            .boxed_local()
        });
        self.enqueue(PoolKind::Light, job);
    }

    fn enqueue(&mut self, pool: PoolKind, job: Job) {
        let start = self.next_start;
        self.next_start += 1;
        self.started.push_back(start);
        self.last_started = start;
        let pool = match pool {
            PoolKind::Light => &self.light,
            PoolKind::Heavy => &self.heavy,
        };
        if pool.submit(job).is_err() {
            trustee_error!("Worker pool is gone; dropping job");
            self.job_done();
        }
    }

    /// A job finished. Once the oldest outstanding start is the newest one, all work is done.
    fn job_done(&mut self) {
        let Some(start) = self.started.pop_front() else {
            return;
        };
        if start == self.last_started {
            trustee_debug!("All work done");
            self.services.events.emit(ServiceEvent::Idle);
        }
    }
}

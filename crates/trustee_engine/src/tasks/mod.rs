//! One async function per command kind, all sharing a [`TaskContext`].
//!
//! A task reports its own progress and success events. Failures are returned and classified
//! once, at the task boundary in [`run`].

mod create;
mod erase;
mod initialize;
mod verify;

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use trustee_core::{Command, Completion, Fault, StatusCode, TransitionError};
use trustee_logging::{trustee_error, trustee_info, trustee_warn};

use crate::crypto::CryptoEngine;
use crate::events::{EventSink, ServiceEvent, TrusteeEvent};
use crate::import::ParseError;
use crate::net::{NetError, NetworkClient};
use crate::notify::{Notification, NotificationCenter, NotificationIds};
use crate::store::{ElectionStore, StoreError};

#[derive(Debug, Error)]
pub(crate) enum TaskError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Net(#[from] NetError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Fault(#[from] Fault),
    #[error("cancelled")]
    Cancelled,
}

impl From<TaskError> for Fault {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Store(err) => err.into(),
            TaskError::Parse(err) => err.into(),
            TaskError::Net(err) => err.into(),
            TaskError::Transition(err) => Fault::InvalidState(err.from),
            TaskError::Fault(fault) => fault,
            TaskError::Cancelled => Fault::Cancelled,
        }
    }
}

fn open_failed(source: String, err: io::Error) -> TaskError {
    let fault = match err.kind() {
        io::ErrorKind::NotFound => Fault::FileNotFound(source),
        _ => Fault::Io(format!("{source}: {err}")),
    };
    TaskError::Fault(fault)
}

/// Collaborators shared by every task of one service.
pub(crate) struct TaskServices {
    pub network: Arc<dyn NetworkClient>,
    pub crypto: CryptoEngine,
    pub notifications: NotificationCenter,
    pub events: Arc<dyn EventSink>,
}

/// Hands the task's registry entry back to the dispatcher.
pub(crate) type Release = Box<dyn FnOnce() + Send>;

pub(crate) struct TaskContext {
    election_id: Option<String>,
    store: Box<dyn ElectionStore>,
    services: Arc<TaskServices>,
    cancel: CancellationToken,
    release: Option<Release>,
    completion: Option<Completion>,
    ids: NotificationIds,
}

impl TaskContext {
    pub fn new(
        election_id: Option<String>,
        store: Box<dyn ElectionStore>,
        services: Arc<TaskServices>,
        cancel: CancellationToken,
        release: Option<Release>,
        completion: Option<Completion>,
    ) -> Self {
        Self {
            election_id,
            store,
            services,
            cancel,
            release,
            completion,
            ids: NotificationIds::allocate(),
        }
    }

    fn election_id(&self) -> Option<&str> {
        self.election_id.as_deref()
    }

    fn emit(&self, status: StatusCode) {
        self.emit_event(TrusteeEvent::new(self.election_id(), status));
    }

    fn emit_progress(&self, status: StatusCode, progress: u64) {
        self.emit_event(TrusteeEvent::new(self.election_id(), status).with_progress(progress));
    }

    fn emit_event(&self, event: TrusteeEvent) {
        self.services.events.emit(ServiceEvent::Status(event));
    }

    fn notify(&self, notification: Notification) {
        self.services
            .notifications
            .show(self.election_id(), self.ids.normal, &notification);
    }

    fn notify_progress(&self, notification: Notification) {
        self.services
            .notifications
            .show(self.election_id(), self.ids.ongoing, &notification);
    }

    fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    /// The registry entry is released first, so a caller reacting to the completion never
    /// finds its election still pending.
    fn complete(&mut self, code: StatusCode) {
        self.release();
        if let Some(completion) = self.completion.take() {
            completion.complete(code);
        }
    }

    /// Completes the command, then broadcasts `code` as the last event of the task.
    fn succeed(&mut self, code: StatusCode) {
        self.complete(code);
        self.emit(code);
    }

    /// Classifies a failure at the task boundary.
    fn fail(&mut self, operation: &'static str, err: TaskError) {
        self.services.notifications.dismiss(self.ids.ongoing);
        let fault = Fault::from(err);
        let code = fault.status_code();
        match &fault {
            Fault::Cancelled => {
                // The cancel command already broadcast CancelledOperation.
                trustee_info!("{} of {:?} cancelled", operation, self.election_id);
                self.complete(code);
                return;
            }
            Fault::ElectionAlreadyExists => {
                trustee_info!("{:?} already exists", self.election_id);
            }
            Fault::InvalidState(status) => {
                trustee_error!(
                    "Cannot {} {:?} in state {}",
                    operation,
                    self.election_id,
                    status
                );
                self.notify(Notification::Error {
                    operation,
                    reason: fault.reason(),
                });
            }
            other => {
                trustee_warn!("{} of {:?} failed: {}", operation, self.election_id, other);
                self.notify(Notification::Error {
                    operation,
                    reason: fault.reason(),
                });
            }
        }
        self.complete(code);
        self.emit(code);
    }
}

/// Ends the open transaction, committing only if `result` is `Ok`.
fn finish_chunk<T>(
    store: &mut dyn ElectionStore,
    result: Result<T, TaskError>,
) -> Result<T, TaskError> {
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

/// Runs `command` to completion. Never fails: every outcome is reported through events and the
/// completion channel.
pub(crate) async fn run(mut ctx: TaskContext, command: Command) {
    if ctx.cancel.is_cancelled() {
        trustee_info!("Skipping cancelled {:?} of {:?}", command.kind(), ctx.election_id);
        ctx.complete(StatusCode::CancelledOperation);
        ctx.store.close();
        return;
    }
    let (operation, result) = match command {
        Command::Create { election_id, election } => (
            "create",
            create::create(&mut ctx, &election_id, &election).await,
        ),
        Command::Initialize { election_id, source } => (
            "initialize",
            initialize::initialize(&mut ctx, &election_id, source).await,
        ),
        Command::Verify { election_id } => {
            ("verify", verify::verify(&mut ctx, &election_id).await)
        }
        Command::Erase { election_id } => ("erase", erase::erase(&mut ctx, &election_id).await),
        Command::EraseAll => ("erase all", erase::erase_all(&mut ctx).await),
        Command::Cancel { .. } => {
            trustee_warn!("Cancel commands are handled by the dispatcher");
            ctx.release();
            ctx.store.close();
            return;
        }
    };
    if let Err(err) = result {
        ctx.fail(operation, err);
    }
    ctx.release();
    ctx.store.close();
}

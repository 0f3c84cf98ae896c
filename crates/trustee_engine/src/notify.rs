use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use trustee_logging::{trustee_info, trustee_warn};

pub type NotificationId = u32;

static NEXT_NOTIFICATION_ID: AtomicU32 = AtomicU32::new(1);

/// Process-wide, never zero.
pub fn next_notification_id() -> NotificationId {
    NEXT_NOTIFICATION_ID.fetch_add(1, Ordering::Relaxed)
}

/// The two notification slots a task owns: its final message and its progress indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationIds {
    pub normal: NotificationId,
    pub ongoing: NotificationId,
}

impl NotificationIds {
    pub fn allocate() -> Self {
        Self {
            normal: next_notification_id(),
            ongoing: next_notification_id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    OngoingImport { count: u64 },
    OngoingVerify { count: u64, total: u64 },
    Imported { count: u64 },
    Verified { count: u64 },
    Error {
        operation: &'static str,
        reason: &'static str,
    },
}

impl Notification {
    pub fn is_ongoing(&self) -> bool {
        matches!(
            self,
            Notification::OngoingImport { .. } | Notification::OngoingVerify { .. }
        )
    }
}

pub trait Notifier: Send + Sync {
    fn show(&self, election_id: Option<&str>, id: NotificationId, notification: &Notification);
    fn dismiss(&self, id: NotificationId);
}

/// Renders notifications as log lines.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show(&self, election_id: Option<&str>, id: NotificationId, notification: &Notification) {
        let election = election_id.unwrap_or("*");
        match notification {
            Notification::OngoingImport { count } => {
                trustee_info!("#{id} {election}: importing, {count} ballots so far")
            }
            Notification::OngoingVerify { count, total } => {
                trustee_info!("#{id} {election}: verifying, {count} of {total} ballots")
            }
            Notification::Imported { count } => {
                trustee_info!("#{id} {election}: imported {count} ballots")
            }
            Notification::Verified { count } => {
                trustee_info!("#{id} {election}: verified {count} ballots")
            }
            Notification::Error { operation, reason } => {
                trustee_warn!("#{id} {election}: {operation} failed. {reason}")
            }
        }
    }

    fn dismiss(&self, _id: NotificationId) {}
}

/// Applies the show-notifications toggle in front of a [`Notifier`].
/// Progress indicators are always shown.
pub struct NotificationCenter {
    notifier: Arc<dyn Notifier>,
    shown: AtomicBool,
}

impl NotificationCenter {
    pub fn new(notifier: Arc<dyn Notifier>, shown: bool) -> Self {
        Self {
            notifier,
            shown: AtomicBool::new(shown),
        }
    }

    pub fn set_shown(&self, shown: bool) {
        self.shown.store(shown, Ordering::Relaxed);
    }

    pub fn is_shown(&self) -> bool {
        self.shown.load(Ordering::Relaxed)
    }

    pub fn show(&self, election_id: Option<&str>, id: NotificationId, notification: &Notification) {
        if notification.is_ongoing() || self.is_shown() {
            self.notifier.show(election_id, id, notification);
        }
    }

    pub fn dismiss(&self, id: NotificationId) {
        self.notifier.dismiss(id);
    }
}

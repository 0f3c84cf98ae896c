use std::fmt;
use std::sync::mpsc;

use trustee_core::StatusCode;

/// A status broadcast for one election (or for all of them, after an erase-all).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrusteeEvent {
    pub election_id: Option<String>,
    pub status: StatusCode,
    /// Cumulative count for import progress, percentage for verify progress.
    pub progress: Option<u64>,
}

impl TrusteeEvent {
    pub fn new(election_id: Option<&str>, status: StatusCode) -> Self {
        Self {
            election_id: election_id.map(str::to_owned),
            status,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: u64) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl fmt::Display for TrusteeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let election = self.election_id.as_deref().unwrap_or("*");
        write!(f, "{election}: {} ({})", self.status, self.status.value())?;
        if let Some(progress) = self.progress {
            write!(f, " progress={progress}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    Status(TrusteeEvent),
    /// Every submitted command has finished and nothing newer has arrived.
    Idle,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ServiceEvent);
}

pub struct ChannelEventSink {
    tx: mpsc::Sender<ServiceEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::Sender<ServiceEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: ServiceEvent) {
        // Best effort: nobody listening is not an error.
        let _ = self.tx.send(event);
    }
}

use std::fmt;
use std::path::PathBuf;

use crate::StatusCode;

/// Where the initialization data for an election comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// A file on local storage.
    File(PathBuf),
    /// Data already held in memory.
    Bytes(Vec<u8>),
}

/// Immutable attributes of a new election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewElection {
    pub question: String,
    /// Milliseconds since the Unix epoch.
    pub start_time: i64,
    /// Milliseconds since the Unix epoch.
    pub end_time: i64,
    pub abb_url: String,
}

/// A request to the trustee service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a new election; it starts uninitialized.
    Create {
        election_id: String,
        election: NewElection,
    },
    /// Import the ballot data of an election. Cancellable.
    Initialize {
        election_id: String,
        source: DataSource,
    },
    /// Verify an election against its ABB and post the bundle. Cancellable.
    Verify { election_id: String },
    /// Erase an election and all its ballots.
    Erase { election_id: String },
    /// Erase everything.
    EraseAll,
    /// Cancel the pending initialize/verify of an election.
    Cancel { election_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Create,
    Initialize,
    Verify,
    Erase,
    EraseAll,
    Cancel,
}

/// The worker pool a command runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Quick commands that must never queue behind a long import or verification.
    Light,
    /// Long-running commands. Exactly one runs at a time.
    Heavy,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Create { .. } => CommandKind::Create,
            Command::Initialize { .. } => CommandKind::Initialize,
            Command::Verify { .. } => CommandKind::Verify,
            Command::Erase { .. } => CommandKind::Erase,
            Command::EraseAll => CommandKind::EraseAll,
            Command::Cancel { .. } => CommandKind::Cancel,
        }
    }

    pub fn election_id(&self) -> Option<&str> {
        match self {
            Command::Create { election_id, .. }
            | Command::Initialize { election_id, .. }
            | Command::Verify { election_id }
            | Command::Erase { election_id }
            | Command::Cancel { election_id } => Some(election_id),
            Command::EraseAll => None,
        }
    }
}

impl CommandKind {
    pub fn pool(self) -> PoolKind {
        match self {
            CommandKind::Create | CommandKind::Cancel => PoolKind::Light,
            CommandKind::Initialize
            | CommandKind::Verify
            | CommandKind::Erase
            | CommandKind::EraseAll => PoolKind::Heavy,
        }
    }

    /// Only these commands get a pending entry and can be cancelled.
    pub fn is_cancellable(self) -> bool {
        matches!(self, CommandKind::Initialize | CommandKind::Verify)
    }
}

/// One-shot callback that receives the terminal status code of a command.
pub struct Completion(Box<dyn FnOnce(StatusCode) + Send>);

impl Completion {
    pub fn new(f: impl FnOnce(StatusCode) + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn complete(self, code: StatusCode) {
        (self.0)(code)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion")
    }
}

/// A command together with its optional completion channel.
#[derive(Debug)]
pub struct Request {
    pub command: Command,
    pub completion: Option<Completion>,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            completion: None,
        }
    }

    pub fn with_completion(command: Command, completion: Completion) -> Self {
        Self {
            command,
            completion: Some(completion),
        }
    }

    /// Completes the request if anyone is waiting for it.
    pub fn complete(&mut self, code: StatusCode) {
        if let Some(completion) = self.completion.take() {
            completion.complete(code);
        }
    }
}

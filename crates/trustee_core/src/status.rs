use std::fmt;

/// Persisted lifecycle state of an election.
///
/// The integer encodings are what the store persists; they must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElectionStatus {
    /// Created, but no ballot data imported yet.
    Uninitialized,
    /// An import is in progress, or a previous import was interrupted.
    Initializing,
    /// Ballot data fully imported; ready for verification.
    Initialized,
    /// A verification is in progress, or a previous one was interrupted.
    Verifying,
    /// The bundle is computed and stored but not yet posted to the ABB.
    Verified,
    /// Reserved for a future publishing stage. Never entered.
    Publishing,
    /// The bundle has been posted; nothing left to do.
    Completed,
    /// The election is being erased.
    Erasing,
}

impl ElectionStatus {
    pub const ALL: [ElectionStatus; 8] = [
        ElectionStatus::Uninitialized,
        ElectionStatus::Initializing,
        ElectionStatus::Initialized,
        ElectionStatus::Verifying,
        ElectionStatus::Verified,
        ElectionStatus::Publishing,
        ElectionStatus::Completed,
        ElectionStatus::Erasing,
    ];

    pub fn value(self) -> i32 {
        match self {
            ElectionStatus::Uninitialized => 0,
            ElectionStatus::Initializing => 1,
            ElectionStatus::Initialized => 2,
            ElectionStatus::Verifying => 3,
            ElectionStatus::Verified => 4,
            ElectionStatus::Publishing => 5,
            ElectionStatus::Completed => 6,
            ElectionStatus::Erasing => 7,
        }
    }

    pub fn from_value(value: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.value() == value)
    }

    /// True while a heavy task owns the election (or crashed while owning it).
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            ElectionStatus::Initializing | ElectionStatus::Verifying | ElectionStatus::Erasing
        )
    }
}

impl fmt::Display for ElectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionStatus::Uninitialized => write!(f, "uninitialized"),
            ElectionStatus::Initializing => write!(f, "initializing"),
            ElectionStatus::Initialized => write!(f, "initialized"),
            ElectionStatus::Verifying => write!(f, "verifying"),
            ElectionStatus::Verified => write!(f, "verified"),
            ElectionStatus::Publishing => write!(f, "publishing"),
            ElectionStatus::Completed => write!(f, "completed"),
            ElectionStatus::Erasing => write!(f, "erasing"),
        }
    }
}

/// Code broadcast to observers for every status change, progress report and fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    CreatedElection,
    InitializingElection,
    InitializingProgress,
    InitializedElection,
    VerifyingElection,
    VerifyingProgress,
    VerifiedElection,
    CompletedElection,
    ErasingElection,
    ErasedElection,
    ErasedAllElections,
    CancelledOperation,
    ElectionExists,
    FileNotFound,
    IoError,
    ParseError,
    StorageError,
    StorageFullError,
    InvalidUrl,
    SocketTimeout,
    InvalidState,
    OperationPending,
}

impl StatusCode {
    pub fn value(self) -> u32 {
        match self {
            StatusCode::CreatedElection => 0,
            StatusCode::InitializingElection => 10,
            StatusCode::InitializingProgress => 20,
            StatusCode::InitializedElection => 30,
            StatusCode::VerifyingElection => 40,
            StatusCode::VerifyingProgress => 50,
            StatusCode::VerifiedElection => 60,
            StatusCode::CompletedElection => 70,
            StatusCode::ErasingElection => 80,
            StatusCode::ErasedElection => 90,
            StatusCode::ErasedAllElections => 100,
            StatusCode::CancelledOperation => 110,
            StatusCode::ElectionExists => 120,
            StatusCode::FileNotFound => 130,
            StatusCode::IoError => 140,
            StatusCode::ParseError => 150,
            StatusCode::StorageError => 160,
            StatusCode::StorageFullError => 170,
            StatusCode::InvalidUrl => 180,
            StatusCode::SocketTimeout => 190,
            StatusCode::InvalidState => 200,
            StatusCode::OperationPending => 210,
        }
    }

    pub fn is_error(self) -> bool {
        self.value() >= StatusCode::ElectionExists.value()
    }

    pub fn is_progress(self) -> bool {
        matches!(
            self,
            StatusCode::InitializingProgress | StatusCode::VerifyingProgress
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.value())
    }
}

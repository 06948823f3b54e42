//! Error taxonomy of the update engine.
//!
//! Failures are grouped by what the caller can do about them: try again later
//! (network), refuse the artifact (structural, integrity), inspect the device
//! (storage), or fix the call sequence (state). Every fallible operation
//! returns [`UpdateError`]; the inner category enums convert with `From` so
//! `?` works at the seams.

/// Transport-level failures while talking to a distribution endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// No network connectivity, or the endpoint could not be reached.
    Unreachable,
    /// The operation ran over its allotted time.
    Timeout,
    /// The endpoint answered with a non-success status.
    BadStatus,
    /// The endpoint answered with an empty body.
    Empty,
    /// The stream ended before the announced length was received.
    Incomplete,
}

/// The artifact or manifest is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralError {
    /// The image does not start with the application descriptor magic.
    BadMagic,
    /// The image ended before the descriptor was complete.
    Truncated,
    /// The manifest document could not be parsed.
    BadManifest,
}

/// The artifact failed cryptographic verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityError {
    /// The flashed image digest does not match the manifest digest.
    DigestMismatch,
}

/// Local flash or persistence failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    Read,
    Write,
    Erase,
    /// The boot pointer could not be updated.
    Activate,
    /// The persisted update record could not be read or written.
    Persist,
    /// The partition table does not provide a standby slot.
    NoUpdateSlot,
}

/// The call does not fit the current session state. Returned immediately,
/// before any side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    /// An update session is already running.
    AlreadyInProgress,
    /// No session is in a state the call applies to.
    NotInProgress,
    /// The running image is not awaiting validation.
    NotPendingVerify,
    /// Not enough free memory to run an update safely.
    LowMemory,
}

/// Top-level error of every update-engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    Network(NetworkError),
    Structural(StructuralError),
    Integrity(IntegrityError),
    Storage(StorageError),
    State(StateError),
}

impl UpdateError {
    /// Short stable description for log lines and operator consoles.
    pub const fn as_str(self) -> &'static str {
        match self {
            UpdateError::Network(NetworkError::Unreachable) => "network unreachable",
            UpdateError::Network(NetworkError::Timeout) => "operation timed out",
            UpdateError::Network(NetworkError::BadStatus) => "bad response status",
            UpdateError::Network(NetworkError::Empty) => "empty response",
            UpdateError::Network(NetworkError::Incomplete) => "transfer incomplete",
            UpdateError::Structural(StructuralError::BadMagic) => "invalid image header",
            UpdateError::Structural(StructuralError::Truncated) => "image truncated",
            UpdateError::Structural(StructuralError::BadManifest) => "invalid manifest",
            UpdateError::Integrity(IntegrityError::DigestMismatch) => "digest mismatch",
            UpdateError::Storage(StorageError::Read) => "flash read failed",
            UpdateError::Storage(StorageError::Write) => "flash write failed",
            UpdateError::Storage(StorageError::Erase) => "flash erase failed",
            UpdateError::Storage(StorageError::Activate) => "boot pointer update failed",
            UpdateError::Storage(StorageError::Persist) => "record store failed",
            UpdateError::Storage(StorageError::NoUpdateSlot) => "no update slot",
            UpdateError::State(StateError::AlreadyInProgress) => "update already in progress",
            UpdateError::State(StateError::NotInProgress) => "no update in progress",
            UpdateError::State(StateError::NotPendingVerify) => "not awaiting validation",
            UpdateError::State(StateError::LowMemory) => "not enough free memory",
        }
    }
}

impl From<NetworkError> for UpdateError {
    fn from(value: NetworkError) -> Self {
        UpdateError::Network(value)
    }
}

impl From<StructuralError> for UpdateError {
    fn from(value: StructuralError) -> Self {
        UpdateError::Structural(value)
    }
}

impl From<IntegrityError> for UpdateError {
    fn from(value: IntegrityError) -> Self {
        UpdateError::Integrity(value)
    }
}

impl From<StorageError> for UpdateError {
    fn from(value: StorageError) -> Self {
        UpdateError::Storage(value)
    }
}

impl From<StateError> for UpdateError {
    fn from(value: StateError) -> Self {
        UpdateError::State(value)
    }
}

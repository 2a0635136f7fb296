use thiserror::Error;

/// The supervisor-wide error taxonomy. Reservation and validation errors are
/// surfaced to callers verbatim; exhaustion variants carry the requested and
/// available counts so replies can report them.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Invalid Config: {0}")]
    ConfigInvalid(String),

    #[error("The ID ({0}) is in use.")]
    IdInUse(String),

    #[error("No free containers to reserve.")]
    SlotsExhausted,

    #[error("Not enough CPU Shares to reserve. ({requested} requested, {available} available)")]
    CpuExhausted { requested: u32, available: u32 },

    #[error("Not enough Memory to reserve. ({requested} requested, {available} available)")]
    MemoryExhausted { requested: u32, available: u32 },

    #[error("Unknown Container: {0}")]
    UnknownContainer(String),

    #[error("IP Group {0} does not exist")]
    UnknownGroup(String),

    #[error("Container {0} already has network security set up")]
    AlreadyRegistered(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Network security error: {0}")]
    Netsec(String),

    #[error("Could not bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Supervisor is under maintenance")]
    Maintenance,

    #[error("Invalid Manifest: {0}")]
    ManifestInvalid(String),

    #[error("Check timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

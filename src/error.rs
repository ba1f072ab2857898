use thiserror::Error;

/// Problems with a protocol table. Always raised before a test begins.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("protocol table has no levels")]
    Empty,

    #[error("level {level} has zero shuttles")]
    ZeroShuttles { level: u32 },

    #[error("level {level} has an invalid shuttle duration of {secs}s")]
    InvalidDuration { level: u32, secs: f64 },

    #[error("level {level} has an invalid speed of {kmh} km/h")]
    InvalidSpeed { level: u32, kmh: f64 },

    #[error("levels must be contiguous: expected level {expected}, found {found}")]
    NonContiguous { expected: u32, found: u32 },

    #[error("level numbers run past {0}")]
    LevelOverflow(u32),

    #[error("no built-in protocol named '{name}' (available: {available})")]
    UnknownBuiltin { name: String, available: String },

    #[error("unable to parse protocol table: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unable to read protocol table: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal configuration errors raised when a session is created.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("a session needs at least one participant")]
    EmptyRoster,

    #[error("participant '{0}' appears more than once in the roster")]
    DuplicateParticipant(String),
}

/// A roster entry that could not be understood.
#[derive(Debug, Error, PartialEq)]
pub enum RosterError {
    #[error("expected NAME:GENDER:AGE[:ASSESSOR], got '{0}'")]
    Format(String),

    #[error("unknown gender '{0}' (use m/male or f/female)")]
    Gender(String),

    #[error("invalid age '{0}'")]
    Age(String),
}

/// Failures of the report persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("report database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("unable to encode report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unable to write csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("report store io error: {0}")]
    Io(#[from] std::io::Error),
}

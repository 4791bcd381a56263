//! Error types for the keyspace core.

use thiserror::Error;

use edis_store::StoreError;

/// Errors produced while executing a command.
///
/// `NotFound` and `Found` are internal control-flow signals: the dispatch
/// layer translates them (park / empty reply / `false`) and they must never
/// reach a client as errors.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The operation's expected type mismatches the stored type, or the
    /// stored record failed to decode (corruption is reported, never
    /// auto-deleted).
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// A string value could not be parsed as a signed integer, or the
    /// arithmetic result left the integer range.
    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    /// A string value could not be parsed as a float.
    #[error("ERR value is not a valid float")]
    NotFloat,

    /// LSET or RENAME addressed a missing key.
    #[error("ERR no such key")]
    NoSuchKey,

    /// Index or bit offset outside the allowed bounds.
    #[error("ERR index out of range")]
    OutOfRange,

    /// The KEYS pattern failed to compile.
    #[error("ERR invalid pattern")]
    BadPattern,

    /// Unknown or malformed command. Fatal to this request only.
    #[error("ERR unknown or malformed command '{0}'")]
    UnexpectedRequest(String),

    /// The notification bus rejected the command before execution.
    #[error("ERR notification failed")]
    NotifyFailed,

    /// Internal: a non-blocking try found nothing to pop.
    #[error("not found")]
    NotFound,

    /// Internal: a MOVE destination already holds the key.
    #[error("found")]
    Found,

    /// Propagated from the storage engine.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl CommandError {
    /// Whether this error is an internal signal that must not leave the actor.
    pub fn is_internal(&self) -> bool {
        matches!(self, CommandError::NotFound | CommandError::Found)
    }
}

/// Errors returned by the client-side shard handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShardError {
    /// The shard actor is no longer running (channel closed).
    #[error("shard unavailable")]
    Unavailable,

    /// The reply wait exceeded the caller's deadline. The actor may still
    /// complete the command and update state.
    #[error("timed out waiting for shard reply")]
    Timeout,
}

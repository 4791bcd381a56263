//! edis-core: the keyspace actor engine.
//!
//! Owns the typed value model, per-command read-modify-write semantics,
//! expiration, blocking list operations, and the actor fabric that
//! serializes everything per shard. Storage is an ordered KV store behind
//! the `edis-store` trait; each shard's records round-trip through it as
//! self-describing blobs.

pub mod command;
pub mod engine;
pub mod error;
pub mod item;
pub mod keyspace;
pub mod notify;
pub mod shard;
pub mod time;
pub mod types;

pub use command::{Command, Reply};
pub use engine::{Engine, EngineConfig};
pub use error::{CommandError, ShardError};
pub use item::{Item, ItemEncoding, ItemType, Value};
pub use keyspace::Keyspace;
pub use notify::{BroadcastNotifier, NoopNotifier, Notifier, NotifyError};
pub use shard::{spawn_shard, CommandResult, Router, ShardHandle, ShardRequest};

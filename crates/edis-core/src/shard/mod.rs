//! Shard: one keyspace actor.
//!
//! Each actor is a single tokio task that exclusively owns one store. All
//! commands execute serially — no locks, no internal parallelism. Requests
//! arrive on a bounded mpsc channel, each carrying a oneshot reply sender;
//! the caller's timeout wraps only the reply wait, never execution.
//!
//! Blocking list commands never park the actor: a caller that cannot be
//! served keeps its reply sender stored in the [`blocking`] registry and
//! the actor moves on. After waking from `select!` the loop drains the
//! channel with `try_recv()` to amortize scheduler wake-ups across bursts.

mod blocking;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use smallvec::SmallVec;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use edis_store::OrderedStore;

use crate::command::{bound_arg, float_arg, int_arg, Command, Reply};
use crate::error::{CommandError, ShardError};
use crate::item::Item;
use crate::keyspace::{format_float, Keyspace, SetOp};
use crate::notify::Notifier;
use crate::time;
use crate::types::sorted_set::Aggregate;

use blocking::{BlockedOps, RetryOp};

/// How often the actor sweeps deadline-elapsed waiters.
const SWEEP_TICK: Duration = Duration::from_millis(100);

/// The semantic outcome of one command.
pub type CommandResult = Result<Reply, CommandError>;

/// A request delivered to a shard actor.
#[derive(Debug)]
pub enum ShardRequest {
    /// A client command.
    Command(Command),
    /// A grouped batch replayed in order; one reply slot per command.
    Exec(Vec<Command>),
    /// MOVE's internal receive leg: store the record unless the slot is
    /// occupied.
    Receive { item: Item },
}

/// A request bundled with its reply channel.
#[derive(Debug)]
struct ShardMessage {
    request: ShardRequest,
    reply: oneshot::Sender<CommandResult>,
}

/// A cloneable handle for addressing one shard actor.
#[derive(Debug, Clone)]
pub struct ShardHandle {
    tx: mpsc::Sender<ShardMessage>,
}

impl ShardHandle {
    /// Runs one command, waiting at most `timeout` for the reply.
    ///
    /// A timeout rejects only the reply wait — the actor may still
    /// complete the command and update state.
    pub async fn run(
        &self,
        command: Command,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, ShardError> {
        self.send(ShardRequest::Command(command), timeout).await
    }

    /// Runs a grouped batch atomically within the actor. Each slot carries
    /// its own status; a command that would block records `Nil`.
    pub async fn exec(
        &self,
        commands: Vec<Command>,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, ShardError> {
        self.send(ShardRequest::Exec(commands), timeout).await
    }

    /// MOVE's internal receive leg.
    pub(crate) async fn receive(&self, item: Item) -> Result<CommandResult, ShardError> {
        self.send(ShardRequest::Receive { item }, None).await
    }

    async fn send(
        &self,
        request: ShardRequest,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, ShardError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ShardMessage {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ShardError::Unavailable)?;

        match timeout {
            Some(limit) => tokio::time::timeout(limit, reply_rx)
                .await
                .map_err(|_| ShardError::Timeout)?
                .map_err(|_| ShardError::Unavailable),
            None => reply_rx.await.map_err(|_| ShardError::Unavailable),
        }
    }
}

/// The index → handle table shared with every actor so MOVE can address
/// its destination. Installed once, after all shards have spawned.
#[derive(Debug, Clone, Default)]
pub struct Router {
    table: Arc<OnceLock<Vec<ShardHandle>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the handle table. Later calls are ignored.
    pub fn install(&self, shards: Vec<ShardHandle>) {
        let _ = self.table.set(shards);
    }

    fn get(&self, index: usize) -> Option<ShardHandle> {
        self.table.get().and_then(|t| t.get(index).cloned())
    }
}

/// Spawns a shard actor on the current runtime and returns its handle.
pub fn spawn_shard<S: OrderedStore>(
    index: usize,
    store: S,
    notifier: Arc<dyn Notifier>,
    router: Router,
    buffer: usize,
) -> ShardHandle {
    let (tx, rx) = mpsc::channel(buffer);
    tokio::spawn(run_shard(rx, index, store, notifier, router));
    ShardHandle { tx }
}

/// The actor's main loop: serve requests strictly FIFO, sweep waiter
/// deadlines on a timer, drain bursts before re-entering select.
async fn run_shard<S: OrderedStore>(
    mut rx: mpsc::Receiver<ShardMessage>,
    index: usize,
    store: S,
    notifier: Arc<dyn Notifier>,
    router: Router,
) {
    let mut keyspace = Keyspace::new(index, store);
    let mut blocked = BlockedOps::new();

    let mut sweep = tokio::time::interval(SWEEP_TICK);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    debug!(db = index, "shard actor up");

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(msg) => {
                        process(msg, &mut keyspace, &mut blocked, &notifier, &router).await;
                        while let Ok(msg) = rx.try_recv() {
                            process(msg, &mut keyspace, &mut blocked, &notifier, &router).await;
                        }
                    }
                    None => break, // all handles dropped
                }
            }
            _ = sweep.tick() => {
                blocked.sweep();
            }
        }
    }

    debug!(db = index, "shard actor down");
}

async fn process<S: OrderedStore>(
    msg: ShardMessage,
    keyspace: &mut Keyspace<S>,
    blocked: &mut BlockedOps,
    notifier: &Arc<dyn Notifier>,
    router: &Router,
) {
    let ShardMessage { request, reply } = msg;
    match request {
        ShardRequest::Command(cmd) => {
            if notifier.notify(keyspace.index(), &cmd).is_err() {
                let _ = reply.send(Err(CommandError::NotifyFailed));
                return;
            }
            if cmd.name == "MOVE" {
                let result = handle_move(&cmd, keyspace, router).await;
                let _ = reply.send(seal(result));
                return;
            }
            match execute(keyspace, &cmd, true) {
                Outcome::Reply(result) => match seal(result) {
                    Ok(value) => {
                        // reply to the caller first, then consult waiters
                        let _ = reply.send(Ok(value.clone()));
                        after_success(&cmd, &value, keyspace, blocked);
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                },
                Outcome::Park {
                    keys,
                    deadline,
                    retry,
                } => {
                    blocked.park(keys, deadline, retry, reply);
                }
            }
        }
        ShardRequest::Exec(commands) => {
            let mut slots = Vec::with_capacity(commands.len());
            for cmd in commands {
                if notifier.notify(keyspace.index(), &cmd).is_err() {
                    slots.push(Reply::Error(CommandError::NotifyFailed.to_string()));
                    continue;
                }
                if cmd.name == "MOVE" {
                    match seal(handle_move(&cmd, keyspace, router).await) {
                        Ok(r) => slots.push(r),
                        Err(err) => slots.push(Reply::Error(err.to_string())),
                    }
                    continue;
                }
                match execute(keyspace, &cmd, false) {
                    Outcome::Reply(result) => match seal(result) {
                        Ok(value) => {
                            after_success(&cmd, &value, keyspace, blocked);
                            slots.push(value);
                        }
                        Err(err) => slots.push(Reply::Error(err.to_string())),
                    },
                    // a command that would block records an undefined slot
                    Outcome::Park { .. } => slots.push(Reply::Nil),
                }
            }
            let _ = reply.send(Ok(Reply::Array(slots)));
        }
        ShardRequest::Receive { item } => {
            let result = keyspace.receive_item(item).map(|()| Reply::Ok);
            // Found is meaningful to the caller (the source actor); it is
            // translated there, never forwarded to a client.
            let _ = reply.send(result);
        }
    }
}

/// Post-success bookkeeping shared by the single and grouped paths:
/// stamp touched keys, drop waiters on FLUSHDB, and wake waiters on every
/// key the command pushed into (cascading through retried pop-pushes).
fn after_success<S: OrderedStore>(
    cmd: &Command,
    reply: &Reply,
    keyspace: &mut Keyspace<S>,
    blocked: &mut BlockedOps,
) {
    for key in touched_keys(cmd) {
        keyspace.stamp(&key);
    }
    if cmd.name == "FLUSHDB" {
        blocked.clear();
    }
    let mut worklist: Vec<Bytes> = pushed_keys(cmd, reply).into_vec();
    while let Some(key) = worklist.pop() {
        worklist.extend(blocked.wake(&key, keyspace));
    }
}

/// Translates internal signals that have no meaning outside the actor.
fn seal(result: CommandResult) -> CommandResult {
    match result {
        Err(err) if err.is_internal() => Ok(Reply::Nil),
        other => other,
    }
}

/// MOVE: read from the source shard, hand to the destination actor, then
/// delete locally. A destination failure other than "occupied" is
/// compensated with a delete on the destination.
async fn handle_move<S: OrderedStore>(
    cmd: &Command,
    keyspace: &mut Keyspace<S>,
    router: &Router,
) -> CommandResult {
    let [key, db] = cmd.args.as_slice() else {
        return Err(CommandError::UnexpectedRequest(cmd.name.clone()));
    };
    let db = int_arg(db)?;
    if db < 0 {
        return Err(CommandError::OutOfRange);
    }
    let db = db as usize;
    if db == keyspace.index() {
        return Ok(Reply::Bool(false));
    }
    let Some(dest) = router.get(db) else {
        return Err(CommandError::OutOfRange);
    };

    let Some(item) = keyspace.take_item(key)? else {
        return Ok(Reply::Bool(false));
    };

    match dest.receive(item).await {
        Ok(Ok(_)) => {
            keyspace.del_one(key)?;
            keyspace.stamp(key);
            Ok(Reply::Bool(true))
        }
        Ok(Err(CommandError::Found)) => Ok(Reply::Bool(false)),
        Ok(Err(err)) => {
            // compensate so the destination never keeps a half-moved key
            let _ = dest
                .run(Command::new("DEL", vec![key.clone()]), None)
                .await;
            Err(err)
        }
        Err(_) => {
            warn!(db, "MOVE destination shard unavailable");
            Err(CommandError::Storage(edis_store::StoreError::Engine(
                "move destination unavailable".into(),
            )))
        }
    }
}

/// The dispatch result: an immediate reply, or a park request for a
/// blocking command that found nothing to pop.
enum Outcome {
    Reply(CommandResult),
    Park {
        keys: Vec<Bytes>,
        deadline: Option<u64>,
        retry: RetryOp,
    },
}

/// Dispatches one command by its uppercase name.
///
/// This is the hot path: coerce the untyped byte arguments, call the
/// keyspace, shape the native reply. Blocking commands try their
/// non-blocking form first and park only when `allow_block` permits.
fn execute<S: OrderedStore>(
    ks: &mut Keyspace<S>,
    cmd: &Command,
    allow_block: bool,
) -> Outcome {
    match cmd.name.as_str() {
        "BLPOP" | "BRPOP" => {
            let left = cmd.name == "BLPOP";
            let [keys @ .., timeout] = cmd.args.as_slice() else {
                return Outcome::Reply(Err(malformed(cmd)));
            };
            if keys.is_empty() {
                return Outcome::Reply(Err(malformed(cmd)));
            }
            let deadline = match block_deadline(timeout) {
                Ok(deadline) => deadline,
                Err(err) => return Outcome::Reply(Err(err)),
            };
            let retry = RetryOp::Pop {
                keys: keys.to_vec(),
                left,
            };
            try_or_park(ks, retry, deadline, allow_block)
        }
        "BRPOPLPUSH" => {
            let [src, dst, timeout] = cmd.args.as_slice() else {
                return Outcome::Reply(Err(malformed(cmd)));
            };
            let deadline = match block_deadline(timeout) {
                Ok(deadline) => deadline,
                Err(err) => return Outcome::Reply(Err(err)),
            };
            let retry = RetryOp::PopPush {
                src: src.clone(),
                dst: dst.clone(),
            };
            try_or_park(ks, retry, deadline, allow_block)
        }
        _ => Outcome::Reply(execute_plain(ks, cmd)),
    }
}

fn try_or_park<S: OrderedStore>(
    ks: &mut Keyspace<S>,
    retry: RetryOp,
    deadline: Option<u64>,
    allow_block: bool,
) -> Outcome {
    match retry.run(ks) {
        Ok((reply, _)) => Outcome::Reply(Ok(reply)),
        Err(CommandError::NotFound) => {
            if allow_block {
                let keys = match &retry {
                    RetryOp::Pop { keys, .. } => keys.clone(),
                    RetryOp::PopPush { src, .. } => vec![src.clone()],
                };
                Outcome::Park {
                    keys,
                    deadline,
                    retry,
                }
            } else {
                Outcome::Reply(Ok(Reply::Nil))
            }
        }
        Err(err) => Outcome::Reply(Err(err)),
    }
}

/// Parses a blocking timeout in whole seconds; 0 never times out.
fn block_deadline(arg: &Bytes) -> Result<Option<u64>, CommandError> {
    let secs = int_arg(arg)?;
    if secs < 0 {
        return Err(CommandError::NotInteger);
    }
    if secs == 0 {
        Ok(None)
    } else {
        Ok(Some(time::now_ms() + secs as u64 * 1000))
    }
}

/// The non-blocking command table.
fn execute_plain<S: OrderedStore>(ks: &mut Keyspace<S>, cmd: &Command) -> CommandResult {
    let args = cmd.args.as_slice();
    match (cmd.name.as_str(), args) {
        // -- strings --
        ("APPEND", [key, value]) => ks.append(key, value.clone()).map(int_reply),
        ("GET", [key]) => ks.get(key).map(Reply::bulk_or_nil),
        ("GETBIT", [key, offset]) => {
            let offset = bit_offset(offset)?;
            ks.get_bit(key, offset).map(|bit| Reply::Int(bit as i64))
        }
        ("GETRANGE", [key, start, stop]) => ks
            .get_range(key, int_arg(start)?, int_arg(stop)?)
            .map(Reply::Bulk),
        ("GETSET", [key, value]) => ks.get_set(key, value.clone()).map(Reply::bulk_or_nil),
        ("INCR", [key]) => ks.incr_by(key, 1).map(Reply::Int),
        ("INCRBY", [key, delta]) => ks.incr_by(key, int_arg(delta)?).map(Reply::Int),
        ("DECR", [key]) => ks.incr_by(key, -1).map(Reply::Int),
        ("DECRBY", [key, delta]) => {
            let delta = int_arg(delta)?.checked_neg().ok_or(CommandError::NotInteger)?;
            ks.incr_by(key, delta).map(Reply::Int)
        }
        ("MGET", keys) if !keys.is_empty() => Ok(Reply::Array(
            ks.mget(keys)?.into_iter().map(Reply::bulk_or_nil).collect(),
        )),
        ("MSET", pairs) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
            ks.mset(key_value_pairs(pairs)).map(|()| Reply::Ok)
        }
        ("MSETNX", pairs) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
            ks.mset_nx(key_value_pairs(pairs)).map(Reply::Bool)
        }
        ("SET", [key, value]) => ks.set(key, value.clone(), None).map(|()| Reply::Ok),
        ("SETEX", [key, seconds, value]) => {
            let at = expiry_from_now(int_arg(seconds)?);
            ks.set(key, value.clone(), Some(at)).map(|()| Reply::Ok)
        }
        ("SETNX", [key, value]) => ks.set_nx(key, value.clone()).map(Reply::Bool),
        ("SETRANGE", [key, offset, value]) => {
            let offset = int_arg(offset)?;
            if offset < 0 {
                return Err(CommandError::OutOfRange);
            }
            ks.set_range(key, offset as usize, value.clone()).map(int_reply)
        }
        ("SETBIT", [key, offset, bit]) => {
            let offset = bit_offset(offset)?;
            let bit = match int_arg(bit)? {
                0 => false,
                1 => true,
                _ => return Err(CommandError::OutOfRange),
            };
            ks.set_bit(key, offset, bit).map(|old| Reply::Int(old as i64))
        }
        ("STRLEN", [key]) => ks.str_len(key).map(int_reply),

        // -- keys --
        ("DEL", keys) if !keys.is_empty() => ks.del(keys).map(int_reply),
        ("EXISTS", [key]) => ks.exists(key).map(Reply::Bool),
        ("EXPIRE", [key, seconds]) => {
            let at = expiry_from_now(int_arg(seconds)?);
            ks.expire_at(key, at).map(Reply::Bool)
        }
        ("EXPIREAT", [key, at_secs]) => {
            let at = int_arg(at_secs)?.saturating_mul(1000).max(1) as u64;
            ks.expire_at(key, at).map(Reply::Bool)
        }
        ("KEYS", [pattern]) => Ok(ks.keys(pattern)?.into()),
        ("OBJECT", [subcommand, key]) => object_reply(ks, subcommand, key),
        ("PERSIST", [key]) => ks.persist(key).map(Reply::Bool),
        ("RANDOMKEY", []) => ks.random_key().map(Reply::bulk_or_nil),
        ("RENAME", [key, newkey]) => ks.rename(key, newkey).map(|()| Reply::Ok),
        ("RENAMENX", [key, newkey]) => ks.rename_nx(key, newkey).map(Reply::Bool),
        ("TTL", [key]) => ks.ttl(key).map(Reply::Int),
        ("TYPE", [key]) => ks.value_type(key).map(Reply::Status),

        // -- hashes --
        ("HDEL", [key, fields @ ..]) if !fields.is_empty() => {
            ks.hdel(key, fields).map(int_reply)
        }
        ("HEXISTS", [key, field]) => ks.hexists(key, field).map(Reply::Bool),
        ("HGET", [key, field]) => ks.hget(key, field).map(Reply::bulk_or_nil),
        ("HGETALL", [key]) => {
            let mut flat = Vec::new();
            for (field, value) in ks.hget_all(key)? {
                flat.push(Reply::Bulk(field));
                flat.push(Reply::Bulk(value));
            }
            Ok(Reply::Array(flat))
        }
        ("HINCRBY", [key, field, delta]) => ks
            .hincr_by(key, field.clone(), int_arg(delta)?)
            .map(Reply::Int),
        ("HKEYS", [key]) => Ok(ks.hkeys(key)?.into()),
        ("HLEN", [key]) => ks.hlen(key).map(int_reply),
        ("HMGET", [key, fields @ ..]) if !fields.is_empty() => Ok(Reply::Array(
            ks.hmget(key, fields)?
                .into_iter()
                .map(Reply::bulk_or_nil)
                .collect(),
        )),
        ("HMSET", [key, pairs @ ..]) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
            ks.hset(key, key_value_pairs(pairs)).map(int_reply)
        }
        ("HSET", [key, field, value]) => ks
            .hset(key, vec![(field.clone(), value.clone())])
            .map(int_reply),
        ("HSETNX", [key, field, value]) => ks
            .hset_nx(key, field.clone(), value.clone())
            .map(Reply::Bool),
        ("HVALS", [key]) => Ok(ks.hvals(key)?.into()),

        // -- lists --
        ("LINDEX", [key, index]) => ks.lindex(key, int_arg(index)?).map(Reply::bulk_or_nil),
        ("LINSERT", [key, position, pivot, value]) => {
            let before = match position.to_ascii_uppercase().as_slice() {
                b"BEFORE" => true,
                b"AFTER" => false,
                _ => return Err(malformed(cmd)),
            };
            ks.linsert(key, before, pivot.clone(), value.clone())
                .map(Reply::Int)
        }
        ("LLEN", [key]) => ks.llen(key).map(int_reply),
        ("LPOP", [key]) => ks.lpop(key).map(Reply::bulk_or_nil),
        ("RPOP", [key]) => ks.rpop(key).map(Reply::bulk_or_nil),
        ("LPUSH", [key, values @ ..]) if !values.is_empty() => {
            ks.lpush(key, values.to_vec()).map(int_reply)
        }
        ("RPUSH", [key, values @ ..]) if !values.is_empty() => {
            ks.rpush(key, values.to_vec()).map(int_reply)
        }
        ("LPUSHX", [key, values @ ..]) if !values.is_empty() => {
            ks.lpush_x(key, values.to_vec()).map(int_reply)
        }
        ("RPUSHX", [key, values @ ..]) if !values.is_empty() => {
            ks.rpush_x(key, values.to_vec()).map(int_reply)
        }
        ("LRANGE", [key, start, stop]) => {
            Ok(ks.lrange(key, int_arg(start)?, int_arg(stop)?)?.into())
        }
        ("LREM", [key, count, value]) => ks
            .lrem(key, int_arg(count)?, value.clone())
            .map(int_reply),
        ("LSET", [key, index, value]) => ks
            .lset(key, int_arg(index)?, value.clone())
            .map(|()| Reply::Ok),
        ("LTRIM", [key, start, stop]) => ks
            .ltrim(key, int_arg(start)?, int_arg(stop)?)
            .map(|()| Reply::Ok),
        ("RPOPLPUSH", [src, dst]) => match ks.rpoplpush(src, dst) {
            Ok(value) => Ok(Reply::Bulk(value)),
            Err(CommandError::NotFound) => Ok(Reply::Nil),
            Err(err) => Err(err),
        },

        // -- sets --
        ("SADD", [key, members @ ..]) if !members.is_empty() => {
            ks.sadd(key, members.to_vec()).map(int_reply)
        }
        ("SCARD", [key]) => ks.scard(key).map(int_reply),
        ("SDIFF", keys) if !keys.is_empty() => set_op_reply(ks, SetOp::Diff, keys),
        ("SINTER", keys) if !keys.is_empty() => set_op_reply(ks, SetOp::Inter, keys),
        ("SUNION", keys) if !keys.is_empty() => set_op_reply(ks, SetOp::Union, keys),
        ("SDIFFSTORE", [dst, keys @ ..]) if !keys.is_empty() => {
            ks.set_op_store(SetOp::Diff, dst, keys).map(int_reply)
        }
        ("SINTERSTORE", [dst, keys @ ..]) if !keys.is_empty() => {
            ks.set_op_store(SetOp::Inter, dst, keys).map(int_reply)
        }
        ("SUNIONSTORE", [dst, keys @ ..]) if !keys.is_empty() => {
            ks.set_op_store(SetOp::Union, dst, keys).map(int_reply)
        }
        ("SISMEMBER", [key, member]) => ks.sismember(key, member).map(Reply::Bool),
        ("SMEMBERS", [key]) => Ok(ks.smembers(key)?.into()),
        ("SMOVE", [src, dst, member]) => {
            ks.smove(src, dst, member.clone()).map(Reply::Bool)
        }
        ("SPOP", [key]) => ks.spop(key).map(Reply::bulk_or_nil),
        ("SRANDMEMBER", [key]) => ks.srandmember(key).map(Reply::bulk_or_nil),
        ("SREM", [key, members @ ..]) if !members.is_empty() => {
            ks.srem(key, members).map(int_reply)
        }

        // -- sorted sets --
        ("ZADD", [key, entries @ ..]) if !entries.is_empty() && entries.len() % 2 == 0 => {
            let mut pairs = Vec::with_capacity(entries.len() / 2);
            for chunk in entries.chunks_exact(2) {
                pairs.push((float_arg(&chunk[0])?, chunk[1].clone()));
            }
            ks.zadd(key, pairs).map(int_reply)
        }
        ("ZCARD", [key]) => ks.zcard(key).map(int_reply),
        ("ZCOUNT", [key, min, max]) => ks
            .zcount(key, bound_arg(min)?, bound_arg(max)?)
            .map(int_reply),
        ("ZINCRBY", [key, delta, member]) => ks
            .zincr_by(key, float_arg(delta)?, member.clone())
            .map(|score| Reply::Bulk(Bytes::from(format_float(score)))),
        ("ZRANGE", [key, start, stop, rest @ ..]) => {
            let with_scores = with_scores_flag(rest).ok_or_else(|| malformed(cmd))?;
            let entries = ks.zrange(key, int_arg(start)?, int_arg(stop)?, false)?;
            Ok(scored_reply(entries, with_scores))
        }
        ("ZREVRANGE", [key, start, stop, rest @ ..]) => {
            let with_scores = with_scores_flag(rest).ok_or_else(|| malformed(cmd))?;
            let entries = ks.zrange(key, int_arg(start)?, int_arg(stop)?, true)?;
            Ok(scored_reply(entries, with_scores))
        }
        ("ZRANGEBYSCORE", [key, min, max, rest @ ..]) => {
            let (with_scores, limit) = score_range_opts(rest).ok_or_else(|| malformed(cmd))?;
            let entries =
                ks.zrange_by_score(key, bound_arg(min)?, bound_arg(max)?, false, limit)?;
            Ok(scored_reply(entries, with_scores))
        }
        // the reversed form takes (max, min), mirrored bounds
        ("ZREVRANGEBYSCORE", [key, max, min, rest @ ..]) => {
            let (with_scores, limit) = score_range_opts(rest).ok_or_else(|| malformed(cmd))?;
            let entries =
                ks.zrange_by_score(key, bound_arg(min)?, bound_arg(max)?, true, limit)?;
            Ok(scored_reply(entries, with_scores))
        }
        ("ZRANK", [key, member]) => Ok(rank_reply(ks.zrank(key, member, false)?)),
        ("ZREVRANK", [key, member]) => Ok(rank_reply(ks.zrank(key, member, true)?)),
        ("ZREM", [key, members @ ..]) if !members.is_empty() => {
            ks.zrem(key, members).map(int_reply)
        }
        ("ZREMRANGEBYRANK", [key, start, stop]) => ks
            .zrem_range_by_rank(key, int_arg(start)?, int_arg(stop)?)
            .map(int_reply),
        ("ZREMRANGEBYSCORE", [key, min, max]) => ks
            .zrem_range_by_score(key, bound_arg(min)?, bound_arg(max)?)
            .map(int_reply),
        ("ZSCORE", [key, member]) => Ok(match ks.zscore(key, member)? {
            Some(score) => Reply::Bulk(Bytes::from(format_float(score))),
            None => Reply::Nil,
        }),
        ("ZUNIONSTORE", [dst, numkeys, rest @ ..]) => {
            let (inputs, agg) = zstore_args(numkeys, rest).ok_or_else(|| malformed(cmd))?;
            ks.zstore(dst, &inputs, agg, false).map(int_reply)
        }
        ("ZINTERSTORE", [dst, numkeys, rest @ ..]) => {
            let (inputs, agg) = zstore_args(numkeys, rest).ok_or_else(|| malformed(cmd))?;
            ks.zstore(dst, &inputs, agg, true).map(int_reply)
        }

        // -- server --
        ("PING", []) => Ok(Reply::Status("PONG")),
        ("ECHO", [message]) => Ok(Reply::Bulk(message.clone())),
        ("DBSIZE", []) => ks.db_size().map(int_reply),
        ("FLUSHDB", []) => ks.flush().map(|()| Reply::Ok),
        ("INFO", []) => ks.info().map(|text| Reply::Bulk(Bytes::from(text))),
        ("LASTSAVE", []) => Ok(Reply::Int(ks.last_save_secs())),
        ("SAVE", []) => {
            ks.save();
            Ok(Reply::Ok)
        }

        _ => Err(malformed(cmd)),
    }
}

fn malformed(cmd: &Command) -> CommandError {
    CommandError::UnexpectedRequest(cmd.name.clone())
}

fn int_reply(n: usize) -> Reply {
    Reply::Int(n as i64)
}

fn rank_reply(rank: Option<usize>) -> Reply {
    match rank {
        Some(rank) => Reply::Int(rank as i64),
        None => Reply::Nil,
    }
}

fn bit_offset(arg: &Bytes) -> Result<u64, CommandError> {
    let offset = int_arg(arg)?;
    if offset < 0 {
        return Err(CommandError::OutOfRange);
    }
    Ok(offset as u64)
}

/// `now + seconds`, clamped so a non-positive ttl lands strictly in the
/// past (epoch 1ms) rather than on the "never expires" sentinel.
fn expiry_from_now(seconds: i64) -> u64 {
    (time::now_ms() as i64)
        .saturating_add(seconds.saturating_mul(1000))
        .max(1) as u64
}

fn key_value_pairs(args: &[Bytes]) -> Vec<(Bytes, Bytes)> {
    args.chunks_exact(2)
        .map(|chunk| (chunk[0].clone(), chunk[1].clone()))
        .collect()
}

fn set_op_reply<S: OrderedStore>(
    ks: &mut Keyspace<S>,
    op: SetOp,
    keys: &[Bytes],
) -> CommandResult {
    let members: Vec<Bytes> = ks.set_op(op, keys)?.into_iter().collect();
    Ok(members.into())
}

/// `[]` → plain, `[WITHSCORES]` → scored; anything else is malformed.
fn with_scores_flag(rest: &[Bytes]) -> Option<bool> {
    match rest {
        [] => Some(false),
        [flag] if flag.eq_ignore_ascii_case(b"WITHSCORES") => Some(true),
        _ => None,
    }
}

/// Options of the score-range commands: WITHSCORES and LIMIT offset count,
/// in either order.
fn score_range_opts(rest: &[Bytes]) -> Option<(bool, Option<(usize, usize)>)> {
    let mut with_scores = false;
    let mut limit = None;
    let mut rest = rest;
    while !rest.is_empty() {
        if rest[0].eq_ignore_ascii_case(b"WITHSCORES") {
            with_scores = true;
            rest = &rest[1..];
        } else if rest[0].eq_ignore_ascii_case(b"LIMIT") && rest.len() >= 3 {
            let offset = int_arg(&rest[1]).ok()?;
            let count = int_arg(&rest[2]).ok()?;
            if offset < 0 || count < 0 {
                return None;
            }
            limit = Some((offset as usize, count as usize));
            rest = &rest[3..];
        } else {
            return None;
        }
    }
    Some((with_scores, limit))
}

fn scored_reply(entries: Vec<(Bytes, f64)>, with_scores: bool) -> Reply {
    let mut out = Vec::with_capacity(entries.len() * if with_scores { 2 } else { 1 });
    for (member, score) in entries {
        out.push(Reply::Bulk(member));
        if with_scores {
            out.push(Reply::Bulk(Bytes::from(format_float(score))));
        }
    }
    Reply::Array(out)
}

/// `ZUNIONSTORE dst numkeys key… [WEIGHTS w…] [AGGREGATE SUM|MIN|MAX]`.
fn zstore_args(numkeys: &Bytes, rest: &[Bytes]) -> Option<(Vec<(Bytes, f64)>, Aggregate)> {
    let numkeys = int_arg(numkeys).ok()?;
    if numkeys <= 0 || rest.len() < numkeys as usize {
        return None;
    }
    let numkeys = numkeys as usize;
    let (keys, mut rest) = rest.split_at(numkeys);
    let mut weights: Vec<f64> = vec![1.0; numkeys];
    let mut agg = Aggregate::Sum;

    while !rest.is_empty() {
        if rest[0].eq_ignore_ascii_case(b"WEIGHTS") && rest.len() > numkeys {
            for (slot, raw) in weights.iter_mut().zip(&rest[1..=numkeys]) {
                *slot = float_arg(raw).ok()?;
            }
            rest = &rest[numkeys + 1..];
        } else if rest[0].eq_ignore_ascii_case(b"AGGREGATE") && rest.len() >= 2 {
            agg = match rest[1].to_ascii_uppercase().as_slice() {
                b"SUM" => Aggregate::Sum,
                b"MIN" => Aggregate::Min,
                b"MAX" => Aggregate::Max,
                _ => return None,
            };
            rest = &rest[2..];
        } else {
            return None;
        }
    }

    let inputs = keys
        .iter()
        .cloned()
        .zip(weights)
        .collect();
    Some((inputs, agg))
}

/// The user keys a command touches, for access stamping (I5). Commands
/// that scan rather than address keys stamp nothing.
fn touched_keys(cmd: &Command) -> SmallVec<[Bytes; 2]> {
    let args = cmd.args.as_slice();
    let mut keys: SmallVec<[Bytes; 2]> = SmallVec::new();
    match cmd.name.as_str() {
        "PING" | "ECHO" | "DBSIZE" | "FLUSHDB" | "INFO" | "LASTSAVE" | "SAVE" | "KEYS"
        | "RANDOMKEY" => {}
        "DEL" | "MGET" | "SDIFF" | "SINTER" | "SUNION" | "SDIFFSTORE" | "SINTERSTORE"
        | "SUNIONSTORE" => keys.extend(args.iter().cloned()),
        "MSET" | "MSETNX" => keys.extend(args.iter().step_by(2).cloned()),
        "RENAME" | "RENAMENX" | "RPOPLPUSH" | "SMOVE" => {
            keys.extend(args.iter().take(2).cloned())
        }
        "BLPOP" | "BRPOP" => {
            if let [list_keys @ .., _timeout] = args {
                keys.extend(list_keys.iter().cloned());
            }
        }
        "BRPOPLPUSH" => keys.extend(args.iter().take(2).cloned()),
        "OBJECT" => keys.extend(args.get(1).cloned()),
        "ZUNIONSTORE" | "ZINTERSTORE" => {
            keys.extend(args.first().cloned());
            if let Some(n) = args.get(1).and_then(|n| int_arg(n).ok()) {
                if n > 0 {
                    keys.extend(args.iter().skip(2).take(n as usize).cloned());
                }
            }
        }
        "MOVE" => keys.extend(args.first().cloned()),
        _ => keys.extend(args.first().cloned()),
    }
    keys
}

/// Keys that gained list elements from a successful command — the wake-up
/// triggers for parked waiters.
fn pushed_keys(cmd: &Command, reply: &Reply) -> SmallVec<[Bytes; 2]> {
    let args = cmd.args.as_slice();
    let mut keys: SmallVec<[Bytes; 2]> = SmallVec::new();
    match cmd.name.as_str() {
        "LPUSH" | "RPUSH" => keys.extend(args.first().cloned()),
        "LPUSHX" | "RPUSHX" | "LINSERT" => {
            if matches!(reply, Reply::Int(n) if *n > 0) {
                keys.extend(args.first().cloned());
            }
        }
        "RPOPLPUSH" => {
            if matches!(reply, Reply::Bulk(_)) {
                keys.extend(args.get(1).cloned());
            }
        }
        _ => {}
    }
    keys
}

/// OBJECT REFCOUNT | ENCODING | IDLETIME. Missing keys reply `Nil`;
/// refcounts are always 1 because records round-trip through the store.
fn object_reply<S: OrderedStore>(
    ks: &mut Keyspace<S>,
    subcommand: &Bytes,
    key: &Bytes,
) -> CommandResult {
    match subcommand.to_ascii_uppercase().as_slice() {
        b"REFCOUNT" => Ok(if ks.exists(key)? {
            Reply::Int(1)
        } else {
            Reply::Nil
        }),
        b"ENCODING" => Ok(match ks.object_encoding(key)? {
            Some(name) => Reply::Bulk(Bytes::from_static(name.as_bytes())),
            None => Reply::Nil,
        }),
        b"IDLETIME" => Ok(if ks.exists(key)? {
            Reply::Int(ks.idle_time(key) as i64)
        } else {
            Reply::Nil
        }),
        _ => Err(CommandError::UnexpectedRequest("OBJECT".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{NoopNotifier, NotifyError};
    use edis_store::MemoryStore;

    fn test_shard() -> ShardHandle {
        spawn_shard(
            0,
            MemoryStore::new(),
            Arc::new(NoopNotifier),
            Router::new(),
            64,
        )
    }

    async fn run(handle: &ShardHandle, name: &str, args: &[&str]) -> CommandResult {
        let args = args
            .iter()
            .map(|a| Bytes::copy_from_slice(a.as_bytes()))
            .collect();
        handle
            .run(Command::new(name, args), Some(Duration::from_secs(5)))
            .await
            .expect("shard reachable")
    }

    #[tokio::test]
    async fn set_append_get_scenario() {
        let shard = test_shard();
        assert_eq!(run(&shard, "SET", &["foo", "Hello"]).await.unwrap(), Reply::Ok);
        assert_eq!(
            run(&shard, "APPEND", &["foo", " World"]).await.unwrap(),
            Reply::Int(11)
        );
        assert_eq!(
            run(&shard, "GET", &["foo"]).await.unwrap(),
            Reply::Bulk(Bytes::from("Hello World"))
        );
        assert_eq!(run(&shard, "STRLEN", &["foo"]).await.unwrap(), Reply::Int(11));
    }

    #[tokio::test]
    async fn incr_scenario_with_type_error() {
        let shard = test_shard();
        run(&shard, "SET", &["k", "10"]).await.unwrap();
        assert_eq!(run(&shard, "INCRBY", &["k", "5"]).await.unwrap(), Reply::Int(15));

        run(&shard, "SET", &["k", "x"]).await.unwrap();
        assert!(matches!(
            run(&shard, "INCRBY", &["k", "1"]).await,
            Err(CommandError::NotInteger)
        ));
    }

    #[tokio::test]
    async fn unknown_command_is_rejected_not_fatal() {
        let shard = test_shard();
        assert!(matches!(
            run(&shard, "NOSUCH", &[]).await,
            Err(CommandError::UnexpectedRequest(name)) if name == "NOSUCH"
        ));
        // the actor stays alive
        assert_eq!(run(&shard, "PING", &[]).await.unwrap(), Reply::Status("PONG"));
    }

    #[tokio::test]
    async fn expired_key_reads_as_absent() {
        let shard = test_shard();
        run(&shard, "LPUSH", &["k", "v"]).await.unwrap();
        assert_eq!(
            run(&shard, "EXPIRE", &["k", "0"]).await.unwrap(),
            Reply::Bool(true)
        );
        assert_eq!(run(&shard, "LLEN", &["k"]).await.unwrap(), Reply::Int(0));
        assert_eq!(
            run(&shard, "TYPE", &["k"]).await.unwrap(),
            Reply::Status("none")
        );
    }

    #[tokio::test]
    async fn blpop_scenario_wakes_with_latest_push_at_head() {
        let shard = test_shard();
        run(&shard, "LPUSH", &["q", "a"]).await.unwrap();
        run(&shard, "LPUSH", &["q", "b"]).await.unwrap();

        // drain both so the next BLPOP parks
        run(&shard, "BLPOP", &["q", "10"]).await.unwrap();
        run(&shard, "BLPOP", &["q", "10"]).await.unwrap();

        let waiter = {
            let shard = shard.clone();
            tokio::spawn(async move { run(&shard, "BLPOP", &["q", "10"]).await })
        };
        // give the waiter time to park
        tokio::time::sleep(Duration::from_millis(50)).await;

        run(&shard, "LPUSH", &["q", "c"]).await.unwrap();
        let reply = waiter.await.unwrap().unwrap();
        assert_eq!(
            reply,
            Reply::Array(vec![
                Reply::Bulk(Bytes::from("q")),
                Reply::Bulk(Bytes::from("c"))
            ])
        );
    }

    #[tokio::test]
    async fn blpop_serves_head_first_when_elements_exist() {
        let shard = test_shard();
        run(&shard, "LPUSH", &["q", "a"]).await.unwrap();
        run(&shard, "LPUSH", &["q", "b"]).await.unwrap();

        // q = [b, a]: immediate pops serve the head without parking
        assert_eq!(
            run(&shard, "BLPOP", &["q", "1"]).await.unwrap(),
            Reply::Array(vec![
                Reply::Bulk(Bytes::from("q")),
                Reply::Bulk(Bytes::from("b"))
            ])
        );
        assert_eq!(
            run(&shard, "BLPOP", &["q", "1"]).await.unwrap(),
            Reply::Array(vec![
                Reply::Bulk(Bytes::from("q")),
                Reply::Bulk(Bytes::from("a"))
            ])
        );
    }

    #[tokio::test]
    async fn blpop_fifo_wakeups() {
        let shard = test_shard();

        let first = {
            let shard = shard.clone();
            tokio::spawn(async move { run(&shard, "BLPOP", &["q", "10"]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = {
            let shard = shard.clone();
            tokio::spawn(async move { run(&shard, "BLPOP", &["q", "10"]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // one element: the earlier waiter wins
        run(&shard, "LPUSH", &["q", "one"]).await.unwrap();
        let reply = first.await.unwrap().unwrap();
        assert!(matches!(reply, Reply::Array(_)));

        run(&shard, "LPUSH", &["q", "two"]).await.unwrap();
        let reply = second.await.unwrap().unwrap();
        assert!(matches!(reply, Reply::Array(_)));
    }

    #[tokio::test]
    async fn blpop_deadline_elapses_to_nil() {
        let shard = test_shard();
        let started = std::time::Instant::now();
        let reply = run(&shard, "BLPOP", &["empty", "1"]).await.unwrap();
        assert_eq!(reply, Reply::Nil);
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn brpoplpush_parks_then_transfers() {
        let shard = test_shard();
        let waiter = {
            let shard = shard.clone();
            tokio::spawn(async move { run(&shard, "BRPOPLPUSH", &["src", "dst", "10"]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        run(&shard, "RPUSH", &["src", "v"]).await.unwrap();
        assert_eq!(
            waiter.await.unwrap().unwrap(),
            Reply::Bulk(Bytes::from("v"))
        );
        assert_eq!(
            run(&shard, "LRANGE", &["dst", "0", "-1"]).await.unwrap(),
            Reply::Array(vec![Reply::Bulk(Bytes::from("v"))])
        );
    }

    #[tokio::test]
    async fn exec_collects_per_slot_status() {
        let shard = test_shard();
        let commands = vec![
            Command::new("SET", vec![Bytes::from("k"), Bytes::from("1")]),
            Command::new("INCR", vec![Bytes::from("k")]),
            Command::new("LPUSH", vec![Bytes::from("k"), Bytes::from("x")]),
            Command::new("BLPOP", vec![Bytes::from("empty"), Bytes::from("5")]),
            Command::new("GET", vec![Bytes::from("k")]),
        ];
        let reply = shard.exec(commands, None).await.unwrap().unwrap();

        let Reply::Array(slots) = reply else {
            panic!("exec reply must be an array");
        };
        assert_eq!(slots.len(), 5);
        assert_eq!(slots[0], Reply::Ok);
        assert_eq!(slots[1], Reply::Int(2));
        assert!(matches!(slots[2], Reply::Error(_))); // wrong type
        assert_eq!(slots[3], Reply::Nil); // would block
        assert_eq!(slots[4], Reply::Bulk(Bytes::from("2")));
    }

    #[tokio::test]
    async fn flushdb_drops_parked_waiters() {
        let shard = test_shard();
        let waiter = {
            let shard = shard.clone();
            tokio::spawn(async move { run(&shard, "BLPOP", &["q", "0"]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        run(&shard, "FLUSHDB", &[]).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), Reply::Nil);
    }

    #[tokio::test]
    async fn object_subcommands() {
        let shard = test_shard();
        run(&shard, "SET", &["k", "v"]).await.unwrap();

        assert_eq!(
            run(&shard, "OBJECT", &["REFCOUNT", "k"]).await.unwrap(),
            Reply::Int(1)
        );
        assert_eq!(
            run(&shard, "OBJECT", &["ENCODING", "k"]).await.unwrap(),
            Reply::Bulk(Bytes::from("raw"))
        );
        assert_eq!(
            run(&shard, "OBJECT", &["IDLETIME", "k"]).await.unwrap(),
            Reply::Int(0)
        );
        assert_eq!(
            run(&shard, "OBJECT", &["ENCODING", "missing"]).await.unwrap(),
            Reply::Nil
        );
    }

    #[tokio::test]
    async fn zset_scenario_ranges() {
        let shard = test_shard();
        run(&shard, "ZADD", &["z", "1", "a", "2", "b", "3", "c"])
            .await
            .unwrap();

        assert_eq!(
            run(&shard, "ZRANGEBYSCORE", &["z", "1", "2"]).await.unwrap(),
            Reply::Array(vec![Reply::Bulk(Bytes::from("a")), Reply::Bulk(Bytes::from("b"))])
        );
        assert_eq!(
            run(&shard, "ZRANGE", &["z", "0", "-1", "WITHSCORES"])
                .await
                .unwrap(),
            Reply::Array(vec![
                Reply::Bulk(Bytes::from("a")),
                Reply::Bulk(Bytes::from("1")),
                Reply::Bulk(Bytes::from("b")),
                Reply::Bulk(Bytes::from("2")),
                Reply::Bulk(Bytes::from("c")),
                Reply::Bulk(Bytes::from("3")),
            ])
        );
        assert_eq!(
            run(&shard, "ZREVRANGEBYSCORE", &["z", "3", "2"]).await.unwrap(),
            Reply::Array(vec![Reply::Bulk(Bytes::from("c")), Reply::Bulk(Bytes::from("b"))])
        );
    }

    #[tokio::test]
    async fn zunionstore_envelope() {
        let shard = test_shard();
        run(&shard, "ZADD", &["a", "1", "m"]).await.unwrap();
        run(&shard, "ZADD", &["b", "3", "m", "2", "n"]).await.unwrap();

        assert_eq!(
            run(&shard, "ZUNIONSTORE", &["dst", "2", "a", "b"]).await.unwrap(),
            Reply::Int(2)
        );
        assert_eq!(
            run(&shard, "ZSCORE", &["dst", "m"]).await.unwrap(),
            Reply::Bulk(Bytes::from("4"))
        );

        assert_eq!(
            run(
                &shard,
                "ZUNIONSTORE",
                &["dst", "2", "a", "b", "WEIGHTS", "2", "10", "AGGREGATE", "MAX"]
            )
            .await
            .unwrap(),
            Reply::Int(2)
        );
        assert_eq!(
            run(&shard, "ZSCORE", &["dst", "m"]).await.unwrap(),
            Reply::Bulk(Bytes::from("30"))
        );
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn notify(&self, _db: usize, _command: &Command) -> Result<(), NotifyError> {
            Err(NotifyError)
        }
    }

    #[tokio::test]
    async fn notify_failure_aborts_the_command() {
        let shard = spawn_shard(
            0,
            MemoryStore::new(),
            Arc::new(FailingNotifier),
            Router::new(),
            16,
        );
        let result = shard
            .run(Command::new("PING", vec![]), None)
            .await
            .unwrap();
        assert!(matches!(result, Err(CommandError::NotifyFailed)));
    }

    #[tokio::test]
    async fn run_timeout_rejects_only_the_wait() {
        let shard = test_shard();
        let err = shard
            .run(
                Command::new("BLPOP", vec![Bytes::from("q"), Bytes::from("0")]),
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ShardError::Timeout);

        // the actor is still serving; the abandoned waiter is swept later
        assert_eq!(run(&shard, "PING", &[]).await.unwrap(), Reply::Status("PONG"));
        run(&shard, "LPUSH", &["q", "v"]).await.unwrap();
        // the push must not lose the element to the dead waiter
        assert_eq!(run(&shard, "LLEN", &["q"]).await.unwrap(), Reply::Int(1));
    }
}

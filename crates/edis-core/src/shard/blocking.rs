//! Blocking-op registry: parked BLPOP/BRPOP/BRPOPLPUSH callers.
//!
//! A waiter is a stored continuation — the deadline, the non-blocking
//! operation to retry, and the reply sender. Wake-ups are a pure function
//! of "a push landed on key k": walk that key's FIFO, drop expired and
//! dead waiters, and retry live ones until one comes up empty. Caller
//! liveness is observed through the reply sender; a closed sender means
//! the client stopped waiting.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use edis_store::OrderedStore;
use tokio::sync::oneshot;

use crate::command::Reply;
use crate::error::CommandError;
use crate::keyspace::Keyspace;
use crate::time;

use super::CommandResult;

/// The saved non-blocking operation a parked caller retries on wake-up.
#[derive(Debug, Clone)]
pub(super) enum RetryOp {
    /// BLPOP / BRPOP: try each key in order.
    Pop { keys: Vec<Bytes>, left: bool },
    /// BRPOPLPUSH: retry the pop-push; parked on `src` only.
    PopPush { src: Bytes, dst: Bytes },
}

impl RetryOp {
    /// Runs the saved operation once, non-blocking. On success returns the
    /// reply plus any key that gained a list element as a side effect.
    pub(super) fn run<S: OrderedStore>(
        &self,
        ks: &mut Keyspace<S>,
    ) -> Result<(Reply, Option<Bytes>), CommandError> {
        match self {
            RetryOp::Pop { keys, left } => {
                for key in keys {
                    let popped = if *left { ks.lpop(key)? } else { ks.rpop(key)? };
                    if let Some(value) = popped {
                        ks.stamp(key);
                        let reply =
                            Reply::Array(vec![Reply::Bulk(key.clone()), Reply::Bulk(value)]);
                        return Ok((reply, None));
                    }
                }
                Err(CommandError::NotFound)
            }
            RetryOp::PopPush { src, dst } => {
                let value = ks.rpoplpush(src, dst)?;
                ks.stamp(src);
                ks.stamp(dst);
                Ok((Reply::Bulk(value), Some(dst.clone())))
            }
        }
    }
}

struct Waiter {
    /// Absolute deadline in epoch ms; `None` never times out.
    deadline: Option<u64>,
    retry: RetryOp,
    /// Every key this waiter is parked on (for full removal on wake).
    keys: Vec<Bytes>,
    reply: oneshot::Sender<CommandResult>,
}

impl Waiter {
    fn expired(&self, now_ms: u64) -> bool {
        matches!(self.deadline, Some(at) if at <= now_ms)
    }
}

/// Per-key FIFO waiter lists plus the waiter table itself.
#[derive(Default)]
pub(super) struct BlockedOps {
    by_key: HashMap<Bytes, VecDeque<u64>>,
    waiters: HashMap<u64, Waiter>,
    next_id: u64,
}

impl BlockedOps {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Parks a caller on every key its operation watches.
    pub(super) fn park(
        &mut self,
        keys: Vec<Bytes>,
        deadline: Option<u64>,
        retry: RetryOp,
        reply: oneshot::Sender<CommandResult>,
    ) {
        let id = self.next_id;
        self.next_id += 1;
        for key in &keys {
            self.by_key.entry(key.clone()).or_default().push_back(id);
        }
        self.waiters.insert(
            id,
            Waiter {
                deadline,
                retry,
                keys,
                reply,
            },
        );
    }

    /// Wakes waiters parked on `key` after a push landed there, FIFO by
    /// parking time. Returns keys that gained elements from retried
    /// pop-pushes so the caller can cascade.
    pub(super) fn wake<S: OrderedStore>(
        &mut self,
        key: &[u8],
        ks: &mut Keyspace<S>,
    ) -> Vec<Bytes> {
        let now = time::now_ms();
        let mut cascades = Vec::new();

        loop {
            let Some(id) = self.by_key.get(key).and_then(|q| q.front().copied()) else {
                break;
            };
            let Some(waiter) = self.waiters.get(&id) else {
                // stale queue entry left by an earlier removal
                if let Some(queue) = self.by_key.get_mut(key) {
                    queue.pop_front();
                    if queue.is_empty() {
                        self.by_key.remove(key);
                    }
                }
                continue;
            };

            if waiter.expired(now) {
                if let Some(waiter) = self.remove(id) {
                    let _ = waiter.reply.send(Ok(Reply::Nil));
                }
                continue;
            }
            if waiter.reply.is_closed() {
                self.remove(id);
                continue;
            }

            let retry = waiter.retry.clone();
            match retry.run(ks) {
                Ok((reply, pushed)) => {
                    if let Some(waiter) = self.remove(id) {
                        let _ = waiter.reply.send(Ok(reply));
                    }
                    cascades.extend(pushed);
                }
                Err(CommandError::NotFound) => break, // stays parked
                Err(err) => {
                    if let Some(waiter) = self.remove(id) {
                        let _ = waiter.reply.send(Err(err));
                    }
                }
            }
        }
        cascades
    }

    /// Drops deadline-elapsed waiters (answering `Nil`) and abandoned
    /// ones. Run from the actor's periodic tick.
    pub(super) fn sweep(&mut self) {
        let now = time::now_ms();
        let doomed: Vec<u64> = self
            .waiters
            .iter()
            .filter(|(_, w)| w.expired(now) || w.reply.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            if let Some(waiter) = self.remove(id) {
                let _ = waiter.reply.send(Ok(Reply::Nil));
            }
        }
    }

    /// Drops every waiter, answering `Nil`. Used by FLUSHDB.
    pub(super) fn clear(&mut self) {
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.reply.send(Ok(Reply::Nil));
        }
        self.by_key.clear();
    }

    pub(super) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Removes a waiter from the table and from every key list it was
    /// parked on.
    fn remove(&mut self, id: u64) -> Option<Waiter> {
        let waiter = self.waiters.remove(&id)?;
        for key in &waiter.keys {
            if let Some(queue) = self.by_key.get_mut(key) {
                queue.retain(|other| *other != id);
                if queue.is_empty() {
                    self.by_key.remove(key);
                }
            }
        }
        Some(waiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::test_util::keyspace;

    fn parked(
        blocked: &mut BlockedOps,
        keys: &[&str],
        deadline: Option<u64>,
    ) -> oneshot::Receiver<CommandResult> {
        let (tx, rx) = oneshot::channel();
        let keys: Vec<Bytes> = keys.iter().map(|k| Bytes::copy_from_slice(k.as_bytes())).collect();
        blocked.park(
            keys.clone(),
            deadline,
            RetryOp::Pop { keys, left: true },
            tx,
        );
        rx
    }

    #[test]
    fn wake_pops_for_first_parked_waiter() {
        let mut ks = keyspace();
        let mut blocked = BlockedOps::new();
        let mut first = parked(&mut blocked, &["q"], None);
        let mut second = parked(&mut blocked, &["q"], None);

        ks.lpush(b"q", vec![Bytes::from("job")]).unwrap();
        blocked.wake(b"q", &mut ks);

        let reply = first.try_recv().unwrap().unwrap();
        assert_eq!(
            reply,
            Reply::Array(vec![Reply::Bulk(Bytes::from("q")), Reply::Bulk(Bytes::from("job"))])
        );
        // one element, one waiter served; the second stays parked
        assert!(second.try_recv().is_err());
        assert!(!blocked.is_empty());
    }

    #[test]
    fn wake_removes_waiter_from_every_key() {
        let mut ks = keyspace();
        let mut blocked = BlockedOps::new();
        let mut rx = parked(&mut blocked, &["a", "b"], None);

        ks.lpush(b"b", vec![Bytes::from("v")]).unwrap();
        blocked.wake(b"b", &mut ks);

        assert!(rx.try_recv().unwrap().is_ok());
        assert!(blocked.is_empty());

        // a push on the other key wakes nothing
        ks.lpush(b"a", vec![Bytes::from("w")]).unwrap();
        blocked.wake(b"a", &mut ks);
    }

    #[test]
    fn expired_waiters_get_nil_on_wake() {
        let mut ks = keyspace();
        let mut blocked = BlockedOps::new();
        let mut stale = parked(&mut blocked, &["q"], Some(1));
        let mut live = parked(&mut blocked, &["q"], None);

        ks.lpush(b"q", vec![Bytes::from("v")]).unwrap();
        blocked.wake(b"q", &mut ks);

        assert_eq!(stale.try_recv().unwrap().unwrap(), Reply::Nil);
        // the live waiter behind it receives the element
        assert!(matches!(
            live.try_recv().unwrap().unwrap(),
            Reply::Array(_)
        ));
    }

    #[test]
    fn dead_waiters_are_skipped() {
        let mut ks = keyspace();
        let mut blocked = BlockedOps::new();
        let dead = parked(&mut blocked, &["q"], None);
        drop(dead);
        let mut live = parked(&mut blocked, &["q"], None);

        ks.lpush(b"q", vec![Bytes::from("v")]).unwrap();
        blocked.wake(b"q", &mut ks);

        assert!(matches!(live.try_recv().unwrap().unwrap(), Reply::Array(_)));
        assert!(blocked.is_empty());
    }

    #[test]
    fn sweep_discards_elapsed_waiters() {
        let mut blocked = BlockedOps::new();
        let mut stale = parked(&mut blocked, &["q"], Some(1));
        let _live = parked(&mut blocked, &["q"], Some(time::now_ms() + 60_000));

        blocked.sweep();
        assert_eq!(stale.try_recv().unwrap().unwrap(), Reply::Nil);
        assert!(!blocked.is_empty());
    }

    #[test]
    fn clear_answers_everyone() {
        let mut blocked = BlockedOps::new();
        let mut rx = parked(&mut blocked, &["q"], None);
        blocked.clear();
        assert_eq!(rx.try_recv().unwrap().unwrap(), Reply::Nil);
        assert!(blocked.is_empty());
    }

    #[test]
    fn popppush_retry_reports_cascade_key() {
        let mut ks = keyspace();
        let mut blocked = BlockedOps::new();
        let (tx, mut rx) = oneshot::channel();
        blocked.park(
            vec![Bytes::from("src")],
            None,
            RetryOp::PopPush {
                src: Bytes::from("src"),
                dst: Bytes::from("dst"),
            },
            tx,
        );

        ks.lpush(b"src", vec![Bytes::from("v")]).unwrap();
        let cascades = blocked.wake(b"src", &mut ks);

        assert_eq!(cascades, vec![Bytes::from("dst")]);
        assert_eq!(rx.try_recv().unwrap().unwrap(), Reply::Bulk(Bytes::from("v")));
        assert_eq!(ks.lrange(b"dst", 0, -1).unwrap(), vec![Bytes::from("v")]);
    }
}

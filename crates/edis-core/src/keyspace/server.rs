//! Server commands backed by keyspace state: sizing, flushing, and the
//! save/info bookkeeping.

use std::ops::ControlFlow;

use edis_store::OrderedStore;

use crate::error::CommandError;
use crate::item::Item;
use crate::time;

use super::Keyspace;

impl<S: OrderedStore> Keyspace<S> {
    /// DBSIZE: counts live keys with a full in-order scan.
    pub fn db_size(&self) -> Result<usize, CommandError> {
        self.store()
            .fold(0usize, |count, _key, blob| {
                let live = match Item::decode(blob) {
                    Ok(item) => !item.is_expired(),
                    Err(_) => true,
                };
                ControlFlow::Continue(if live { count + 1 } else { count })
            })
            .map_err(CommandError::from)
    }

    /// FLUSHDB: destroys and recreates the store, discarding the access
    /// stamps. The caller (the actor) drops any parked waiters.
    pub fn flush(&mut self) -> Result<(), CommandError> {
        self.store.reset()?;
        self.accesses.clear();
        Ok(())
    }

    /// SAVE: records the acceptance timestamp. The store engine manages
    /// its own durability; nothing is flushed here.
    pub fn save(&mut self) {
        self.last_save = time::now_secs_f64();
    }

    /// LASTSAVE: whole seconds of the last accepted save.
    pub fn last_save_secs(&self) -> i64 {
        self.last_save as i64
    }

    /// INFO: a small key:value report for this shard.
    pub fn info(&self) -> Result<String, CommandError> {
        let keys = self.db_size()?;
        let uptime = time::now_secs().saturating_sub(self.start_secs);
        let mut out = String::new();
        out.push_str(&format!("edis_version:{}\r\n", env!("CARGO_PKG_VERSION")));
        out.push_str(&format!("db:{}\r\n", self.index));
        out.push_str(&format!("keys:{keys}\r\n"));
        out.push_str(&format!("uptime_in_seconds:{uptime}\r\n"));
        out.push_str(&format!("last_save_time:{}\r\n", self.last_save_secs()));
        Ok(out)
    }
}

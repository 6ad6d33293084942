use crate::error::QueueError;
use crate::prelude::*;
use crate::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Primitive list and set operations the queue is built on top of
#[async_trait]
pub(crate) trait Broker: Send + Sync + 'static {
    async fn ping(&self) -> Result;

    /// Sets the key that expires after `ttl` unless refreshed
    async fn heartbeat(&self, key: &str, ttl: Duration) -> Result;

    /// Pushes the payload to the head of the list
    async fn push(&self, list: &str, payload: &str) -> Result;

    /// Atomically moves the oldest payload from the tail of `from` to the
    /// head of `to`
    async fn move_oldest(&self, from: &str, to: &str) -> Result<Option<String>>;

    /// Removes a single occurrence of the payload from the list
    async fn remove(&self, list: &str, payload: &str) -> Result;

    async fn add_to_set(&self, set: &str, member: &str) -> Result;
}

#[derive(Clone)]
pub(crate) struct RedisBroker {
    conn: ConnectionManager,
}

impl RedisBroker {
    pub(crate) async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(err_ctx!(QueueError::Connect {
            address: url
        }))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(err_ctx!(QueueError::Connect { address: url }))?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn ping(&self) -> Result {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn.clone())
            .await
            .map_err(err_ctx!(QueueError::Command { command: "PING" }))?;
        Ok(())
    }

    async fn heartbeat(&self, key: &str, ttl: Duration) -> Result {
        let seconds = usize::try_from(ttl.as_secs()).unwrap_or(usize::MAX);
        let _: () = self
            .conn
            .clone()
            .set_ex(key, 1, seconds)
            .await
            .map_err(err_ctx!(QueueError::Command { command: "SETEX" }))?;
        Ok(())
    }

    async fn push(&self, list: &str, payload: &str) -> Result {
        let _: () = self
            .conn
            .clone()
            .lpush(list, payload)
            .await
            .map_err(err_ctx!(QueueError::Command { command: "LPUSH" }))?;
        Ok(())
    }

    async fn move_oldest(&self, from: &str, to: &str) -> Result<Option<String>> {
        self.conn
            .clone()
            .rpoplpush(from, to)
            .await
            .map_err(err_ctx!(QueueError::Command {
                command: "RPOPLPUSH"
            }))
    }

    async fn remove(&self, list: &str, payload: &str) -> Result {
        let _: () = self
            .conn
            .clone()
            .lrem(list, 1, payload)
            .await
            .map_err(err_ctx!(QueueError::Command { command: "LREM" }))?;
        Ok(())
    }

    async fn add_to_set(&self, set: &str, member: &str) -> Result {
        let _: () = self
            .conn
            .clone()
            .sadd(set, member)
            .await
            .map_err(err_ctx!(QueueError::Command { command: "SADD" }))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) use memory::MemoryBroker;

#[cfg(test)]
mod memory {
    use super::Broker;
    use crate::prelude::*;
    use crate::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{BTreeSet, HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-process broker for tests. Every operation fails while
    /// [`MemoryBroker::set_failing`] is on.
    #[derive(Default)]
    pub(crate) struct MemoryBroker {
        lists: Mutex<HashMap<String, VecDeque<String>>>,
        sets: Mutex<HashMap<String, BTreeSet<String>>>,
        failing: AtomicBool,
        heartbeats: AtomicUsize,
        heartbeat_delay: Mutex<Option<Duration>>,
    }

    impl MemoryBroker {
        pub(crate) fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Number of heartbeats attempted so far
        pub(crate) fn heartbeats(&self) -> usize {
            self.heartbeats.load(Ordering::SeqCst)
        }

        /// Makes the next heartbeat take the given time
        pub(crate) fn delay_next_heartbeat(&self, delay: Duration) {
            *self.heartbeat_delay.lock() = Some(delay);
        }

        pub(crate) fn len(&self, list: &str) -> usize {
            self.lists.lock().get(list).map_or(0, VecDeque::len)
        }

        pub(crate) fn list(&self, list: &str) -> Vec<String> {
            self.lists
                .lock()
                .get(list)
                .map(|list| list.iter().cloned().collect())
                .unwrap_or_default()
        }

        fn check(&self) -> Result {
            if self.failing.load(Ordering::SeqCst) {
                return Err(fatal!("Memory broker is failing on purpose"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Broker for MemoryBroker {
        async fn ping(&self) -> Result {
            self.check()
        }

        async fn heartbeat(&self, _key: &str, _ttl: Duration) -> Result {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            let delay = self.heartbeat_delay.lock().take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.check()
        }

        async fn push(&self, list: &str, payload: &str) -> Result {
            self.check()?;
            self.lists
                .lock()
                .entry(list.to_owned())
                .or_default()
                .push_front(payload.to_owned());
            Ok(())
        }

        async fn move_oldest(&self, from: &str, to: &str) -> Result<Option<String>> {
            self.check()?;
            let mut lists = self.lists.lock();
            let Some(payload) = lists.get_mut(from).and_then(VecDeque::pop_back) else {
                return Ok(None);
            };
            lists
                .entry(to.to_owned())
                .or_default()
                .push_front(payload.clone());
            Ok(Some(payload))
        }

        async fn remove(&self, list: &str, payload: &str) -> Result {
            self.check()?;
            let mut lists = self.lists.lock();
            if let Some(list) = lists.get_mut(list) {
                if let Some(pos) = list.iter().position(|item| item == payload) {
                    list.remove(pos);
                }
            }
            Ok(())
        }

        async fn add_to_set(&self, set: &str, member: &str) -> Result {
            self.check()?;
            self.sets
                .lock()
                .entry(set.to_owned())
                .or_default()
                .insert(member.to_owned());
            Ok(())
        }
    }
}

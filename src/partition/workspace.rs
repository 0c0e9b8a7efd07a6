use crate::storage::{Engine, Item, Key, Value, Version};
use crate::txn::TxnId;
use crate::util::Result;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Where a read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Store,
    Workspace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadEntry {
    pub key: Key,
    pub served: Item,
    pub source: ReadSource,
}

/// The latest tentative item for a key, plus the store version the first
/// write to that key was based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWrite {
    pub base: Version,
    pub item: Item,
}

/// Private, partition-local buffer of one transaction. Nothing in here is
/// visible to other transactions until the commit decision applies it.
#[derive(Debug, Default)]
pub struct Workspace {
    reads: Vec<ReadEntry>,
    writes: BTreeMap<Key, PendingWrite>,
    voted: bool,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_voted(&self) -> bool {
        self.voted
    }

    pub fn reads(&self) -> &[ReadEntry] {
        &self.reads
    }

    pub fn pending(&self, key: Key) -> Option<&PendingWrite> {
        self.writes.get(&key)
    }

    /// Answers a read with this workspace's own write if there is one,
    /// otherwise with the committed item, and records exactly what was served.
    pub fn read<E: Engine + ?Sized>(&mut self, key: Key, store: &E) -> Result<Item> {
        let (served, source) = match self.writes.get(&key) {
            Some(w) => (w.item, ReadSource::Workspace),
            None => (store.get(key)?, ReadSource::Store),
        };
        self.reads.push(ReadEntry {
            key,
            served,
            source,
        });
        Ok(served)
    }

    /// Buffers `value` as the next version of `key`. Only the latest write
    /// per key is kept.
    pub fn write<E: Engine + ?Sized>(&mut self, key: Key, value: Value, store: &E) -> Result<Item> {
        let (base, prev) = match self.writes.get(&key) {
            Some(w) => (w.base, w.item.version),
            None => {
                let v = store.get(key)?.version;
                (v, v)
            }
        };
        let item = Item::new(prev + 1, value);
        self.writes.insert(key, PendingWrite { base, item });
        Ok(item)
    }

    /// Every key this transaction read or wrote here, ascending.
    pub fn keys(&self) -> BTreeSet<Key> {
        self.reads
            .iter()
            .map(|r| r.key)
            .chain(self.writes.keys().copied())
            .collect()
    }

    /// Decides this partition's vote and freezes the workspace.
    ///
    /// Keys are examined in ascending order. Each examined key gets locked for
    /// `txn` unless another transaction holds it; examination stops at the
    /// first conflict.
    pub fn validate<E: Engine + ?Sized>(&mut self, txn: TxnId, store: &mut E) -> Result<bool> {
        self.voted = true;
        for key in self.keys() {
            if !store.try_lock(key, txn) {
                debug!(%txn, key, owner = ?store.lock_owner(key), "key locked by another txn");
                return Ok(false);
            }
            let current = store.get(key)?;
            if let Some(r) = self
                .reads
                .iter()
                .filter(|r| r.key == key)
                .find(|r| !self.reconciles(r, current))
            {
                debug!(%txn, key, served = ?r.served, ?current, "read invalidated");
                return Ok(false);
            }
            if let Some(w) = self.writes.get(&key) {
                if w.item.version <= current.version || w.base != current.version {
                    debug!(%txn, key, base = w.base, ?current, "stale write");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn reconciles(&self, read: &ReadEntry, current: Item) -> bool {
        match read.source {
            ReadSource::Store => read.served == current,
            // served from our own chain, valid while the chain's base is current
            ReadSource::Workspace => self
                .writes
                .get(&read.key)
                .map_or(false, |w| w.base == current.version),
        }
    }

    pub fn into_writes(self) -> impl Iterator<Item = (Key, Item)> {
        self.writes.into_iter().map(|(k, w)| (k, w.item))
    }
}

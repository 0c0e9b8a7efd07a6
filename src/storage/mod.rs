use crate::txn::TxnId;
use crate::util::Result;
use std::collections::BTreeMap;

mod in_mem;
pub use in_mem::InMemEngine;

pub type Key = u64;
pub type Value = i64;
pub type Version = u64;

/// A committed snapshot of one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Item {
    pub version: Version,
    pub value: Value,
}

impl Item {
    pub fn new(version: Version, value: Value) -> Self {
        Self { version, value }
    }
}

/// The per-key record of a store: the committed item plus its lock owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub item: Item,
    pub lock: Option<TxnId>,
}

/// Storage of one partition. Only the owning partition touches it, so every
/// mutation takes `&mut self`.
pub trait Engine: Send {
    /// Keys never written read as `Item::default()`.
    fn get(&self, k: Key) -> Result<Item>;
    /// Replaces the committed item; the lock is left as is.
    fn put(&mut self, k: Key, item: Item) -> Result<()>;
    fn lock_owner(&self, k: Key) -> Option<TxnId>;
    /// Grants the lock unless another transaction holds it.
    fn try_lock(&mut self, k: Key, txn: TxnId) -> bool;
    /// Releases every lock tagged with `txn`, returns how many. A record that
    /// only existed to hold one of those locks is dropped again.
    fn release_locks(&mut self, txn: TxnId) -> usize;
    fn snapshot(&self) -> BTreeMap<Key, Item>;
}

use crate::storage::{Engine, Item, Key, Record};
use crate::txn::TxnId;
use crate::util::Result;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct InMemEngine {
    inner: BTreeMap<Key, Record>,
    // keys whose record exists only to carry a lock
    lock_only: BTreeSet<Key>,
}

impl InMemEngine {
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
            lock_only: BTreeSet::new(),
        }
    }

    pub fn with_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = (Key, Item)>,
    {
        let inner = items
            .into_iter()
            .map(|(k, item)| (k, Record { item, lock: None }))
            .collect();
        Self {
            inner,
            lock_only: BTreeSet::new(),
        }
    }
}

impl Engine for InMemEngine {
    fn get(&self, k: Key) -> Result<Item> {
        Ok(self.inner.get(&k).map(|r| r.item).unwrap_or_default())
    }

    fn put(&mut self, k: Key, item: Item) -> Result<()> {
        self.inner.entry(k).or_default().item = item;
        self.lock_only.remove(&k);
        Ok(())
    }

    fn lock_owner(&self, k: Key) -> Option<TxnId> {
        self.inner.get(&k).and_then(|r| r.lock)
    }

    fn try_lock(&mut self, k: Key, txn: TxnId) -> bool {
        let lock_only = &mut self.lock_only;
        let record = self.inner.entry(k).or_insert_with(|| {
            lock_only.insert(k);
            Record::default()
        });
        match record.lock {
            Some(owner) if owner != txn => false,
            _ => {
                record.lock = Some(txn);
                true
            }
        }
    }

    fn release_locks(&mut self, txn: TxnId) -> usize {
        let mut released = 0;
        for record in self.inner.values_mut() {
            if record.lock == Some(txn) {
                record.lock = None;
                released += 1;
            }
        }
        let inner = &mut self.inner;
        self.lock_only.retain(|k| {
            let free = inner.get(k).map_or(true, |r| r.lock.is_none());
            if free {
                inner.remove(k);
            }
            !free
        });
        released
    }

    fn snapshot(&self) -> BTreeMap<Key, Item> {
        self.inner.iter().map(|(k, r)| (*k, r.item)).collect()
    }
}

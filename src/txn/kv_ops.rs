use crate::storage::{Item, Key, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
}

/// One step of a transaction against one key.
///
/// A read leaves `item` empty until a partition resolves it; a write carries
/// the requested value, and the partition assigns the version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OpKind,
    pub key: Key,
    pub item: Option<Item>,
}

impl Operation {
    pub fn read(key: Key) -> Self {
        Self {
            kind: OpKind::Read,
            key,
            item: None,
        }
    }

    pub fn write(key: Key, value: Value) -> Self {
        Self {
            kind: OpKind::Write,
            key,
            item: Some(Item::new(0, value)),
        }
    }

    /// The read answered with `item`.
    pub fn resolved(self, item: Item) -> Self {
        Self {
            item: Some(item),
            ..self
        }
    }

    pub fn value(&self) -> Option<Value> {
        self.item.map(|i| i.value)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.item) {
            (OpKind::Read, None) => write!(f, "READ({})", self.key),
            (OpKind::Read, Some(i)) => write!(f, "READ({})={}@v{}", self.key, i.value, i.version),
            (OpKind::Write, Some(i)) => write!(f, "WRITE({})={}", self.key, i.value),
            (OpKind::Write, None) => write!(f, "WRITE({})", self.key),
        }
    }
}

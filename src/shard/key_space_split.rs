use crate::partition::PartitionId;
use crate::shard::Shard;
use crate::storage::Key;
use crate::util::{Result, ShardError};
use std::ops::Range;

/// Splits the key space into consecutive ranges of `shard_size` keys,
/// partition `p` owning `[p * shard_size, (p + 1) * shard_size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpaceSplit {
    shard_size: u64,
}

impl KeySpaceSplit {
    pub fn new(shard_size: u64) -> Result<Self> {
        if shard_size == 0 {
            return Err(ShardError::InvalidShardSize.into());
        }
        Ok(Self { shard_size })
    }

    pub fn shard_size(&self) -> u64 {
        self.shard_size
    }

    pub fn key_range(&self, partition: PartitionId) -> Range<Key> {
        let start = partition as u64 * self.shard_size;
        start..start + self.shard_size
    }
}

impl Shard for KeySpaceSplit {
    fn partition_of(&self, key: Key) -> PartitionId {
        (key / self.shard_size) as PartitionId
    }
}

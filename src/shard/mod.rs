use crate::partition::PartitionId;
use crate::storage::Key;

pub trait Shard: Send + Sync {
    /// The partition owning `key`. Routing is static, every coordinator
    /// computes the same answer.
    fn partition_of(&self, key: Key) -> PartitionId;
}

mod key_space_split;
pub use key_space_split::KeySpaceSplit;

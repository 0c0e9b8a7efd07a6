use crate::partition::PartitionId;
use crate::shard::Shard;
use std::collections::BTreeSet;
use std::fmt;

pub type ClientId = u32;
pub type CoordinatorId = u32;

/// A coordinator serves at most one live transaction per client, so the pair
/// is unique among in-flight transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId {
    pub coordinator_id: CoordinatorId,
    pub client_id: ClientId,
}

impl TxnId {
    pub fn new(coordinator_id: CoordinatorId, client_id: ClientId) -> Self {
        Self {
            coordinator_id,
            client_id,
        }
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}/cl{}", self.coordinator_id, self.client_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotePhase {
    Active,
    Voting,
}

/// Coordinator-side record of a transaction.
#[derive(Debug)]
pub struct Txn {
    id: TxnId,
    ops: Vec<Operation>,
    phase: VotePhase,
    asked: usize,
    votes: usize,
    votes_collected: usize,
    aborted: BTreeSet<PartitionId>,
}

impl Txn {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            ops: vec![],
            phase: VotePhase::Active,
            asked: 0,
            votes: 0,
            votes_collected: 0,
            aborted: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn phase(&self) -> VotePhase {
        self.phase
    }

    pub fn log(&mut self, op: Operation) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    /// Partitions owning the distinct keys this transaction touched.
    pub fn participants<S: Shard + ?Sized>(&self, shard: &S) -> BTreeSet<PartitionId> {
        self.ops.iter().map(|op| shard.partition_of(op.key)).collect()
    }

    pub fn start_voting(&mut self, asked: usize) {
        self.phase = VotePhase::Voting;
        self.asked = asked;
        self.votes = 0;
        self.votes_collected = 0;
    }

    pub fn record_vote(&mut self, vote: bool) {
        self.votes_collected += 1;
        if vote {
            self.votes += 1;
        }
    }

    /// Remembers that `partition` was told to abort; false if it already was.
    pub fn mark_aborted(&mut self, partition: PartitionId) -> bool {
        self.aborted.insert(partition)
    }

    pub fn is_aborting(&self) -> bool {
        !self.aborted.is_empty()
    }

    pub fn all_votes_in(&self) -> bool {
        self.votes_collected >= self.asked
    }

    pub fn unanimous(&self) -> bool {
        self.votes == self.asked
    }

    pub fn votes(&self) -> (usize, usize) {
        (self.votes, self.votes_collected)
    }
}

mod kv_ops;
pub use kv_ops::{OpKind, Operation};

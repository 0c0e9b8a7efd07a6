//! The data-shard side of two-phase commit.
//!
//! A partition owns the authoritative store of its key range, one private
//! workspace per in-flight transaction that touched it, and the per-key locks.
//! Writes are buffered in workspaces and reach the store only when the
//! coordinator's commit decision arrives.

use crate::coordinator::CoordinatorMsg;
use crate::node::Node;
use crate::request::Mailbox;
use crate::storage::{Engine, InMemEngine, Item, Key};
use crate::txn::{Operation, TxnId};
use crate::util::{ProtocolError, Result};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::oneshot;
use tracing::debug;

mod workspace;
pub use workspace::{PendingWrite, ReadEntry, ReadSource, Workspace};

pub type PartitionId = u32;

#[derive(Debug)]
pub enum PartitionMsg {
    Read {
        txn: TxnId,
        op: Operation,
        reply_to: Mailbox<CoordinatorMsg>,
    },
    /// Writes are acknowledged only through the vote.
    Write { txn: TxnId, op: Operation },
    VoteRequest {
        txn: TxnId,
        reply_to: Mailbox<CoordinatorMsg>,
    },
    Decision { txn: TxnId, commit: bool },
    /// Diagnostic dump of the committed store.
    Snapshot {
        reply: oneshot::Sender<PartitionSnapshot>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSnapshot {
    pub partition: PartitionId,
    pub items: BTreeMap<Key, Item>,
}

pub struct Partition<E: Engine = InMemEngine> {
    id: PartitionId,
    store: E,
    workspaces: HashMap<TxnId, Workspace>,
}

impl<E: Engine> Partition<E> {
    pub fn new(id: PartitionId, store: E) -> Self {
        Self {
            id,
            store,
            workspaces: HashMap::new(),
        }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn store(&self) -> &E {
        &self.store
    }

    pub fn workspace(&self, txn: &TxnId) -> Option<&Workspace> {
        self.workspaces.get(txn)
    }

    fn open_workspace(
        workspaces: &mut HashMap<TxnId, Workspace>,
        txn: TxnId,
    ) -> Result<&mut Workspace> {
        let ws = workspaces.entry(txn).or_default();
        if ws.is_voted() {
            return Err(ProtocolError::WorkspaceFrozen(txn).into());
        }
        Ok(ws)
    }

    pub fn on_read(&mut self, txn: TxnId, op: Operation) -> Result<Operation> {
        let key = op.key;
        let ws = Self::open_workspace(&mut self.workspaces, txn)?;
        let item = ws.read(key, &self.store)?;
        debug!(partition = self.id, %txn, key, value = item.value, version = item.version, "read");
        Ok(op.resolved(item))
    }

    pub fn on_write(&mut self, txn: TxnId, op: Operation) -> Result<Item> {
        let key = op.key;
        let value = op.value().ok_or(ProtocolError::MissingWriteValue(key))?;
        let ws = Self::open_workspace(&mut self.workspaces, txn)?;
        let item = ws.write(key, value, &self.store)?;
        debug!(partition = self.id, %txn, key, value, version = item.version, "write buffered");
        Ok(item)
    }

    /// A partition the transaction never touched has no stake and votes yes.
    pub fn on_vote_request(&mut self, txn: TxnId) -> Result<bool> {
        let vote = match self.workspaces.get_mut(&txn) {
            Some(ws) => ws.validate(txn, &mut self.store)?,
            None => true,
        };
        debug!(partition = self.id, %txn, vote, "vote");
        Ok(vote)
    }

    pub fn on_decision(&mut self, txn: TxnId, commit: bool) -> Result<()> {
        let ws = match self.workspaces.remove(&txn) {
            Some(ws) => ws,
            None => {
                debug!(partition = self.id, %txn, commit, "decision without workspace");
                return Ok(());
            }
        };
        if commit {
            for (key, item) in ws.into_writes() {
                self.store.put(key, item)?;
            }
        }
        let released = self.store.release_locks(txn);
        debug!(partition = self.id, %txn, commit, released, "decision applied");
        Ok(())
    }

    pub fn on_snapshot(&self) -> PartitionSnapshot {
        PartitionSnapshot {
            partition: self.id,
            items: self.store.snapshot(),
        }
    }
}

impl<E: Engine + 'static> Node for Partition<E> {
    type Msg = PartitionMsg;

    fn name(&self) -> String {
        format!("partition-{}", self.id)
    }

    fn handle(&mut self, msg: Self::Msg) -> Result<()> {
        match msg {
            PartitionMsg::Read { txn, op, reply_to } => {
                let op = self.on_read(txn, op)?;
                reply_to.send(CoordinatorMsg::ReadResult {
                    partition: self.id,
                    txn,
                    op,
                })
            }
            PartitionMsg::Write { txn, op } => self.on_write(txn, op).map(|_| ()),
            PartitionMsg::VoteRequest { txn, reply_to } => {
                let vote = self.on_vote_request(txn)?;
                reply_to.send(CoordinatorMsg::Vote {
                    txn,
                    vote,
                    partition: self.id,
                })
            }
            PartitionMsg::Decision { txn, commit } => self.on_decision(txn, commit),
            PartitionMsg::Snapshot { reply } => {
                // the requester may have given up, nothing to do then
                let _ = reply.send(self.on_snapshot());
                Ok(())
            }
        }
    }
}

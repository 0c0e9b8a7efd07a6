//! The coordinator side of two-phase commit.
//!
//! A coordinator holds at most one open transaction per client, routes every
//! operation to the partition owning its key, runs the vote round when the
//! client asks to commit and replies to the client exactly once with the
//! outcome.

use crate::client::{ClientReply, ClientRequest};
use crate::node::Node;
use crate::partition::{PartitionId, PartitionMsg};
use crate::request::Mailbox;
use crate::shard::{KeySpaceSplit, Shard};
use crate::storage::{Key, Value};
use crate::txn::{ClientId, CoordinatorId, Operation, Txn, TxnId, VotePhase};
use crate::util::{ProtocolError, Result, ShardError};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum CoordinatorMsg {
    Welcome(Directory),
    Client(ClientRequest),
    ReadResult {
        partition: PartitionId,
        txn: TxnId,
        op: Operation,
    },
    Vote {
        txn: TxnId,
        vote: bool,
        partition: PartitionId,
    },
}

/// Addresses handed to a coordinator once, at bootstrap.
#[derive(Debug, Clone)]
pub struct Directory {
    pub clients: HashMap<ClientId, Mailbox<ClientReply>>,
    pub partitions: HashMap<PartitionId, Mailbox<PartitionMsg>>,
    pub shard_size: u64,
}

struct Routing {
    clients: HashMap<ClientId, Mailbox<ClientReply>>,
    partitions: HashMap<PartitionId, Mailbox<PartitionMsg>>,
    shard: KeySpaceSplit,
}

impl Routing {
    fn partition(&self, id: PartitionId) -> Result<&Mailbox<PartitionMsg>> {
        self.partitions
            .get(&id)
            .ok_or_else(|| ShardError::UnknownPartition(id).into())
    }

    fn route(&self, key: Key) -> Result<&Mailbox<PartitionMsg>> {
        self.partition(self.shard.partition_of(key))
    }

    fn reply(&self, client: ClientId, reply: ClientReply) -> Result<()> {
        self.clients
            .get(&client)
            .ok_or(ProtocolError::UnknownClient(client))?
            .send(reply)
    }

    fn decide<I>(&self, txn: TxnId, commit: bool, partitions: I) -> Result<()>
    where
        I: IntoIterator<Item = PartitionId>,
    {
        for p in partitions {
            self.partition(p)?
                .send(PartitionMsg::Decision { txn, commit })?;
        }
        Ok(())
    }
}

fn routed(routing: &Option<Routing>, id: CoordinatorId) -> Result<&Routing> {
    routing
        .as_ref()
        .ok_or_else(|| ProtocolError::NotBootstrapped(id).into())
}

fn open_txn(active: &mut HashMap<ClientId, Txn>, client: ClientId) -> Result<&mut Txn> {
    let txn = active
        .get_mut(&client)
        .ok_or(ProtocolError::NoActiveTxn(client))?;
    if txn.phase() == VotePhase::Voting {
        return Err(ProtocolError::AlreadyEnded(txn.id()).into());
    }
    Ok(txn)
}

pub struct Coordinator {
    id: CoordinatorId,
    myself: Mailbox<CoordinatorMsg>,
    routing: Option<Routing>,
    active: HashMap<ClientId, Txn>,
}

impl Coordinator {
    /// `myself` is where partitions send read results and votes.
    pub fn new(id: CoordinatorId, myself: Mailbox<CoordinatorMsg>) -> Self {
        Self {
            id,
            myself,
            routing: None,
            active: HashMap::new(),
        }
    }

    pub fn id(&self) -> CoordinatorId {
        self.id
    }

    pub fn active(&self, client: ClientId) -> Option<&Txn> {
        self.active.get(&client)
    }

    fn on_welcome(&mut self, dir: Directory) -> Result<()> {
        let shard = KeySpaceSplit::new(dir.shard_size)?;
        debug!(
            coordinator = self.id,
            clients = dir.clients.len(),
            partitions = dir.partitions.len(),
            shard_size = dir.shard_size,
            "welcomed"
        );
        self.routing = Some(Routing {
            clients: dir.clients,
            partitions: dir.partitions,
            shard,
        });
        Ok(())
    }

    fn on_begin(&mut self, client: ClientId) -> Result<()> {
        let routing = routed(&self.routing, self.id)?;
        if let Some(txn) = self.active.get(&client) {
            debug!(coordinator = self.id, txn = %txn.id(), "duplicate begin ignored");
            return Ok(());
        }
        let id = TxnId::new(self.id, client);
        self.active.insert(client, Txn::new(id));
        debug!(coordinator = self.id, txn = %id, "begin");
        routing.reply(client, ClientReply::Accepted)
    }

    fn on_read(&mut self, client: ClientId, key: Key) -> Result<()> {
        let routing = routed(&self.routing, self.id)?;
        let txn = open_txn(&mut self.active, client)?;
        let target = routing.route(key)?;
        let op = Operation::read(key);
        txn.log(op.clone());
        target.send(PartitionMsg::Read {
            txn: txn.id(),
            op,
            reply_to: self.myself.clone(),
        })
    }

    fn on_write(&mut self, client: ClientId, key: Key, value: Value) -> Result<()> {
        let routing = routed(&self.routing, self.id)?;
        let txn = open_txn(&mut self.active, client)?;
        let target = routing.route(key)?;
        let op = Operation::write(key, value);
        txn.log(op.clone());
        target.send(PartitionMsg::Write { txn: txn.id(), op })
    }

    fn on_end(&mut self, client: ClientId, commit: bool) -> Result<()> {
        let routing = routed(&self.routing, self.id)?;
        let txn = open_txn(&mut self.active, client)?;
        let id = txn.id();
        let participants = txn.participants(&routing.shard);
        // every participant must be reachable before anyone is asked to vote
        let targets = match participants
            .iter()
            .map(|p| routing.partition(*p))
            .collect::<Result<Vec<_>>>()
        {
            Ok(targets) => targets,
            Err(err) => {
                warn!(coordinator = self.id, txn = %id, %err, "unreachable participant, aborting");
                self.active.remove(&client);
                for p in participants {
                    if let Ok(mb) = routing.partition(p) {
                        mb.send(PartitionMsg::Decision {
                            txn: id,
                            commit: false,
                        })?;
                    }
                }
                return routing.reply(client, ClientReply::TxnResult { committed: false });
            }
        };

        if commit && !targets.is_empty() {
            txn.start_voting(targets.len());
            debug!(coordinator = self.id, txn = %id, asked = targets.len(), "vote round");
            for mb in targets {
                mb.send(PartitionMsg::VoteRequest {
                    txn: id,
                    reply_to: self.myself.clone(),
                })?;
            }
            return Ok(());
        }

        // a client abort needs no vote, and an empty transaction commits trivially
        self.active.remove(&client);
        if !commit {
            for mb in targets {
                mb.send(PartitionMsg::Decision {
                    txn: id,
                    commit: false,
                })?;
            }
        }
        info!(coordinator = self.id, txn = %id, committed = commit, "txn ended");
        routing.reply(client, ClientReply::TxnResult { committed: commit })
    }

    /// Relays a partition's answer; the coordinator never resolves reads.
    fn on_read_result(&mut self, partition: PartitionId, txn: TxnId, op: Operation) -> Result<()> {
        let routing = routed(&self.routing, self.id)?;
        let item = op.item.ok_or(ProtocolError::UnresolvedRead(op.key))?;
        debug!(coordinator = self.id, %txn, partition, %op, "read result");
        routing.reply(
            txn.client_id,
            ClientReply::ReadResult {
                key: op.key,
                value: item.value,
            },
        )
    }

    fn on_vote(&mut self, partition: PartitionId, id: TxnId, vote: bool) -> Result<()> {
        let routing = routed(&self.routing, self.id)?;
        let txn = match self.active.get_mut(&id.client_id) {
            Some(txn) if txn.id() == id && txn.phase() == VotePhase::Voting => txn,
            _ => {
                warn!(
                    coordinator = self.id,
                    txn = %id,
                    partition,
                    vote,
                    "vote for no pending round"
                );
                return Ok(());
            }
        };
        txn.record_vote(vote);
        debug!(coordinator = self.id, txn = %id, partition, vote, votes = ?txn.votes(), "vote");

        let participants = txn.participants(&routing.shard);
        if !vote {
            // stop the others early, late votes are still awaited below
            let fresh: Vec<_> = participants
                .iter()
                .copied()
                .filter(|p| txn.mark_aborted(*p))
                .collect();
            routing.decide(id, false, fresh)?;
        }
        if !txn.all_votes_in() {
            return Ok(());
        }

        let committed = !txn.is_aborting() && txn.unanimous();
        if committed {
            routing.decide(id, true, participants)?;
        }
        self.active.remove(&id.client_id);
        info!(coordinator = self.id, txn = %id, committed, "txn ended");
        routing.reply(id.client_id, ClientReply::TxnResult { committed })
    }
}

impl Node for Coordinator {
    type Msg = CoordinatorMsg;

    fn name(&self) -> String {
        format!("coordinator-{}", self.id)
    }

    fn handle(&mut self, msg: Self::Msg) -> Result<()> {
        match msg {
            CoordinatorMsg::Welcome(dir) => self.on_welcome(dir),
            CoordinatorMsg::Client(req) => match req {
                ClientRequest::Begin { client } => self.on_begin(client),
                ClientRequest::Read { client, key } => self.on_read(client, key),
                ClientRequest::Write { client, key, value } => self.on_write(client, key, value),
                ClientRequest::End { client, commit } => self.on_end(client, commit),
            },
            CoordinatorMsg::ReadResult { partition, txn, op } => {
                self.on_read_result(partition, txn, op)
            }
            CoordinatorMsg::Vote {
                txn,
                vote,
                partition,
            } => self.on_vote(partition, txn, vote),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::channel::mailbox;
    use crate::util::test::drain;
    use crate::util::Error;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        coord: Coordinator,
        _own: UnboundedReceiver<CoordinatorMsg>,
        client: UnboundedReceiver<ClientReply>,
        parts: Vec<UnboundedReceiver<PartitionMsg>>,
    }

    const CLIENT: ClientId = 7;

    fn harness() -> Harness {
        let (myself, _own) = mailbox();
        let mut coord = Coordinator::new(1, myself);
        let (client_mb, client) = mailbox();
        let mut partitions = HashMap::new();
        let mut parts = vec![];
        for p in 0..3 {
            let (mb, rx) = mailbox();
            partitions.insert(p, mb);
            parts.push(rx);
        }
        let mut clients = HashMap::new();
        clients.insert(CLIENT, client_mb);
        coord
            .handle(CoordinatorMsg::Welcome(Directory {
                clients,
                partitions,
                shard_size: 10,
            }))
            .unwrap();
        Harness {
            coord,
            _own,
            client,
            parts,
        }
    }

    fn req(coord: &mut Coordinator, req: ClientRequest) -> Result<()> {
        coord.handle(CoordinatorMsg::Client(req))
    }

    fn vote(coord: &mut Coordinator, partition: PartitionId, vote: bool) {
        let txn = TxnId::new(1, CLIENT);
        coord
            .handle(CoordinatorMsg::Vote {
                txn,
                vote,
                partition,
            })
            .unwrap();
    }

    fn decisions(rx: &mut UnboundedReceiver<PartitionMsg>) -> Vec<bool> {
        drain(rx)
            .into_iter()
            .filter_map(|m| match m {
                PartitionMsg::Decision { commit, .. } => Some(commit),
                _ => None,
            })
            .collect()
    }

    /// Opens a transaction writing keys 3 and 13 and asks to commit it.
    fn start_vote_round(h: &mut Harness) {
        req(&mut h.coord, ClientRequest::Begin { client: CLIENT }).unwrap();
        for key in &[3, 13] {
            req(
                &mut h.coord,
                ClientRequest::Write {
                    client: CLIENT,
                    key: *key,
                    value: 1,
                },
            )
            .unwrap();
        }
        req(
            &mut h.coord,
            ClientRequest::End {
                client: CLIENT,
                commit: true,
            },
        )
        .unwrap();
        assert_eq!(drain(&mut h.client), vec![ClientReply::Accepted]);
        for p in 0..2 {
            let msgs = drain(&mut h.parts[p]);
            assert_eq!(msgs.len(), 2);
            assert!(matches!(msgs[1], PartitionMsg::VoteRequest { .. }));
        }
        assert!(drain(&mut h.parts[2]).is_empty());
    }

    #[test]
    fn test_duplicate_begin() {
        let mut h = harness();
        req(&mut h.coord, ClientRequest::Begin { client: CLIENT }).unwrap();
        req(&mut h.coord, ClientRequest::Begin { client: CLIENT }).unwrap();
        assert_eq!(drain(&mut h.client), vec![ClientReply::Accepted]);
        // the first transaction stays usable
        req(&mut h.coord, ClientRequest::Read { client: CLIENT, key: 4 }).unwrap();
        assert_eq!(h.coord.active(CLIENT).unwrap().ops().len(), 1);
    }

    #[test]
    fn test_read_is_routed_and_relayed() {
        let mut h = harness();
        req(&mut h.coord, ClientRequest::Begin { client: CLIENT }).unwrap();
        req(&mut h.coord, ClientRequest::Read { client: CLIENT, key: 25 }).unwrap();
        let msg = drain(&mut h.parts[2]).pop();
        let (txn, op) = match msg {
            Some(PartitionMsg::Read { txn, op, .. }) => (txn, op),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(txn, TxnId::new(1, CLIENT));
        assert_eq!(op, Operation::read(25));

        let served = op.resolved(crate::storage::Item::new(4, 12));
        h.coord
            .handle(CoordinatorMsg::ReadResult {
                partition: 2,
                txn,
                op: served,
            })
            .unwrap();
        assert_eq!(
            drain(&mut h.client),
            vec![
                ClientReply::Accepted,
                ClientReply::ReadResult { key: 25, value: 12 }
            ]
        );
    }

    #[test]
    fn test_client_abort_skips_votes() {
        let mut h = harness();
        req(&mut h.coord, ClientRequest::Begin { client: CLIENT }).unwrap();
        req(&mut h.coord, ClientRequest::Read { client: CLIENT, key: 1 }).unwrap();
        req(
            &mut h.coord,
            ClientRequest::Write {
                client: CLIENT,
                key: 21,
                value: 5,
            },
        )
        .unwrap();
        req(
            &mut h.coord,
            ClientRequest::End {
                client: CLIENT,
                commit: false,
            },
        )
        .unwrap();
        assert_eq!(
            drain(&mut h.client),
            vec![
                ClientReply::Accepted,
                ClientReply::TxnResult { committed: false }
            ]
        );
        let p0 = drain(&mut h.parts[0]);
        assert!(matches!(p0[1], PartitionMsg::Decision { commit: false, .. }));
        assert!(!p0.iter().any(|m| matches!(m, PartitionMsg::VoteRequest { .. })));
        assert_eq!(decisions(&mut h.parts[1]), Vec::<bool>::new());
        assert_eq!(drain(&mut h.parts[2]).len(), 2);
        assert!(h.coord.active(CLIENT).is_none());
    }

    #[test]
    fn test_unanimous_commit() {
        let mut h = harness();
        start_vote_round(&mut h);
        vote(&mut h.coord, 0, true);
        assert!(drain(&mut h.client).is_empty());
        vote(&mut h.coord, 1, true);
        assert_eq!(
            drain(&mut h.client),
            vec![ClientReply::TxnResult { committed: true }]
        );
        assert_eq!(decisions(&mut h.parts[0]), vec![true]);
        assert_eq!(decisions(&mut h.parts[1]), vec![true]);
        assert!(h.coord.active(CLIENT).is_none());
    }

    #[test]
    fn test_false_vote_aborts_early() {
        let mut h = harness();
        start_vote_round(&mut h);
        vote(&mut h.coord, 1, false);
        // everyone is told to abort right away, the client waits for the last vote
        assert_eq!(decisions(&mut h.parts[0]), vec![false]);
        assert_eq!(decisions(&mut h.parts[1]), vec![false]);
        assert!(drain(&mut h.client).is_empty());
        assert!(h.coord.active(CLIENT).is_some());

        vote(&mut h.coord, 0, true);
        assert_eq!(
            drain(&mut h.client),
            vec![ClientReply::TxnResult { committed: false }]
        );
        assert!(decisions(&mut h.parts[0]).is_empty());
        assert!(h.coord.active(CLIENT).is_none());

        // a vote after the record is gone is dropped quietly
        vote(&mut h.coord, 0, true);
        assert!(drain(&mut h.client).is_empty());
    }

    #[test]
    fn test_two_false_votes_abort_once() {
        let mut h = harness();
        start_vote_round(&mut h);
        vote(&mut h.coord, 0, false);
        vote(&mut h.coord, 1, false);
        assert_eq!(decisions(&mut h.parts[0]), vec![false]);
        assert_eq!(decisions(&mut h.parts[1]), vec![false]);
        assert_eq!(
            drain(&mut h.client),
            vec![ClientReply::TxnResult { committed: false }]
        );
    }

    #[test]
    fn test_operations_after_end_are_rejected() {
        let mut h = harness();
        start_vote_round(&mut h);
        let err = req(&mut h.coord, ClientRequest::Read { client: CLIENT, key: 3 }).unwrap_err();
        assert_eq!(
            err,
            Error::ProtocolError(ProtocolError::AlreadyEnded(TxnId::new(1, CLIENT)))
        );
        let err = req(&mut h.coord, ClientRequest::Read { client: 8, key: 3 }).unwrap_err();
        assert_eq!(err, Error::ProtocolError(ProtocolError::NoActiveTxn(8)));
    }

    #[test]
    fn test_empty_txn_commits() {
        let mut h = harness();
        req(&mut h.coord, ClientRequest::Begin { client: CLIENT }).unwrap();
        req(
            &mut h.coord,
            ClientRequest::End {
                client: CLIENT,
                commit: true,
            },
        )
        .unwrap();
        assert_eq!(
            drain(&mut h.client),
            vec![
                ClientReply::Accepted,
                ClientReply::TxnResult { committed: true }
            ]
        );
        assert!(h.parts.iter_mut().all(|rx| drain(rx).is_empty()));
    }

    #[test]
    fn test_unroutable_key_is_not_logged() {
        let mut h = harness();
        req(&mut h.coord, ClientRequest::Begin { client: CLIENT }).unwrap();
        for key in &[3, 35] {
            let res = req(
                &mut h.coord,
                ClientRequest::Write {
                    client: CLIENT,
                    key: *key,
                    value: 1,
                },
            );
            if *key == 35 {
                assert_eq!(
                    res.unwrap_err(),
                    Error::ShardError(ShardError::UnknownPartition(3))
                );
            }
        }
        assert_eq!(h.coord.active(CLIENT).unwrap().ops().len(), 1);

        req(
            &mut h.coord,
            ClientRequest::End {
                client: CLIENT,
                commit: true,
            },
        )
        .unwrap();
        vote(&mut h.coord, 0, true);
        assert_eq!(
            drain(&mut h.client),
            vec![
                ClientReply::Accepted,
                ClientReply::TxnResult { committed: true }
            ]
        );
        assert_eq!(decisions(&mut h.parts[0]), vec![true]);
    }

    #[test]
    fn test_unreachable_participant_aborts_without_votes() {
        let mut h = harness();
        req(&mut h.coord, ClientRequest::Begin { client: CLIENT }).unwrap();
        req(
            &mut h.coord,
            ClientRequest::Write {
                client: CLIENT,
                key: 3,
                value: 1,
            },
        )
        .unwrap();
        // a partition that left the directory after the write was routed
        h.coord
            .active
            .get_mut(&CLIENT)
            .unwrap()
            .log(Operation::write(35, 1));
        req(
            &mut h.coord,
            ClientRequest::End {
                client: CLIENT,
                commit: true,
            },
        )
        .unwrap();
        assert_eq!(
            drain(&mut h.client),
            vec![
                ClientReply::Accepted,
                ClientReply::TxnResult { committed: false }
            ]
        );
        let p0 = drain(&mut h.parts[0]);
        assert!(!p0.iter().any(|m| matches!(m, PartitionMsg::VoteRequest { .. })));
        assert!(matches!(p0[1], PartitionMsg::Decision { commit: false, .. }));
        assert!(h.coord.active(CLIENT).is_none());
    }

    #[test]
    fn test_not_bootstrapped() {
        let (myself, _own) = mailbox();
        let mut coord = Coordinator::new(4, myself);
        assert_eq!(coord.id(), 4);
        assert_eq!(
            req(&mut coord, ClientRequest::Begin { client: 1 }).unwrap_err(),
            Error::ProtocolError(ProtocolError::NotBootstrapped(4))
        );
    }
}

use crate::client::{ClientReply, InteractiveTxnClient};
use crate::coordinator::{Coordinator, CoordinatorMsg, Directory};
use crate::partition::{Partition, PartitionId, PartitionMsg, PartitionSnapshot};
use crate::request::channel::{mailbox, spawn, NodeHandle};
use crate::request::Mailbox;
use crate::shard::KeySpaceSplit;
use crate::storage::{InMemEngine, Item, Value};
use crate::txn::{ClientId, CoordinatorId};
use crate::util::{Error, RequestError, Result};
use futures::future::try_join_all;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tracing::info;

mod config;
pub use self::config::ClusterConfig;

/// Summed committed values against what the initial contents add up to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub expected: Value,
    pub total: Value,
    pub keys: usize,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.expected == self.total
    }
}

/// Running coordinators and partitions of one process.
pub struct Cluster {
    config: ClusterConfig,
    coordinators: Vec<NodeHandle<CoordinatorMsg>>,
    partitions: BTreeMap<PartitionId, NodeHandle<PartitionMsg>>,
}

impl Cluster {
    /// Spawns every node and welcomes the coordinators. Must be called from
    /// within a tokio runtime.
    pub fn start(
        config: ClusterConfig,
        clients: HashMap<ClientId, Mailbox<ClientReply>>,
    ) -> Result<Self> {
        let boxes = (0..config.coordinators).map(|_| mailbox()).collect();
        Self::start_with(config, clients, boxes)
    }

    /// Starts a cluster together with one client per configured client id,
    /// clients being spread round-robin over the coordinators.
    pub fn launch(config: ClusterConfig) -> Result<(Self, Vec<InteractiveTxnClient>)> {
        config.validate()?;
        // clients need coordinator addresses before the coordinators run
        let boxes: Vec<_> = (0..config.coordinators).map(|_| mailbox()).collect();
        let mut clients = vec![];
        let mut reply_tos = HashMap::new();
        for id in 0..config.clients {
            let coord = &boxes[(id % config.coordinators) as usize].0;
            let (client, reply_to) = InteractiveTxnClient::new(id, coord.clone());
            reply_tos.insert(id, reply_to);
            clients.push(client);
        }
        let cluster = Self::start_with(config, reply_tos, boxes)?;
        Ok((cluster, clients))
    }

    fn start_with(
        config: ClusterConfig,
        clients: HashMap<ClientId, Mailbox<ClientReply>>,
        boxes: Vec<(Mailbox<CoordinatorMsg>, UnboundedReceiver<CoordinatorMsg>)>,
    ) -> Result<Self> {
        config.validate()?;
        let shard = KeySpaceSplit::new(config.keys_per_partition)?;

        let mut partitions = BTreeMap::new();
        for id in 0..config.partitions {
            let store = InMemEngine::with_items(
                shard
                    .key_range(id)
                    .map(|k| (k, Item::new(0, config.initial_value))),
            );
            let (mb, inbox) = mailbox();
            partitions.insert(id, spawn(Partition::new(id, store), mb, inbox));
        }

        let dir = Directory {
            clients,
            partitions: partitions
                .iter()
                .map(|(id, h)| (*id, h.mailbox().clone()))
                .collect(),
            shard_size: shard.shard_size(),
        };
        let mut coordinators = vec![];
        for (id, (mb, inbox)) in boxes.into_iter().enumerate() {
            let node = Coordinator::new(id as CoordinatorId, mb.clone());
            let handle = spawn(node, mb, inbox);
            handle.mailbox().send(CoordinatorMsg::Welcome(dir.clone()))?;
            coordinators.push(handle);
        }

        info!(
            coordinators = config.coordinators,
            partitions = config.partitions,
            max_key = config.max_key(),
            "cluster started"
        );
        Ok(Self {
            config,
            coordinators,
            partitions,
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn coordinator(&self, id: CoordinatorId) -> Option<&Mailbox<CoordinatorMsg>> {
        self.coordinators.get(id as usize).map(|h| h.mailbox())
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Mailbox<PartitionMsg>> {
        self.partitions.get(&id).map(|h| h.mailbox())
    }

    /// Asks every partition for a copy of its committed store. Requests queue
    /// behind everything already sent to a partition.
    pub async fn snapshot(&self) -> Result<Vec<PartitionSnapshot>> {
        let mut pending = vec![];
        for handle in self.partitions.values() {
            let (reply, rx) = oneshot::channel();
            handle.mailbox().send(PartitionMsg::Snapshot { reply })?;
            pending.push(async move {
                rx.await
                    .map_err(|_| Error::from(RequestError::ReplyDropped("snapshot")))
            });
        }
        try_join_all(pending).await
    }

    pub async fn check_consistency(&self) -> Result<ConsistencyReport> {
        let snaps = self.snapshot().await?;
        let report = ConsistencyReport {
            expected: self.config.expected_total(),
            total: snaps
                .iter()
                .flat_map(|s| s.items.values())
                .map(|i| i.value)
                .sum(),
            keys: snaps.iter().map(|s| s.items.len()).sum(),
        };
        info!(
            expected = report.expected,
            total = report.total,
            keys = report.keys,
            "consistency check"
        );
        Ok(report)
    }

    /// Stops coordinators first so that no decision is left half-sent to
    /// partitions that are already gone.
    pub async fn shutdown(self) -> Result<()> {
        for handle in self.coordinators {
            handle.stop().await?;
        }
        for (_, handle) in self.partitions {
            handle.stop().await?;
        }
        info!("cluster stopped");
        Ok(())
    }
}

//! A partitioned key-value store with atomic multi-key transactions.
//!
//! Coordinators and partitions are isolated nodes talking over mailboxes.
//! Each transaction buffers its reads and writes in private per-partition
//! workspaces; on commit the coordinator runs two-phase commit, partitions
//! vote after validating their workspace against current versions and locks,
//! and the unanimous decision is applied everywhere or nowhere.

pub mod client;
pub mod cluster;
pub mod coordinator;
pub mod node;
pub mod partition;
pub mod request;
pub mod shard;
pub mod storage;
pub mod txn;
pub mod util;

pub use client::{Client, ClientReply, ClientRequest, InteractiveTxnClient};
pub use cluster::{Cluster, ClusterConfig, ConsistencyReport};
pub use util::{Error, Result};

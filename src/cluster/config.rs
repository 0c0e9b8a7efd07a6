use crate::storage::Value;
use crate::util::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Shape of a cluster and the contents it starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_clients")]
    pub clients: u32,

    #[serde(default = "default_coordinators")]
    pub coordinators: u32,

    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Keys per partition, also the routing shard size.
    #[serde(default = "default_keys_per_partition")]
    pub keys_per_partition: u64,

    /// Value every key starts with, at version 0.
    #[serde(default = "default_initial_value")]
    pub initial_value: Value,
}

fn default_clients() -> u32 {
    2
}
fn default_coordinators() -> u32 {
    2
}
fn default_partitions() -> u32 {
    2
}
fn default_keys_per_partition() -> u64 {
    10
}
fn default_initial_value() -> Value {
    100
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            clients: default_clients(),
            coordinators: default_coordinators(),
            partitions: default_partitions(),
            keys_per_partition: default_keys_per_partition(),
            initial_value: default_initial_value(),
        }
    }
}

impl ClusterConfig {
    /// Reads a TOML file, `SHARDTXN_*` environment variables override it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let cfg: Self = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()))
            .add_source(::config::Environment::with_prefix("SHARDTXN"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("clients", self.clients as u64),
            ("coordinators", self.coordinators as u64),
            ("partitions", self.partitions as u64),
            ("keys_per_partition", self.keys_per_partition),
        ];
        for (name, v) in zero.iter() {
            if *v == 0 {
                return Err(Error::ConfigError(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn max_key(&self) -> u64 {
        self.partitions as u64 * self.keys_per_partition - 1
    }

    /// Sum of all values when no transaction ever committed.
    pub fn expected_total(&self) -> Value {
        self.partitions as Value * self.keys_per_partition as Value * self.initial_value
    }
}

//! Per-operation consistency level selection.

use crate::config::StoreConfig;
use crate::rpc::Consistency;

/// The consistency levels a store applies to metadata and data operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConsistencyPolicy {
    pub read: Consistency,
    pub write: Consistency,
}

impl ConsistencyPolicy {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            read: config.read_consistency,
            write: config.write_consistency,
        }
    }

    /// Adapts the policy to the keyspace's replication strategy.
    ///
    /// Under a topology-aware strategy only the analytics datacenter holds
    /// replicas, so quorum operations need not wait on the other datacenter.
    pub fn for_strategy(self, strategy_class: &str) -> Self {
        if strategy_class.ends_with("NetworkTopologyStrategy") {
            Self {
                read: localize(self.read),
                write: localize(self.write),
            }
        } else {
            self
        }
    }

    /// Level to retry a missed inode read at, if any.
    ///
    /// A miss at `ONE` may have hit a replica the metadata write has not
    /// reached yet; one retry at `QUORUM` settles it.
    pub fn escalated_read(&self) -> Option<Consistency> {
        match self.read {
            Consistency::One => Some(Consistency::Quorum),
            _ => None,
        }
    }
}

fn localize(level: Consistency) -> Consistency {
    match level {
        Consistency::Quorum => Consistency::LocalQuorum,
        other => other,
    }
}

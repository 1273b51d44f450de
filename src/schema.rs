/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of CFS.
 *
 * CFS is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * CFS is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * CFS. If not, see <https://www.gnu.org/licenses/>.
 */

//! Keyspace and column family management.
//!
//! The filesystem keyspace holds four column families: two storage pools,
//! each a pair of inode metadata and sub-block data families. Nodes starting
//! concurrently destagger keyspace creation with a short random sleep; losing
//! the creation race anyway is handled by re-describing.

use crate::config::StoreConfig;
use crate::rpc::{ColumnDef, FamilyDef, KeyspaceDef, NodeClient, Pool};
use crate::util;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

/// The keyspace holding every filesystem column family.
pub const KEYSPACE: &str = "cfs";

/// Name of the column holding the canonical absolute path.
pub const PATH_COLUMN: &[u8] = b"path";
/// Name of the column holding the canonical parent path.
pub const PARENT_PATH_COLUMN: &[u8] = b"parent_path";
/// Name of the constant-valued column satisfying the indexed-scan equality
/// requirement.
pub const SENTINEL_COLUMN: &[u8] = b"sentinel";
/// Name of the column holding the serialized inode record.
pub const DATA_COLUMN: &[u8] = b"data";
/// The sentinel column's value.
pub const SENTINEL: &[u8] = b"x";

const STRATEGY_CLASS: &str = "org.apache.cassandra.locator.NetworkTopologyStrategy";

const AGREEMENT_TIMEOUT: Duration = Duration::from_secs(30);
const AGREEMENT_POLL: Duration = Duration::from_millis(200);
/// Version reported for hosts that did not answer; ignored when checking
/// agreement.
const UNREACHABLE: &str = "UNREACHABLE";

/// Makes sure the filesystem keyspace exists and is the session default.
///
/// Returns the keyspace definition, whether found or freshly created.
pub fn ensure_keyspace(client: &dyn NodeClient, config: &StoreConfig) -> io::Result<KeyspaceDef> {
    if let Some(def) = client.describe_keyspace(KEYSPACE)? {
        client.set_keyspace(KEYSPACE)?;
        return Ok(def);
    }
    destagger(config.destagger_ms);
    if let Some(def) = client.describe_keyspace(KEYSPACE)? {
        client.set_keyspace(KEYSPACE)?;
        return Ok(def);
    }
    let def = keyspace_def(config);
    log::info!(
        "creating keyspace {KEYSPACE} (replication {} in {})",
        config.replication,
        config.analytics_dc
    );
    if let Err(err) = client.create_keyspace(&def) {
        // A co-starting node may have won the creation race
        match client.describe_keyspace(KEYSPACE)? {
            Some(existing) => {
                log::warn!("keyspace {KEYSPACE} was created concurrently: {err}");
                wait_for_agreement(client)?;
                client.set_keyspace(KEYSPACE)?;
                return Ok(existing);
            }
            None => return Err(err),
        }
    }
    wait_for_agreement(client)?;
    client.set_keyspace(KEYSPACE)?;
    Ok(def)
}

fn destagger(max_ms: u64) {
    if max_ms == 0 {
        return;
    }
    let mut bytes = [0u8; 8];
    util::get_random(&mut bytes);
    let wait = u64::from_be_bytes(bytes) % (max_ms + 1);
    log::debug!("keyspace {KEYSPACE} absent, destaggering creation by {wait} ms");
    thread::sleep(Duration::from_millis(wait));
}

/// Blocks until the whole cluster reports a single schema version.
fn wait_for_agreement(client: &dyn NodeClient) -> io::Result<()> {
    let deadline = Instant::now() + AGREEMENT_TIMEOUT;
    loop {
        let versions = client.describe_schema_versions()?;
        let live = versions.keys().filter(|v| v.as_str() != UNREACHABLE).count();
        if live <= 1 {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("cluster still reports {live} schema versions"),
            ));
        }
        thread::sleep(AGREEMENT_POLL);
    }
}

/// Builds the definition of the filesystem keyspace.
///
/// Replicas live in the analytics datacenter only; writes are durable only
/// when there is more than one of them.
pub(crate) fn keyspace_def(config: &StoreConfig) -> KeyspaceDef {
    KeyspaceDef {
        name: KEYSPACE.to_string(),
        strategy_class: STRATEGY_CLASS.to_string(),
        strategy_options: vec![
            (config.analytics_dc.clone(), config.replication.to_string()),
            (config.oltp_dc.clone(), "0".to_string()),
        ],
        durable_writes: config.replication > 1,
        families: vec![
            inode_family(Pool::Regular),
            sblocks_family(Pool::Regular),
            inode_family(Pool::Archive),
            sblocks_family(Pool::Archive),
        ],
    }
}

fn inode_family(pool: Pool) -> FamilyDef {
    let name = pool.inode_family();
    FamilyDef {
        name: name.to_string(),
        comparator: "BytesType".to_string(),
        min_compaction_threshold: min_compaction(pool),
        max_compaction_threshold: max_compaction(pool),
        memtable_flush_after_mins: Some(1),
        memtable_throughput_mb: Some(128),
        columns: vec![
            indexed(PATH_COLUMN, "UTF8Type", name),
            indexed(PARENT_PATH_COLUMN, "UTF8Type", name),
            indexed(SENTINEL_COLUMN, "BytesType", name),
            ColumnDef {
                name: DATA_COLUMN.to_vec(),
                validation: "BytesType".to_string(),
                index: None,
            },
        ],
    }
}

fn sblocks_family(pool: Pool) -> FamilyDef {
    FamilyDef {
        name: pool.sblocks_family().to_string(),
        comparator: "BytesType".to_string(),
        min_compaction_threshold: min_compaction(pool),
        max_compaction_threshold: max_compaction(pool),
        memtable_flush_after_mins: Some(1),
        memtable_throughput_mb: Some(128),
        columns: Vec::new(),
    }
}

// Archive families never compact: orphaned data stays put, and so does
// everything else.
fn min_compaction(pool: Pool) -> u32 {
    match pool {
        Pool::Regular => 4,
        Pool::Archive => 0,
    }
}

fn max_compaction(pool: Pool) -> u32 {
    match pool {
        Pool::Regular => 32,
        Pool::Archive => 0,
    }
}

fn indexed(column: &[u8], validation: &str, family: &str) -> ColumnDef {
    let suffix = String::from_utf8_lossy(column);
    ColumnDef {
        name: column.to_vec(),
        validation: validation.to_string(),
        index: Some(format!("{family}_{suffix}_idx")),
    }
}

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

//! The store: filesystem operations over the column store schema.
//!
//! One store instance serves one pool through one logical session. Instances
//! are shared between worker threads; only the compression buffers need a
//! lock, and it is never held across an RPC.

use crate::compress::CompressionContext;
use crate::config::{StoreConfig, StoreUri};
use crate::consistency::ConsistencyPolicy;
use crate::inode::{Block, INode, SubBlock};
use crate::key::{self, BlockIdGenerator};
use crate::rpc::{
    Column, IndexClause, IndexExpression, IndexOperator, Mutation, NodeClient, Pool, RowMutation,
    SlicePredicate,
};
use crate::schema::{
    self, DATA_COLUMN, PARENT_PATH_COLUMN, PATH_COLUMN, SENTINEL, SENTINEL_COLUMN,
};
use crate::stream::{BlockReader, SubBlockReader};
use crate::util;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use uuid::Uuid;

/// Hard cap on rows returned by one indexed scan. Hitting it is an error:
/// result sets are never silently truncated.
const MAX_INDEXED_ROWS: usize = 100_000;

/// Replica placement of one block, for locality-aware scheduling.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockLocation {
    /// Hostnames of the replicas, closest first.
    pub hosts: Vec<String>,
    /// Byte offset within the file.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
}

/// A handle on one storage pool of the filesystem keyspace.
pub struct Store {
    client: Arc<dyn NodeClient>,
    pool: Pool,
    endpoint: StoreUri,
    policy: ConsistencyPolicy,
    compression: Mutex<CompressionContext>,
    ids: BlockIdGenerator,
    local_host: String,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("endpoint", &self.endpoint)
            .field("policy", &self.policy)
            .field("local_host", &self.local_host)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Opens the store described by `uri` over the given session.
    ///
    /// The URI scheme selects the pool. The keyspace and its column families
    /// are created if absent; the call blocks until the cluster agrees on the
    /// schema.
    pub fn initialize(
        client: Arc<dyn NodeClient>,
        uri: &str,
        config: &StoreConfig,
    ) -> io::Result<Self> {
        let endpoint = StoreUri::parse(uri, config)?;
        let mut compression = CompressionContext::new();
        probe_codec(&mut compression)?;
        let keyspace = schema::ensure_keyspace(client.as_ref(), config)?;
        let policy = ConsistencyPolicy::new(config).for_strategy(&keyspace.strategy_class);
        log::info!(
            "store ready on {}://{}:{} (pool {:?}, read {}, write {})",
            endpoint.pool.scheme(),
            endpoint.host,
            endpoint.port,
            endpoint.pool,
            policy.read,
            policy.write
        );
        Ok(Self {
            client,
            pool: endpoint.pool,
            endpoint,
            policy,
            compression: Mutex::new(compression),
            ids: BlockIdGenerator::new(),
            local_host: util::local_hostname(),
        })
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }

    pub fn endpoint(&self) -> &StoreUri {
        &self.endpoint
    }

    pub fn local_host(&self) -> &str {
        &self.local_host
    }

    /// Returns a fresh time-based id for a new block or sub-block.
    pub fn new_block_id(&self) -> Uuid {
        self.ids.next()
    }

    pub fn version(&self) -> String {
        format!("cfs-{}", env!("CARGO_PKG_VERSION"))
    }

    /// Point read with the read-repair escalation: a miss at `ONE` is retried
    /// once at `QUORUM` before concluding absence.
    fn get_column(&self, key: &[u8], family: &str, column: &[u8]) -> io::Result<Option<Column>> {
        let got = self.client.get(key, family, column, self.policy.read)?;
        if got.is_none() {
            if let Some(level) = self.policy.escalated_read() {
                log::debug!("miss at {}, retrying at {level}", self.policy.read);
                return self.client.get(key, family, column, level);
            }
        }
        Ok(got)
    }

    /// Fetches the metadata record stored at `path`, if any.
    pub fn retrieve_inode(&self, path: &str) -> io::Result<Option<INode>> {
        let path = key::canonical(path);
        let row_key = key::path_key(&path);
        let Some(column) = self.get_column(&row_key, self.pool.inode_family(), DATA_COLUMN)?
        else {
            return Ok(None);
        };
        let mut inode = INode::deserialize(&column.value).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("inode record at {path} is corrupt: {e}"),
            )
        })?;
        inode.timestamp = column.timestamp;
        Ok(Some(inode))
    }

    /// Stores the metadata record for `path`, overwriting any previous one.
    ///
    /// For a new file every sub-block must be stored first: a reader that
    /// sees the inode follows every reference it lists.
    pub fn store_inode(&self, path: &str, inode: &INode) -> io::Result<()> {
        let path = key::canonical(path);
        let data = inode.serialize()?;
        let timestamp = util::timestamp_millis()?;
        let columns = [
            (PATH_COLUMN, path.clone().into_bytes()),
            (PARENT_PATH_COLUMN, key::parent(&path).into_bytes()),
            (SENTINEL_COLUMN, SENTINEL.to_vec()),
            (DATA_COLUMN, data),
        ];
        let mutations = columns
            .into_iter()
            .map(|(name, value)| {
                Mutation::SetColumn(Column {
                    name: name.to_vec(),
                    value,
                    timestamp,
                })
            })
            .collect();
        let row = RowMutation {
            key: key::path_key(&path),
            family: self.pool.inode_family().to_string(),
            mutations,
        };
        self.client.batch_mutate(&[row], self.policy.write)
    }

    /// Removes the metadata record at `path`. Sub-blocks are untouched; see
    /// [`Store::delete_sub_blocks`].
    pub fn delete_inode(&self, path: &str) -> io::Result<()> {
        let path = key::canonical(path);
        self.client.remove(
            &key::path_key(&path),
            self.pool.inode_family(),
            None,
            util::timestamp_millis()?,
            self.policy.write,
        )
    }

    /// Compresses and stores one sub-block payload under its parent block row.
    pub fn store_sub_block(
        &self,
        parent_block: Uuid,
        sub_block: &SubBlock,
        payload: &[u8],
    ) -> io::Result<()> {
        if payload.len() as u64 != sub_block.length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "payload is {} bytes but the sub-block length is {}",
                    payload.len(),
                    sub_block.length
                ),
            ));
        }
        let value = {
            let mut ctx = self.compression.lock();
            ctx.compress(payload)?.to_vec()
        };
        self.client.insert(
            &key::uuid_key(parent_block),
            self.pool.sblocks_family(),
            Column {
                name: key::uuid_key(sub_block.id),
                value,
                timestamp: util::timestamp_millis()?,
            },
            self.policy.write,
        )
    }

    /// Drops every sub-block row referenced by `inode` in one batch.
    pub fn delete_sub_blocks(&self, inode: &INode) -> io::Result<()> {
        if inode.blocks.is_empty() {
            return Ok(());
        }
        let timestamp = util::timestamp_millis()?;
        let rows: Vec<RowMutation> = inode
            .blocks
            .iter()
            .map(|block| RowMutation {
                key: key::uuid_key(block.id),
                family: self.pool.sblocks_family().to_string(),
                mutations: vec![Mutation::Delete {
                    timestamp,
                    columns: None,
                }],
            })
            .collect();
        self.client.batch_mutate(&rows, self.policy.write)
    }

    /// Opens a reader over one sub-block, positioned `offset` bytes in.
    ///
    /// The local hostname is passed as a locality hint: when this node holds
    /// a replica the bytes are memory-mapped from disk instead of shipped
    /// back through the RPC.
    pub fn retrieve_sub_block(
        &self,
        block: &Block,
        sub_block: &SubBlock,
        offset: u64,
    ) -> io::Result<SubBlockReader> {
        if offset > sub_block.length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "offset {offset} is beyond the sub-block length {}",
                    sub_block.length
                ),
            ));
        }
        let source = self
            .client
            .get_sub_block(
                &self.local_host,
                &key::uuid_key(block.id),
                &key::uuid_key(sub_block.id),
                0,
                self.pool,
            )?
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!(
                        "missing block: sub-block {} of block {} has no column",
                        sub_block.id, block.id
                    ),
                )
            })?;
        SubBlockReader::open(source, &self.compression, offset)
    }

    /// Opens a reader over a whole block starting `offset` bytes into it,
    /// chaining its sub-blocks.
    pub fn retrieve_block(&self, block: &Block, offset: u64) -> io::Result<BlockReader<'_>> {
        BlockReader::new(self, block, offset)
    }

    /// Shallow listing: the direct children of `path`.
    pub fn list_sub_paths(&self, path: &str) -> io::Result<BTreeSet<String>> {
        let path = key::canonical(path);
        let clause = IndexClause {
            expressions: vec![
                sentinel_expression(),
                IndexExpression {
                    column: PARENT_PATH_COLUMN.to_vec(),
                    op: IndexOperator::Eq,
                    value: path.into_bytes(),
                },
            ],
            start_key: Vec::new(),
            count: MAX_INDEXED_ROWS,
        };
        self.indexed_paths(&clause)
    }

    /// Deep listing: every descendant of `path`.
    ///
    /// The index range scan over-approximates by one sibling name prefix
    /// (listing `/p` also matches `/pa/...`), so results are filtered down to
    /// true descendants.
    pub fn list_deep_sub_paths(&self, path: &str) -> io::Result<BTreeSet<String>> {
        let path = key::canonical(path);
        let clause = IndexClause {
            expressions: vec![
                sentinel_expression(),
                IndexExpression {
                    column: PATH_COLUMN.to_vec(),
                    op: IndexOperator::Gt,
                    value: path.clone().into_bytes(),
                },
                IndexExpression {
                    column: PATH_COLUMN.to_vec(),
                    op: IndexOperator::Lt,
                    value: key::successor(&path).into_bytes(),
                },
            ],
            start_key: Vec::new(),
            count: MAX_INDEXED_ROWS,
        };
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        Ok(self
            .indexed_paths(&clause)?
            .into_iter()
            .filter(|p| p.starts_with(&prefix))
            .collect())
    }

    fn indexed_paths(&self, clause: &IndexClause) -> io::Result<BTreeSet<String>> {
        let predicate = SlicePredicate {
            column_names: vec![PATH_COLUMN.to_vec()],
        };
        let rows = self.client.get_indexed_slices(
            self.pool.inode_family(),
            clause,
            &predicate,
            self.policy.read,
        )?;
        if rows.len() >= clause.count {
            return Err(io::Error::other(format!(
                "listing matched {} rows or more; narrow the query",
                clause.count
            )));
        }
        let mut paths = BTreeSet::new();
        for row in rows {
            let Some(column) = row.columns.into_iter().find(|c| c.name == PATH_COLUMN) else {
                continue;
            };
            let path = String::from_utf8(column.value)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            paths.insert(path);
        }
        Ok(paths)
    }

    /// Resolves replica hostnames for the blocks overlapping
    /// `[start, start + len)`.
    ///
    /// The first returned offset is clamped up to `start` so schedulers can
    /// split inputs at exact byte boundaries.
    pub fn get_block_locations(
        &self,
        blocks: &[Block],
        start: u64,
        len: u64,
    ) -> io::Result<Vec<BlockLocation>> {
        let end = start.saturating_add(len);
        let wanted: Vec<&Block> = blocks
            .iter()
            .filter(|b| b.offset < end && b.end() > start)
            .collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<Vec<u8>> = wanted.iter().map(|b| key::uuid_key(b.id)).collect();
        let endpoints = self.client.describe_keys(schema::KEYSPACE, &keys)?;
        if endpoints.len() != wanted.len() {
            return Err(io::Error::other(format!(
                "endpoint discovery returned {} entries for {} blocks",
                endpoints.len(),
                wanted.len()
            )));
        }
        Ok(wanted
            .iter()
            .zip(endpoints)
            .enumerate()
            .map(|(i, (block, hosts))| BlockLocation {
                hosts,
                offset: if i == 0 {
                    start.max(block.offset)
                } else {
                    block.offset
                },
                length: block.length,
            })
            .collect())
    }
}

fn sentinel_expression() -> IndexExpression {
    IndexExpression {
        column: SENTINEL_COLUMN.to_vec(),
        op: IndexOperator::Eq,
        value: SENTINEL.to_vec(),
    }
}

/// Verifies at initialize time that the codec round-trips.
fn probe_codec(ctx: &mut CompressionContext) -> io::Result<()> {
    let sample = b"cfs codec probe";
    let compressed = ctx.compress(sample)?.to_vec();
    let ok = matches!(
        ctx.decompress(&compressed),
        crate::compress::Decompressed::Inflated(bytes) if bytes == sample
    );
    if !ok {
        return Err(io::Error::other("compression codec self-check failed"));
    }
    Ok(())
}

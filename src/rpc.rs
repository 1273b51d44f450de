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

//! RPC surface consumed from the replicated column store.
//!
//! The store talks to the cluster through [`NodeClient`]; any wire protocol
//! exposing these semantics can implement it. Every call is a blocking point.
//! Absence is an explicit value in return types, never an error.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

/// The two storage pools. Each pool is a pair of column families sharing the
/// same logical model but different compaction policies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pool {
    /// Frequently compacted; meant for short-lived job data.
    Regular,
    /// Automatic compaction disabled; meant for long-lived data.
    Archive,
}

impl Pool {
    /// Returns the pool selected by a URI scheme, if any.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "cfs" => Some(Self::Regular),
            "cfs-archive" => Some(Self::Archive),
            _ => None,
        }
    }

    pub fn scheme(self) -> &'static str {
        match self {
            Self::Regular => "cfs",
            Self::Archive => "cfs-archive",
        }
    }

    /// Name of the pool's inode metadata column family.
    pub fn inode_family(self) -> &'static str {
        match self {
            Self::Regular => "inode",
            Self::Archive => "inode_archive",
        }
    }

    /// Name of the pool's sub-block data column family.
    pub fn sblocks_family(self) -> &'static str {
        match self {
            Self::Regular => "sblocks",
            Self::Archive => "sblocks_archive",
        }
    }
}

/// Consistency level attached to every read and write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Consistency {
    One,
    Quorum,
    /// Quorum within the local datacenter only.
    LocalQuorum,
    All,
}

impl fmt::Display for Consistency {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::One => "ONE",
            Self::Quorum => "QUORUM",
            Self::LocalQuorum => "LOCAL_QUORUM",
            Self::All => "ALL",
        };
        write!(fmt, "{s}")
    }
}

/// An error occurring when parsing an unknown consistency level.
#[derive(Debug)]
pub struct InvalidConsistency(pub String);

impl fmt::Display for InvalidConsistency {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "invalid consistency level `{}`", self.0)
    }
}

impl FromStr for Consistency {
    type Err = InvalidConsistency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONE" => Ok(Self::One),
            "QUORUM" => Ok(Self::Quorum),
            "LOCAL_QUORUM" => Ok(Self::LocalQuorum),
            "ALL" => Ok(Self::All),
            _ => Err(InvalidConsistency(s.to_string())),
        }
    }
}

/// A single column: name, value and write timestamp in milliseconds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Column {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: i64,
}

/// A named group of columns.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SuperColumn {
    pub name: Vec<u8>,
    pub columns: Vec<Column>,
}

/// One change applied by a batch mutation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Mutation {
    SetColumn(Column),
    SetSuperColumn(SuperColumn),
    /// Deletes the named columns, or the whole row when `columns` is `None`.
    /// Only data written at or before `timestamp` is affected.
    Delete {
        timestamp: i64,
        columns: Option<Vec<Vec<u8>>>,
    },
}

/// All mutations for one row of one column family.
#[derive(Clone, Debug)]
pub struct RowMutation {
    pub key: Vec<u8>,
    pub family: String,
    pub mutations: Vec<Mutation>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexOperator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// One predicate of an indexed scan, comparing a column value byte-wise.
#[derive(Clone, Debug)]
pub struct IndexExpression {
    pub column: Vec<u8>,
    pub op: IndexOperator,
    pub value: Vec<u8>,
}

/// Conjunction of predicates for an indexed scan. The index API requires at
/// least one equality expression; `count` caps the number of returned rows.
#[derive(Clone, Debug)]
pub struct IndexClause {
    pub expressions: Vec<IndexExpression>,
    pub start_key: Vec<u8>,
    pub count: usize,
}

/// Columns projected out of each row matched by an indexed scan.
#[derive(Clone, Debug)]
pub struct SlicePredicate {
    pub column_names: Vec<Vec<u8>>,
}

/// One row returned by an indexed scan.
#[derive(Clone, Debug)]
pub struct IndexedRow {
    pub key: Vec<u8>,
    pub columns: Vec<Column>,
}

/// Where a sub-block's compressed bytes can be found.
#[derive(Clone, Debug)]
pub enum SubBlockSource {
    /// The co-located node owns a replica: the extent can be memory-mapped
    /// straight out of its on-disk table file.
    Local {
        path: PathBuf,
        offset: u64,
        length: u64,
    },
    /// Raw column bytes fetched from a remote replica.
    Remote(Vec<u8>),
}

/// Definition of one column of a family, with an optional KEYS index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnDef {
    pub name: Vec<u8>,
    pub validation: String,
    /// Name of the secondary index, if the column is indexed.
    pub index: Option<String>,
}

/// Definition of a column family. Compaction thresholds of zero disable
/// automatic compaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FamilyDef {
    pub name: String,
    pub comparator: String,
    pub min_compaction_threshold: u32,
    pub max_compaction_threshold: u32,
    pub memtable_flush_after_mins: Option<u32>,
    pub memtable_throughput_mb: Option<u32>,
    pub columns: Vec<ColumnDef>,
}

/// Definition of a keyspace and its families.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyspaceDef {
    pub name: String,
    pub strategy_class: String,
    /// Replication factor per datacenter name.
    pub strategy_options: Vec<(String, String)>,
    pub durable_writes: bool,
    pub families: Vec<FamilyDef>,
}

/// One logical session against the column store.
///
/// Implementations provide their own synchronization; a session is shared
/// read-only between worker threads after construction.
pub trait NodeClient: Send + Sync {
    /// Returns the definition of the named keyspace, if it exists.
    fn describe_keyspace(&self, name: &str) -> io::Result<Option<KeyspaceDef>>;

    /// Creates a keyspace and returns the resulting schema version.
    fn create_keyspace(&self, def: &KeyspaceDef) -> io::Result<String>;

    /// Returns the schema versions currently reported across the cluster,
    /// mapped to the hosts reporting them.
    fn describe_schema_versions(&self) -> io::Result<HashMap<String, Vec<String>>>;

    /// Sets the session's default keyspace.
    fn set_keyspace(&self, name: &str) -> io::Result<()>;

    /// Point read of a single column.
    fn get(
        &self,
        key: &[u8],
        family: &str,
        column: &[u8],
        consistency: Consistency,
    ) -> io::Result<Option<Column>>;

    /// Writes a single column.
    fn insert(
        &self,
        key: &[u8],
        family: &str,
        column: Column,
        consistency: Consistency,
    ) -> io::Result<()>;

    /// Applies a batch of mutations atomically per row.
    fn batch_mutate(&self, rows: &[RowMutation], consistency: Consistency) -> io::Result<()>;

    /// Removes a column, or the whole row when `column` is `None`.
    fn remove(
        &self,
        key: &[u8],
        family: &str,
        column: Option<&[u8]>,
        timestamp: i64,
        consistency: Consistency,
    ) -> io::Result<()>;

    /// Secondary-index scan. The clause must contain at least one equality
    /// expression and its row count is capped by `clause.count`.
    fn get_indexed_slices(
        &self,
        family: &str,
        clause: &IndexClause,
        predicate: &SlicePredicate,
        consistency: Consistency,
    ) -> io::Result<Vec<IndexedRow>>;

    /// Locality-aware sub-block fetch. `hostname` is the caller's host; when
    /// that node owns a replica the server answers with a local-file extent
    /// instead of shipping the bytes.
    fn get_sub_block(
        &self,
        hostname: &str,
        block_key: &[u8],
        column: &[u8],
        offset: u64,
        pool: Pool,
    ) -> io::Result<Option<SubBlockSource>>;

    /// Batched endpoint discovery: for every row key, the hostnames of the
    /// replicas holding it, closest first.
    fn describe_keys(&self, keyspace: &str, keys: &[Vec<u8>]) -> io::Result<Vec<Vec<String>>>;
}

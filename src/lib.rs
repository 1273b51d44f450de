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

//! Store layer of the Cassandra File System.
//!
//! Presents files and directories to analytics jobs while persisting both
//! metadata and contents as rows and columns of a replicated column store.
//! File bytes are laid out in two levels: logical blocks (one row each) made
//! of physical sub-blocks (one compressed column each), a shape chosen to
//! match the database's memtable and compaction economics. Directory listings
//! ride on secondary indexes over the path columns.
//!
//! The entry point is [`Store`], opened against a `cfs://` URI for frequently
//! compacted job data or `cfs-archive://` for long-lived data. The column
//! store itself is reached through the [`rpc::NodeClient`] session trait; the
//! stream-level filesystem wrapper lives above this crate.

pub mod compress;
pub mod config;
pub mod consistency;
pub mod inode;
pub mod key;
pub mod rpc;
pub mod schema;
pub mod store;
pub mod stream;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{StoreConfig, StoreUri};
pub use inode::{Block, FileKind, INode, SubBlock};
pub use rpc::{Consistency, NodeClient, Pool};
pub use store::{BlockLocation, Store};
pub use stream::{BlockReader, SubBlockReader};

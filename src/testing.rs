//! In-memory column store used by the tests.
//!
//! Implements the full [`NodeClient`] surface against plain maps: timestamped
//! last-writer-wins upserts, row tombstones, indexed scans with the mandatory
//! equality predicate, and the locality contract of `get_sub_block` (serving
//! extents out of real files when a directory is provided).

use crate::rpc::{
    Column, Consistency, IndexClause, IndexOperator, IndexedRow, KeyspaceDef, Mutation, NodeClient,
    Pool, RowMutation, SlicePredicate, SubBlockSource,
};
use crate::util;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

type Rows = BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, Column>>;

/// Junk prefix written before each locally served extent, so readers must
/// honor the descriptor's offset.
const LOCAL_FILE_PREFIX: usize = 37;

#[derive(Default)]
struct State {
    keyspace: Option<KeyspaceDef>,
    current_keyspace: Option<String>,
    families: HashMap<String, Rows>,
    ops: Vec<(&'static str, Consistency)>,
    hide_at_one: bool,
    local_dir: Option<PathBuf>,
    local_count: usize,
}

pub(crate) struct MemoryNode {
    state: Mutex<State>,
}

impl MemoryNode {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Serve `get_sub_block` responses as local-file descriptors materialized
    /// under `dir`, instead of remote payloads.
    pub fn serve_local_from(&self, dir: &Path) {
        self.state.lock().local_dir = Some(dir.to_path_buf());
    }

    /// Makes reads at `ONE` miss even when the column exists, emulating a
    /// replica the write has not reached yet.
    pub fn hide_reads_at_one(&self) {
        self.state.lock().hide_at_one = true;
    }

    /// Every recorded `(operation, consistency)` pair, in call order.
    pub fn ops(&self) -> Vec<(&'static str, Consistency)> {
        self.state.lock().ops.clone()
    }

    pub fn keyspace_def(&self) -> Option<KeyspaceDef> {
        self.state.lock().keyspace.clone()
    }

    pub fn row_count(&self, family: &str) -> usize {
        self.state
            .lock()
            .families
            .get(family)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    pub fn has_row(&self, family: &str, key: &[u8]) -> bool {
        self.state
            .lock()
            .families
            .get(family)
            .is_some_and(|rows| rows.contains_key(key))
    }

    /// Writes a raw column, bypassing the store's compression. Used to plant
    /// legacy uncompressed sub-blocks.
    pub fn put_raw_column(&self, family: &str, key: &[u8], name: &[u8], value: &[u8]) {
        let mut state = self.state.lock();
        let rows = state.families.entry(family.to_string()).or_default();
        upsert(
            rows,
            key,
            Column {
                name: name.to_vec(),
                value: value.to_vec(),
                timestamp: util::timestamp_millis().unwrap(),
            },
        );
    }
}

fn upsert(rows: &mut Rows, key: &[u8], column: Column) {
    let row = rows.entry(key.to_vec()).or_default();
    match row.get(&column.name) {
        Some(existing) if existing.timestamp > column.timestamp => {}
        _ => {
            row.insert(column.name.clone(), column);
        }
    }
}

fn tombstone(rows: &mut Rows, key: &[u8], names: Option<&[Vec<u8>]>, timestamp: i64) {
    let Some(row) = rows.get_mut(key) else {
        return;
    };
    match names {
        None => row.retain(|_, c| c.timestamp > timestamp),
        Some(names) => {
            for name in names {
                if row.get(name).is_some_and(|c| c.timestamp <= timestamp) {
                    row.remove(name);
                }
            }
        }
    }
    if row.is_empty() {
        rows.remove(key);
    }
}

fn matches(op: IndexOperator, actual: &[u8], expected: &[u8]) -> bool {
    match op {
        IndexOperator::Eq => actual == expected,
        IndexOperator::Gt => actual > expected,
        IndexOperator::Gte => actual >= expected,
        IndexOperator::Lt => actual < expected,
        IndexOperator::Lte => actual <= expected,
    }
}

fn unknown_family(family: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unknown column family `{family}`"),
    )
}

impl NodeClient for MemoryNode {
    fn describe_keyspace(&self, name: &str) -> io::Result<Option<KeyspaceDef>> {
        let state = self.state.lock();
        Ok(state.keyspace.clone().filter(|ks| ks.name == name))
    }

    fn create_keyspace(&self, def: &KeyspaceDef) -> io::Result<String> {
        let mut state = self.state.lock();
        state.ops.push(("create_keyspace", Consistency::All));
        if state.keyspace.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("keyspace {} already exists", def.name),
            ));
        }
        for family in &def.families {
            state.families.insert(family.name.clone(), Rows::new());
        }
        state.keyspace = Some(def.clone());
        Ok("schema-v1".to_string())
    }

    fn describe_schema_versions(&self) -> io::Result<HashMap<String, Vec<String>>> {
        Ok(HashMap::from([(
            "schema-v1".to_string(),
            vec![util::local_hostname()],
        )]))
    }

    fn set_keyspace(&self, name: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.keyspace.as_ref().map(|ks| ks.name.as_str()) != Some(name) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("keyspace {name} does not exist"),
            ));
        }
        state.current_keyspace = Some(name.to_string());
        Ok(())
    }

    fn get(
        &self,
        key: &[u8],
        family: &str,
        column: &[u8],
        consistency: Consistency,
    ) -> io::Result<Option<Column>> {
        let mut state = self.state.lock();
        state.ops.push(("get", consistency));
        if state.hide_at_one && consistency == Consistency::One {
            return Ok(None);
        }
        let rows = state.families.get(family).ok_or_else(|| unknown_family(family))?;
        Ok(rows.get(key).and_then(|row| row.get(column)).cloned())
    }

    fn insert(
        &self,
        key: &[u8],
        family: &str,
        column: Column,
        consistency: Consistency,
    ) -> io::Result<()> {
        let mut state = self.state.lock();
        state.ops.push(("insert", consistency));
        let rows = state
            .families
            .get_mut(family)
            .ok_or_else(|| unknown_family(family))?;
        upsert(rows, key, column);
        Ok(())
    }

    fn batch_mutate(&self, rows: &[RowMutation], consistency: Consistency) -> io::Result<()> {
        let mut state = self.state.lock();
        state.ops.push(("batch_mutate", consistency));
        for row in rows {
            let family_rows = state
                .families
                .get_mut(&row.family)
                .ok_or_else(|| unknown_family(&row.family))?;
            for mutation in &row.mutations {
                match mutation {
                    Mutation::SetColumn(column) => upsert(family_rows, &row.key, column.clone()),
                    Mutation::SetSuperColumn(sc) => {
                        for column in &sc.columns {
                            let name = [sc.name.as_slice(), b":", column.name.as_slice()].concat();
                            upsert(
                                family_rows,
                                &row.key,
                                Column {
                                    name,
                                    value: column.value.clone(),
                                    timestamp: column.timestamp,
                                },
                            );
                        }
                    }
                    Mutation::Delete { timestamp, columns } => {
                        tombstone(family_rows, &row.key, columns.as_deref(), *timestamp)
                    }
                }
            }
        }
        Ok(())
    }

    fn remove(
        &self,
        key: &[u8],
        family: &str,
        column: Option<&[u8]>,
        timestamp: i64,
        consistency: Consistency,
    ) -> io::Result<()> {
        let mut state = self.state.lock();
        state.ops.push(("remove", consistency));
        let rows = state
            .families
            .get_mut(family)
            .ok_or_else(|| unknown_family(family))?;
        let names = column.map(|c| vec![c.to_vec()]);
        tombstone(rows, key, names.as_deref(), timestamp);
        Ok(())
    }

    fn get_indexed_slices(
        &self,
        family: &str,
        clause: &IndexClause,
        predicate: &SlicePredicate,
        consistency: Consistency,
    ) -> io::Result<Vec<IndexedRow>> {
        let mut state = self.state.lock();
        state.ops.push(("get_indexed_slices", consistency));
        if !clause
            .expressions
            .iter()
            .any(|e| e.op == IndexOperator::Eq)
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "indexed scan requires at least one equality expression",
            ));
        }
        let rows = state.families.get(family).ok_or_else(|| unknown_family(family))?;
        let mut out = Vec::new();
        for (key, row) in rows {
            if key.as_slice() < clause.start_key.as_slice() {
                continue;
            }
            let hit = clause.expressions.iter().all(|e| {
                row.get(&e.column)
                    .is_some_and(|c| matches(e.op, &c.value, &e.value))
            });
            if !hit {
                continue;
            }
            let columns = predicate
                .column_names
                .iter()
                .filter_map(|name| row.get(name).cloned())
                .collect();
            out.push(IndexedRow {
                key: key.clone(),
                columns,
            });
            if out.len() >= clause.count {
                break;
            }
        }
        Ok(out)
    }

    fn get_sub_block(
        &self,
        _hostname: &str,
        block_key: &[u8],
        column: &[u8],
        _offset: u64,
        pool: Pool,
    ) -> io::Result<Option<SubBlockSource>> {
        let mut state = self.state.lock();
        let family = pool.sblocks_family();
        let rows = state.families.get(family).ok_or_else(|| unknown_family(family))?;
        let Some(value) = rows
            .get(block_key)
            .and_then(|row| row.get(column))
            .map(|c| c.value.clone())
        else {
            return Ok(None);
        };
        let Some(dir) = state.local_dir.clone() else {
            return Ok(Some(SubBlockSource::Remote(value)));
        };
        // The caller is a replica: materialize the extent in a table file
        state.local_count += 1;
        let path = dir.join(format!("table-{}.db", state.local_count));
        let mut file = File::create(&path)?;
        file.write_all(&vec![0xab; LOCAL_FILE_PREFIX])?;
        file.write_all(&value)?;
        Ok(Some(SubBlockSource::Local {
            path,
            offset: LOCAL_FILE_PREFIX as u64,
            length: value.len() as u64,
        }))
    }

    fn describe_keys(&self, _keyspace: &str, keys: &[Vec<u8>]) -> io::Result<Vec<Vec<String>>> {
        Ok(keys
            .iter()
            .map(|_| vec![util::local_hostname(), "replica-2.example".to_string()])
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{IndexExpression, SuperColumn};

    fn node_with_family(family: &str) -> MemoryNode {
        let node = MemoryNode::new();
        node.state
            .lock()
            .families
            .insert(family.to_string(), Rows::new());
        node
    }

    #[test]
    fn super_column_mutations_flatten() {
        let node = node_with_family("cf");
        let row = RowMutation {
            key: b"row".to_vec(),
            family: "cf".to_string(),
            mutations: vec![Mutation::SetSuperColumn(SuperColumn {
                name: b"group".to_vec(),
                columns: vec![
                    Column {
                        name: b"a".to_vec(),
                        value: b"1".to_vec(),
                        timestamp: 1,
                    },
                    Column {
                        name: b"b".to_vec(),
                        value: b"2".to_vec(),
                        timestamp: 1,
                    },
                ],
            })],
        };
        node.batch_mutate(&[row], Consistency::Quorum).unwrap();
        let got = node
            .get(b"row", "cf", b"group:a", Consistency::Quorum)
            .unwrap()
            .unwrap();
        assert_eq!(got.value, b"1".to_vec());
    }

    #[test]
    fn tombstones_spare_newer_writes() {
        let node = node_with_family("cf");
        let column = |timestamp: i64| Column {
            name: b"c".to_vec(),
            value: b"v".to_vec(),
            timestamp,
        };
        node.insert(b"row", "cf", column(10), Consistency::Quorum)
            .unwrap();
        node.remove(b"row", "cf", None, 5, Consistency::Quorum)
            .unwrap();
        assert!(node.has_row("cf", b"row"));
        node.remove(b"row", "cf", None, 10, Consistency::Quorum)
            .unwrap();
        assert!(!node.has_row("cf", b"row"));

        // Stale writes lose to what is already there
        node.insert(b"row", "cf", column(10), Consistency::Quorum)
            .unwrap();
        node.insert(
            b"row",
            "cf",
            Column {
                name: b"c".to_vec(),
                value: b"stale".to_vec(),
                timestamp: 3,
            },
            Consistency::Quorum,
        )
        .unwrap();
        let got = node
            .get(b"row", "cf", b"c", Consistency::Quorum)
            .unwrap()
            .unwrap();
        assert_eq!(got.value, b"v".to_vec());
    }

    #[test]
    fn indexed_scan_requires_equality() {
        let node = node_with_family("cf");
        let clause = IndexClause {
            expressions: vec![IndexExpression {
                column: b"path".to_vec(),
                op: IndexOperator::Gt,
                value: b"/".to_vec(),
            }],
            start_key: Vec::new(),
            count: 10,
        };
        let predicate = SlicePredicate {
            column_names: vec![b"path".to_vec()],
        };
        let err = node
            .get_indexed_slices("cf", &clause, &predicate, Consistency::Quorum)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn indexed_scan_honors_row_cap() {
        let node = node_with_family("cf");
        for i in 0..5u8 {
            node.insert(
                &[i],
                "cf",
                Column {
                    name: b"s".to_vec(),
                    value: b"x".to_vec(),
                    timestamp: 1,
                },
                Consistency::Quorum,
            )
            .unwrap();
        }
        let clause = IndexClause {
            expressions: vec![IndexExpression {
                column: b"s".to_vec(),
                op: IndexOperator::Eq,
                value: b"x".to_vec(),
            }],
            start_key: Vec::new(),
            count: 3,
        };
        let predicate = SlicePredicate {
            column_names: vec![b"s".to_vec()],
        };
        let rows = node
            .get_indexed_slices("cf", &clause, &predicate, Consistency::Quorum)
            .unwrap();
        assert_eq!(rows.len(), 3);
    }
}

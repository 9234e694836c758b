// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::analysis::expr::{Expr, OriginStatement};
use crate::catalog::column::Column;
use crate::catalog::partition::Partition;
use crate::catalog::system_info::SystemInfoService;
use crate::catalog::tablet::ReplicaState;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OlapTableState {
    Normal,
    Rollup,
    SchemaChange,
    /// An alter job is waiting for the table's tablets to become healthy.
    WaitingStable,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeysType {
    DupKeys,
    AggKeys,
    UniqueKeys,
    PrimaryKeys,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageType {
    Column,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressionType {
    Lz4Frame,
    Zstd,
    Zlib,
    Snappy,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexType {
    Bitmap,
    Gin,
    NgramBf,
}

/// Secondary (bitmap / inverted) index declared on table columns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryIndex {
    pub index_id: i64,
    pub index_name: String,
    pub columns: Vec<String>,
    pub index_type: IndexType,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaterializedIndexMeta {
    pub index_id: i64,
    pub schema: Vec<Column>,
    pub schema_version: i32,
    pub schema_hash: i32,
    pub short_key_column_count: i16,
    pub storage_type: StorageType,
    pub keys_type: KeysType,
    pub orig_stmt: Option<OriginStatement>,
    pub db_id: i64,
    pub view_define_sql: Option<String>,
    pub is_colocate_mv_index: bool,
    pub where_clause: Option<Expr>,
}

/// Everything `OlapTable::set_index_meta` needs to register an index schema.
#[derive(Clone, Debug)]
pub struct IndexMetaDef {
    pub index_id: i64,
    pub index_name: String,
    pub schema: Vec<Column>,
    pub schema_version: i32,
    pub schema_hash: i32,
    pub short_key_column_count: i16,
    pub storage_type: StorageType,
    pub keys_type: KeysType,
    pub orig_stmt: Option<OriginStatement>,
}

#[derive(Clone, Debug)]
pub struct OlapTable {
    pub id: i64,
    pub name: String,
    pub state: OlapTableState,
    pub keys_type: KeysType,
    pub base_index_id: i64,
    index_name_to_id: BTreeMap<String, i64>,
    index_id_to_meta: BTreeMap<i64, MaterializedIndexMeta>,
    partitions: BTreeMap<i64, Partition>,
    pub bf_columns: Vec<String>,
    pub bf_fpp: f64,
    pub indexes: Vec<SecondaryIndex>,
    pub enable_persistent_index: bool,
    pub primary_index_cache_expire_sec: i32,
    pub compression_type: CompressionType,
    pub compression_level: i32,
    full_schema: Vec<Column>,
    pub last_schema_update_time_ns: i64,
}

impl OlapTable {
    pub fn new(id: i64, name: impl Into<String>, keys_type: KeysType, base: IndexMetaDef) -> Self {
        let base_index_id = base.index_id;
        let mut table = Self {
            id,
            name: name.into(),
            state: OlapTableState::Normal,
            keys_type,
            base_index_id,
            index_name_to_id: BTreeMap::new(),
            index_id_to_meta: BTreeMap::new(),
            partitions: BTreeMap::new(),
            bf_columns: Vec::new(),
            bf_fpp: 0.05,
            indexes: Vec::new(),
            enable_persistent_index: false,
            primary_index_cache_expire_sec: 0,
            compression_type: CompressionType::Lz4Frame,
            compression_level: -1,
            full_schema: Vec::new(),
            last_schema_update_time_ns: 0,
        };
        table.set_index_meta(base);
        table.rebuild_full_schema();
        table
    }

    pub fn add_partition(&mut self, partition: Partition) {
        self.partitions.insert(partition.id, partition);
    }

    pub fn partition(&self, partition_id: i64) -> Option<&Partition> {
        self.partitions.get(&partition_id)
    }

    pub fn partition_mut(&mut self, partition_id: i64) -> Option<&mut Partition> {
        self.partitions.get_mut(&partition_id)
    }

    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    pub fn partitions_mut(&mut self) -> impl Iterator<Item = &mut Partition> {
        self.partitions.values_mut()
    }

    pub fn base_schema(&self) -> &[Column] {
        self.index_id_to_meta
            .get(&self.base_index_id)
            .map(|m| m.schema.as_slice())
            .unwrap_or(&[])
    }

    pub fn full_schema(&self) -> &[Column] {
        &self.full_schema
    }

    /// Base schema column, case-insensitive.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.base_schema().iter().find(|c| c.name_eq(name))
    }

    pub fn index_meta(&self, index_id: i64) -> Option<&MaterializedIndexMeta> {
        self.index_id_to_meta.get(&index_id)
    }

    pub fn index_meta_mut(&mut self, index_id: i64) -> Option<&mut MaterializedIndexMeta> {
        self.index_id_to_meta.get_mut(&index_id)
    }

    pub fn index_id_by_name(&self, index_name: &str) -> Option<i64> {
        self.index_name_to_id.get(index_name).copied()
    }

    pub fn index_name_by_id(&self, index_id: i64) -> Option<&str> {
        self.index_name_to_id
            .iter()
            .find(|(_, id)| **id == index_id)
            .map(|(name, _)| name.as_str())
    }

    pub fn has_index_name(&self, index_name: &str) -> bool {
        self.index_name_to_id.contains_key(index_name)
    }

    /// Registers (or overwrites) the schema of an index.
    pub fn set_index_meta(&mut self, def: IndexMetaDef) -> &mut MaterializedIndexMeta {
        let index_id = def.index_id;
        self.index_name_to_id.insert(def.index_name, index_id);
        let meta = MaterializedIndexMeta {
            index_id,
            schema: def.schema,
            schema_version: def.schema_version,
            schema_hash: def.schema_hash,
            short_key_column_count: def.short_key_column_count,
            storage_type: def.storage_type,
            keys_type: def.keys_type,
            orig_stmt: def.orig_stmt,
            db_id: -1,
            view_define_sql: None,
            is_colocate_mv_index: false,
            where_clause: None,
        };
        match self.index_id_to_meta.entry(index_id) {
            Entry::Occupied(mut entry) => {
                entry.insert(meta);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(meta),
        }
    }

    /// Drops name and schema of an index. Returns false when the name is unknown.
    pub fn delete_index_info(&mut self, index_name: &str) -> bool {
        match self.index_name_to_id.remove(index_name) {
            Some(index_id) => {
                self.index_id_to_meta.remove(&index_id);
                true
            }
            None => false,
        }
    }

    /// Base columns first, then every column introduced by another index, deduplicated by name.
    pub fn rebuild_full_schema(&mut self) {
        let mut full_schema: Vec<Column> = self.base_schema().to_vec();
        let mut seen: HashSet<String> = full_schema
            .iter()
            .map(|c| c.name.to_ascii_lowercase())
            .collect();
        for (index_id, meta) in &self.index_id_to_meta {
            if *index_id == self.base_index_id {
                continue;
            }
            for column in &meta.schema {
                if seen.insert(column.name.to_ascii_lowercase()) {
                    full_schema.push(column.clone());
                }
            }
        }
        self.full_schema = full_schema;
    }

    /// Subset of `indexes` whose columns all appear in `schema`.
    pub fn indexes_by_schema(indexes: &[SecondaryIndex], schema: &[Column]) -> Vec<SecondaryIndex> {
        indexes
            .iter()
            .filter(|index| {
                index
                    .columns
                    .iter()
                    .all(|name| schema.iter().any(|c| c.name_eq(name)))
            })
            .cloned()
            .collect()
    }

    /// Every tablet of every visible index has at least `replication_num` replicas that are
    /// NORMAL, without failed versions and on an available backend.
    pub fn is_stable(&self, system_info: &SystemInfoService) -> bool {
        self.partitions.values().all(|partition| {
            let required = usize::try_from(partition.replication_num).unwrap_or(0);
            partition.visible_indexes().all(|index| {
                index.tablets.iter().all(|tablet| {
                    let healthy = tablet
                        .replicas
                        .iter()
                        .filter(|r| {
                            r.state == ReplicaState::Normal
                                && r.last_failed_version < 0
                                && system_info.check_backend_available(r.backend_id)
                        })
                        .count();
                    healthy >= required
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{IndexMetaDef, IndexType, KeysType, OlapTable, SecondaryIndex, StorageType};
    use crate::catalog::column::{Column, PrimitiveType};

    fn index_def(index_id: i64, name: &str, schema: Vec<Column>) -> IndexMetaDef {
        IndexMetaDef {
            index_id,
            index_name: name.to_string(),
            schema,
            schema_version: 0,
            schema_hash: 1,
            short_key_column_count: 1,
            storage_type: StorageType::Column,
            keys_type: KeysType::DupKeys,
            orig_stmt: None,
        }
    }

    #[test]
    fn full_schema_appends_rollup_only_columns() {
        let mut table = OlapTable::new(
            1,
            "t",
            KeysType::DupKeys,
            index_def(
                10,
                "t",
                vec![
                    Column::new("k1", PrimitiveType::Int, true),
                    Column::new("v1", PrimitiveType::Bigint, false),
                ],
            ),
        );
        table.set_index_meta(index_def(
            20,
            "r1",
            vec![
                Column::new("K1", PrimitiveType::Int, true),
                Column::new("mv_count_v1", PrimitiveType::Bigint, false),
            ],
        ));
        table.rebuild_full_schema();
        let names: Vec<&str> = table.full_schema().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["k1", "v1", "mv_count_v1"]);

        assert!(table.delete_index_info("r1"));
        assert!(!table.delete_index_info("r1"));
        table.rebuild_full_schema();
        assert_eq!(table.full_schema().len(), 2);
    }

    #[test]
    fn secondary_indexes_follow_schema_columns() {
        let indexes = vec![
            SecondaryIndex {
                index_id: 1,
                index_name: "idx_k1".to_string(),
                columns: vec!["k1".to_string()],
                index_type: IndexType::Bitmap,
            },
            SecondaryIndex {
                index_id: 2,
                index_name: "idx_v2".to_string(),
                columns: vec!["v2".to_string()],
                index_type: IndexType::Bitmap,
            },
        ];
        let schema = vec![Column::new("k1", PrimitiveType::Int, true)];
        let kept = OlapTable::indexes_by_schema(&indexes, &schema);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].index_name, "idx_k1");
    }
}

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
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::tablet::{IndexState, MaterializedIndex, PARTITION_INIT_VERSION};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageMedium {
    Hdd,
    Ssd,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TabletType {
    Disk,
    Lake,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub id: i64,
    pub name: String,
    pub visible_version: i64,
    pub replication_num: i16,
    pub storage_medium: StorageMedium,
    pub tablet_type: TabletType,
    visible_indexes: BTreeMap<i64, MaterializedIndex>,
    shadow_indexes: BTreeMap<i64, MaterializedIndex>,
}

impl Partition {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        replication_num: i16,
        base_index: MaterializedIndex,
    ) -> Self {
        let mut visible_indexes = BTreeMap::new();
        visible_indexes.insert(base_index.id, base_index);
        Self {
            id,
            name: name.into(),
            visible_version: PARTITION_INIT_VERSION,
            replication_num,
            storage_medium: StorageMedium::Hdd,
            tablet_type: TabletType::Disk,
            visible_indexes,
            shadow_indexes: BTreeMap::new(),
        }
    }

    /// Installs a rollup index. Shadow indexes stay invisible to queries. Re-installing the
    /// same index id replaces the previous copy.
    pub fn create_rollup_index(&mut self, index: MaterializedIndex) {
        match index.state {
            IndexState::Shadow => {
                self.shadow_indexes.insert(index.id, index);
            }
            IndexState::Normal => {
                self.visible_indexes.insert(index.id, index);
            }
        }
    }

    /// Moves a shadow index into the queryable set. Returns false when no such shadow index
    /// exists (for example it was already made visible).
    pub fn visualise_shadow_index(&mut self, index_id: i64) -> bool {
        match self.shadow_indexes.remove(&index_id) {
            Some(mut index) => {
                index.state = IndexState::Normal;
                self.visible_indexes.insert(index_id, index);
                true
            }
            None => false,
        }
    }

    pub fn delete_rollup_index(&mut self, index_id: i64) -> Option<MaterializedIndex> {
        self.shadow_indexes
            .remove(&index_id)
            .or_else(|| self.visible_indexes.remove(&index_id))
    }

    pub fn index(&self, index_id: i64) -> Option<&MaterializedIndex> {
        self.visible_indexes
            .get(&index_id)
            .or_else(|| self.shadow_indexes.get(&index_id))
    }

    pub fn index_mut(&mut self, index_id: i64) -> Option<&mut MaterializedIndex> {
        if self.visible_indexes.contains_key(&index_id) {
            return self.visible_indexes.get_mut(&index_id);
        }
        self.shadow_indexes.get_mut(&index_id)
    }

    pub fn visible_indexes(&self) -> impl Iterator<Item = &MaterializedIndex> {
        self.visible_indexes.values()
    }

    pub fn shadow_indexes(&self) -> impl Iterator<Item = &MaterializedIndex> {
        self.shadow_indexes.values()
    }

    pub fn is_shadow(&self, index_id: i64) -> bool {
        self.shadow_indexes.contains_key(&index_id)
    }
}

#[cfg(test)]
mod tests {
    use super::Partition;
    use crate::catalog::tablet::{IndexState, MaterializedIndex};

    #[test]
    fn shadow_index_becomes_visible_once() {
        let mut partition = Partition::new(1, "p1", 3, MaterializedIndex::new(10, IndexState::Normal));
        partition.create_rollup_index(MaterializedIndex::new(20, IndexState::Shadow));
        assert!(partition.is_shadow(20));
        assert_eq!(partition.visible_indexes().count(), 1);

        assert!(partition.visualise_shadow_index(20));
        assert!(!partition.visualise_shadow_index(20));
        assert_eq!(partition.index(20).map(|i| i.state), Some(IndexState::Normal));
        assert_eq!(partition.visible_indexes().count(), 2);
    }

    #[test]
    fn reinstalling_shadow_index_is_idempotent() {
        let mut partition = Partition::new(1, "p1", 3, MaterializedIndex::new(10, IndexState::Normal));
        partition.create_rollup_index(MaterializedIndex::new(20, IndexState::Shadow));
        partition.create_rollup_index(MaterializedIndex::new(20, IndexState::Shadow));
        assert_eq!(partition.shadow_indexes().count(), 1);
        assert!(partition.delete_rollup_index(20).is_some());
        assert!(partition.delete_rollup_index(20).is_none());
    }
}

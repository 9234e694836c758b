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
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use crate::catalog::partition::StorageMedium;
use crate::catalog::tablet::Replica;

/// Where a tablet lives in the catalog hierarchy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TabletMeta {
    pub db_id: i64,
    pub table_id: i64,
    pub partition_id: i64,
    pub index_id: i64,
    pub storage_medium: StorageMedium,
}

#[derive(Debug, Default)]
struct InvertedIndexInner {
    tablet_meta: HashMap<i64, TabletMeta>,
    // tablet id -> backend id -> replica
    replica_meta: HashMap<i64, BTreeMap<i64, Replica>>,
    // backend id -> tablet ids
    backing: HashMap<i64, BTreeSet<i64>>,
}

/// Reverse lookup from tablets and storage nodes to catalog positions, consulted when nodes
/// report their tablets. Every insertion is idempotent so log replay can repeat it.
#[derive(Debug, Default)]
pub struct TabletInvertedIndex {
    inner: RwLock<InvertedIndexInner>,
}

impl TabletInvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tablet(&self, tablet_id: i64, meta: TabletMeta) {
        let mut guard = self.inner.write().expect("inverted index lock");
        guard.tablet_meta.insert(tablet_id, meta);
    }

    pub fn add_replica(&self, tablet_id: i64, replica: Replica) -> Result<(), String> {
        let mut guard = self.inner.write().expect("inverted index lock");
        if !guard.tablet_meta.contains_key(&tablet_id) {
            return Err(format!(
                "add replica to unknown tablet: tablet_id={tablet_id} backend_id={}",
                replica.backend_id
            ));
        }
        guard
            .backing
            .entry(replica.backend_id)
            .or_default()
            .insert(tablet_id);
        guard
            .replica_meta
            .entry(tablet_id)
            .or_default()
            .insert(replica.backend_id, replica);
        Ok(())
    }

    pub fn delete_tablet(&self, tablet_id: i64) {
        let mut guard = self.inner.write().expect("inverted index lock");
        guard.tablet_meta.remove(&tablet_id);
        if let Some(replicas) = guard.replica_meta.remove(&tablet_id) {
            for backend_id in replicas.keys() {
                if let Some(tablets) = guard.backing.get_mut(backend_id) {
                    tablets.remove(&tablet_id);
                }
            }
        }
    }

    pub fn tablet_meta(&self, tablet_id: i64) -> Option<TabletMeta> {
        let guard = self.inner.read().expect("inverted index lock");
        guard.tablet_meta.get(&tablet_id).copied()
    }

    pub fn replica(&self, tablet_id: i64, backend_id: i64) -> Option<Replica> {
        let guard = self.inner.read().expect("inverted index lock");
        guard
            .replica_meta
            .get(&tablet_id)
            .and_then(|replicas| replicas.get(&backend_id))
            .cloned()
    }

    pub fn replicas_of(&self, tablet_id: i64) -> Vec<Replica> {
        let guard = self.inner.read().expect("inverted index lock");
        guard
            .replica_meta
            .get(&tablet_id)
            .map(|replicas| replicas.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tablet_ids_on_backend(&self, backend_id: i64) -> Vec<i64> {
        let guard = self.inner.read().expect("inverted index lock");
        guard
            .backing
            .get(&backend_id)
            .map(|tablets| tablets.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains_tablet(&self, tablet_id: i64) -> bool {
        let guard = self.inner.read().expect("inverted index lock");
        guard.tablet_meta.contains_key(&tablet_id)
    }

    pub fn tablet_count(&self) -> usize {
        let guard = self.inner.read().expect("inverted index lock");
        guard.tablet_meta.len()
    }
}

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

use crate::catalog::inverted_index::{TabletInvertedIndex, TabletMeta};
use crate::catalog::metastore::Catalog;
use crate::catalog::partition::Partition;
use crate::catalog::table::OlapTable;
use crate::catalog::tablet::{
    IndexState, MaterializedIndex, PARTITION_INIT_VERSION, Replica, ReplicaState, Tablet,
};

/// Shadow topology of a rollup index across every partition of a table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShadowIndexPlan {
    /// partition id -> rollup tablet id -> base tablet id
    pub partition_id_to_base_rollup_tablet_ids: BTreeMap<i64, BTreeMap<i64, i64>>,
    pub partition_id_to_rollup_index: BTreeMap<i64, MaterializedIndex>,
}

impl ShadowIndexPlan {
    pub fn replica_count(&self) -> usize {
        self.partition_id_to_rollup_index
            .values()
            .map(MaterializedIndex::replica_count)
            .sum()
    }
}

/// Allocates one shadow tablet per base tablet and one shadow replica per placeable base
/// replica, on the same backend as that base replica.
///
/// Base replicas in CLONE or DECOMMISSION state or with a failed version are skipped. Fails when
/// the base index is missing from a partition, when a remaining replica sits on an unavailable
/// backend, or when a tablet keeps fewer than a majority of its replicas.
pub fn materialize_shadow_index(
    catalog: &dyn Catalog,
    table: &OlapTable,
    base_index_id: i64,
    rollup_index_id: i64,
    rollup_schema_hash: i32,
) -> Result<ShadowIndexPlan, String> {
    let mut plan = ShadowIndexPlan::default();
    for partition in table.partitions() {
        let (index, tablet_map) = materialize_partition(
            catalog,
            partition,
            base_index_id,
            rollup_index_id,
            rollup_schema_hash,
        )?;
        plan.partition_id_to_base_rollup_tablet_ids
            .insert(partition.id, tablet_map);
        plan.partition_id_to_rollup_index.insert(partition.id, index);
    }
    Ok(plan)
}

fn materialize_partition(
    catalog: &dyn Catalog,
    partition: &Partition,
    base_index_id: i64,
    rollup_index_id: i64,
    rollup_schema_hash: i32,
) -> Result<(MaterializedIndex, BTreeMap<i64, i64>), String> {
    let base_index = partition.index(base_index_id).ok_or_else(|| {
        format!(
            "base index {base_index_id} not found in partition {}",
            partition.name
        )
    })?;
    let quorum = usize::try_from(partition.replication_num / 2 + 1).unwrap_or(1);
    let mut rollup_index = MaterializedIndex::new(rollup_index_id, IndexState::Shadow);
    let mut tablet_map = BTreeMap::new();

    for base_tablet in &base_index.tablets {
        let rollup_tablet_id = catalog.next_id();
        let mut rollup_tablet = Tablet::new(rollup_tablet_id);
        for base_replica in &base_tablet.replicas {
            if matches!(
                base_replica.state,
                ReplicaState::Clone | ReplicaState::Decommission
            ) || base_replica.last_failed_version > 0
            {
                tracing::info!(
                    tablet_id = base_tablet.id,
                    replica_id = base_replica.id,
                    backend_id = base_replica.backend_id,
                    state = ?base_replica.state,
                    last_failed_version = base_replica.last_failed_version,
                    "skip base replica when creating rollup replicas"
                );
                continue;
            }
            if base_replica.state != ReplicaState::Normal {
                return Err(format!(
                    "base replica {} of tablet {} is in state {:?}",
                    base_replica.id, base_tablet.id, base_replica.state
                ));
            }
            if !catalog
                .system_info()
                .check_backend_available(base_replica.backend_id)
            {
                return Err(format!(
                    "backend {} of tablet {} is not available",
                    base_replica.backend_id, base_tablet.id
                ));
            }
            rollup_tablet.add_replica(Replica::new(
                catalog.next_id(),
                base_replica.backend_id,
                ReplicaState::Alter,
                PARTITION_INIT_VERSION,
                rollup_schema_hash,
            ));
        }
        if rollup_tablet.replicas.len() < quorum {
            return Err(format!(
                "tablet {} has few healthy replicas: {}",
                base_tablet.id,
                rollup_tablet.replicas.len()
            ));
        }
        tablet_map.insert(rollup_tablet_id, base_tablet.id);
        rollup_index.add_tablet(rollup_tablet);
    }
    Ok((rollup_index, tablet_map))
}

/// Registers shadow tablets and replicas for tablet reports. Safe to repeat.
pub fn register_shadow_tablets(
    inverted_index: &TabletInvertedIndex,
    meta: TabletMeta,
    index: &MaterializedIndex,
) -> Result<(), String> {
    for tablet in &index.tablets {
        inverted_index.add_tablet(tablet.id, meta);
        for replica in &tablet.replicas {
            inverted_index.add_replica(tablet.id, replica.clone())?;
        }
    }
    Ok(())
}

pub fn unregister_shadow_tablets(inverted_index: &TabletInvertedIndex, index: &MaterializedIndex) {
    for tablet in &index.tablets {
        inverted_index.delete_tablet(tablet.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{materialize_shadow_index, register_shadow_tablets, unregister_shadow_tablets};
    use crate::catalog::column::{Column, PrimitiveType};
    use crate::catalog::inverted_index::TabletMeta;
    use crate::catalog::metastore::{Catalog, LocalMetastore};
    use crate::catalog::partition::{Partition, StorageMedium};
    use crate::catalog::system_info::{Backend, SystemInfoService};
    use crate::catalog::table::{IndexMetaDef, KeysType, OlapTable, StorageType};
    use crate::catalog::tablet::{IndexState, MaterializedIndex, Replica, ReplicaState, Tablet};

    fn metastore() -> LocalMetastore {
        let system_info = Arc::new(SystemInfoService::new());
        for id in 1..=3 {
            system_info.add_backend(Backend::new(id, format!("be{id}"), 9050));
        }
        LocalMetastore::new(system_info)
    }

    fn table(replica_states: &[(i64, ReplicaState, i64)]) -> OlapTable {
        let mut table = OlapTable::new(
            2,
            "t",
            KeysType::DupKeys,
            IndexMetaDef {
                index_id: 3,
                index_name: "t".to_string(),
                schema: vec![Column::new("k1", PrimitiveType::Int, true)],
                schema_version: 0,
                schema_hash: 1,
                short_key_column_count: 1,
                storage_type: StorageType::Column,
                keys_type: KeysType::DupKeys,
                orig_stmt: None,
            },
        );
        let mut base = MaterializedIndex::new(3, IndexState::Normal);
        let mut tablet = Tablet::new(100);
        for (idx, (backend, state, failed)) in replica_states.iter().enumerate() {
            let mut replica = Replica::new(200 + idx as i64, *backend, *state, 5, 1);
            replica.last_failed_version = *failed;
            tablet.add_replica(replica);
        }
        base.add_tablet(tablet);
        table.add_partition(Partition::new(4, "p1", 3, base));
        table
    }

    #[test]
    fn shadow_replicas_are_co_located_with_base_replicas() {
        let catalog = metastore();
        let table = table(&[
            (1, ReplicaState::Normal, -1),
            (2, ReplicaState::Normal, -1),
            (3, ReplicaState::Normal, -1),
        ]);
        let plan = materialize_shadow_index(&catalog, &table, 3, 50, 77).expect("plan");
        assert_eq!(plan.replica_count(), 3);
        let index = &plan.partition_id_to_rollup_index[&4];
        assert_eq!(index.state, IndexState::Shadow);
        assert_eq!(index.tablets.len(), 1);
        let tablet = &index.tablets[0];
        assert_eq!(plan.partition_id_to_base_rollup_tablet_ids[&4][&tablet.id], 100);
        let mut backends = tablet.backend_ids();
        backends.sort_unstable();
        assert_eq!(backends, vec![1, 2, 3]);
        for replica in &tablet.replicas {
            assert_eq!(replica.state, ReplicaState::Alter);
            assert_eq!(replica.version, 1);
            assert_eq!(replica.schema_hash, 77);
        }
    }

    #[test]
    fn skips_unhealthy_base_replicas_but_needs_quorum() {
        let catalog = metastore();
        let table = table(&[
            (1, ReplicaState::Normal, -1),
            (2, ReplicaState::Clone, -1),
            (3, ReplicaState::Normal, 4),
        ]);
        let err = materialize_shadow_index(&catalog, &table, 3, 50, 77).expect_err("quorum");
        assert_eq!(err, "tablet 100 has few healthy replicas: 1");

        let table = table_with_two_healthy();
        let plan = materialize_shadow_index(&catalog, &table, 3, 50, 77).expect("plan");
        assert_eq!(plan.replica_count(), 2);
    }

    fn table_with_two_healthy() -> OlapTable {
        table(&[
            (1, ReplicaState::Normal, -1),
            (2, ReplicaState::Decommission, -1),
            (3, ReplicaState::Normal, -1),
        ])
    }

    #[test]
    fn unavailable_backend_fails_fast() {
        let catalog = metastore();
        catalog.system_info().set_alive(2, false);
        let table = table(&[
            (1, ReplicaState::Normal, -1),
            (2, ReplicaState::Normal, -1),
            (3, ReplicaState::Normal, -1),
        ]);
        let err = materialize_shadow_index(&catalog, &table, 3, 50, 77).expect_err("unavailable");
        assert!(err.contains("backend 2"), "{err}");
        let err = materialize_shadow_index(&catalog, &table, 9, 50, 77).expect_err("no base");
        assert!(err.contains("base index 9 not found"), "{err}");
    }

    #[test]
    fn registration_is_idempotent_and_reversible() {
        let catalog = metastore();
        let table = table_with_two_healthy();
        let plan = materialize_shadow_index(&catalog, &table, 3, 50, 77).expect("plan");
        let index = &plan.partition_id_to_rollup_index[&4];
        let meta = TabletMeta {
            db_id: 1,
            table_id: 2,
            partition_id: 4,
            index_id: 50,
            storage_medium: StorageMedium::Hdd,
        };
        let inverted = catalog.inverted_index();
        register_shadow_tablets(inverted, meta, index).expect("register");
        register_shadow_tablets(inverted, meta, index).expect("register again");
        assert_eq!(inverted.tablet_count(), 1);
        assert_eq!(inverted.tablet_ids_on_backend(1), vec![index.tablets[0].id]);
        unregister_shadow_tablets(inverted, index);
        assert_eq!(inverted.tablet_count(), 0);
        assert!(inverted.tablet_ids_on_backend(1).is_empty());
    }
}

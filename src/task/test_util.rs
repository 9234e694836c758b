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
use std::sync::Arc;

use crate::analysis::expr::DescriptorTable;
use crate::analysis::rollup_params::RollupJobParams;
use crate::catalog::column::{Column, PrimitiveType};
use crate::catalog::partition::{StorageMedium, TabletType};
use crate::catalog::schema_info::TabletSchema;
use crate::catalog::table::CompressionType;
use crate::common::ids::TupleId;
use crate::task::agent_task::{
    AgentTask, AlterReplicaRequest, CreateReplicaLatch, CreateReplicaRequest, TaskBody, TaskType,
};

pub(crate) fn create_task_with_latch(backend_id: i64, tablet_id: i64) -> (AgentTask, Arc<CreateReplicaLatch>) {
    let latch = Arc::new(CreateReplicaLatch::new(1));
    latch.add_mark(backend_id, tablet_id);
    let schema = TabletSchema::builder(3, vec![Column::new("k1", PrimitiveType::Int, true)]).build();
    let task = AgentTask::new(
        backend_id,
        TaskType::Create,
        1,
        2,
        4,
        3,
        tablet_id,
        TaskBody::CreateReplica(CreateReplicaRequest {
            replica_id: tablet_id + 1,
            version: 1,
            storage_medium: StorageMedium::Hdd,
            tablet_type: TabletType::Disk,
            tablet_schema: Arc::new(schema),
            base_tablet_id: tablet_id - 1,
            enable_persistent_index: false,
            primary_index_cache_expire_sec: 0,
            compression_type: CompressionType::Lz4Frame,
            compression_level: -1,
            latch: Arc::clone(&latch),
        }),
    );
    (task, latch)
}

pub(crate) fn create_task(backend_id: i64, tablet_id: i64) -> AgentTask {
    create_task_with_latch(backend_id, tablet_id).0
}

pub(crate) fn alter_task(backend_id: i64, tablet_id: i64) -> AgentTask {
    let params = RollupJobParams {
        define_exprs: Default::default(),
        where_expr: None,
        desc_table: DescriptorTable {
            tuple_id: TupleId::new(0),
            slots: Vec::new(),
        },
        used_column_names: Vec::new(),
    };
    AgentTask::new(
        backend_id,
        TaskType::Alter,
        1,
        2,
        4,
        3,
        tablet_id,
        TaskBody::AlterReplica(AlterReplicaRequest {
            job_id: 9,
            base_tablet_id: tablet_id - 1,
            base_schema_hash: 1,
            new_schema_hash: 2,
            version: 1,
            base_columns: Arc::new(Vec::new()),
            params: Arc::new(params),
        }),
    )
}

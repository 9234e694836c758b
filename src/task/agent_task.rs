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
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::analysis::rollup_params::RollupJobParams;
use crate::catalog::column::Column;
use crate::catalog::partition::{StorageMedium, TabletType};
use crate::catalog::schema_info::TabletSchema;
use crate::catalog::table::CompressionType;
use crate::task::latch::MarkedCountDownLatch;

/// Latch counted down by `(backend id, tablet id)` once a replica exists.
pub type CreateReplicaLatch = MarkedCountDownLatch<i64, i64>;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Create,
    Alter,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Alter => write!(f, "ALTER"),
        }
    }
}

#[derive(Clone)]
pub struct CreateReplicaRequest {
    pub replica_id: i64,
    pub version: i64,
    pub storage_medium: StorageMedium,
    pub tablet_type: TabletType,
    pub tablet_schema: Arc<TabletSchema>,
    /// Tablet whose data bootstraps the new replica.
    pub base_tablet_id: i64,
    pub enable_persistent_index: bool,
    pub primary_index_cache_expire_sec: i32,
    pub compression_type: CompressionType,
    pub compression_level: i32,
    pub latch: Arc<CreateReplicaLatch>,
}

#[derive(Clone, Debug)]
pub struct AlterReplicaRequest {
    pub job_id: i64,
    pub base_tablet_id: i64,
    pub base_schema_hash: i32,
    pub new_schema_hash: i32,
    /// Data up to and including this version must be transformed.
    pub version: i64,
    pub base_columns: Arc<Vec<Column>>,
    pub params: Arc<RollupJobParams>,
}

#[derive(Clone)]
pub enum TaskBody {
    CreateReplica(CreateReplicaRequest),
    AlterReplica(AlterReplicaRequest),
}

#[derive(Clone, Debug, Default)]
struct TaskStatus {
    finished: bool,
    failed: bool,
    failed_times: u32,
    // set by a failed attempt, cleared when the task is handed out for resending
    need_resend: bool,
    error_msg: String,
}

/// Unit of work dispatched to one backend. Shared between the owning batch and the task queue.
pub struct AgentTask {
    pub backend_id: i64,
    pub task_type: TaskType,
    /// Deduplication key inside the queue; the target tablet id.
    pub signature: i64,
    pub db_id: i64,
    pub table_id: i64,
    pub partition_id: i64,
    pub index_id: i64,
    pub tablet_id: i64,
    pub body: TaskBody,
    status: Mutex<TaskStatus>,
}

impl AgentTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend_id: i64,
        task_type: TaskType,
        db_id: i64,
        table_id: i64,
        partition_id: i64,
        index_id: i64,
        tablet_id: i64,
        body: TaskBody,
    ) -> Self {
        Self {
            backend_id,
            task_type,
            signature: tablet_id,
            db_id,
            table_id,
            partition_id,
            index_id,
            tablet_id,
            body,
            status: Mutex::new(TaskStatus::default()),
        }
    }

    pub fn create_request(&self) -> Option<&CreateReplicaRequest> {
        match &self.body {
            TaskBody::CreateReplica(req) => Some(req),
            TaskBody::AlterReplica(_) => None,
        }
    }

    pub fn alter_request(&self) -> Option<&AlterReplicaRequest> {
        match &self.body {
            TaskBody::AlterReplica(req) => Some(req),
            TaskBody::CreateReplica(_) => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.lock().expect("agent task lock").finished
    }

    pub fn set_finished(&self) {
        self.status.lock().expect("agent task lock").finished = true;
    }

    /// Permanently failed; resending cannot help.
    pub fn is_failed(&self) -> bool {
        self.status.lock().expect("agent task lock").failed
    }

    pub fn set_failed(&self, error_msg: impl Into<String>) {
        let mut guard = self.status.lock().expect("agent task lock");
        guard.failed = true;
        guard.error_msg = error_msg.into();
    }

    /// Records one failed attempt. Returns the new failure count.
    pub fn fail(&self, error_msg: impl Into<String>) -> u32 {
        let mut guard = self.status.lock().expect("agent task lock");
        guard.failed_times += 1;
        guard.need_resend = true;
        guard.error_msg = error_msg.into();
        guard.failed_times
    }

    /// True once per failed attempt of a task that is neither finished nor permanently failed.
    pub fn take_resend(&self) -> bool {
        let mut guard = self.status.lock().expect("agent task lock");
        let resend = guard.need_resend && !guard.finished && !guard.failed;
        guard.need_resend = false;
        resend
    }

    pub fn failed_times(&self) -> u32 {
        self.status.lock().expect("agent task lock").failed_times
    }

    pub fn error_msg(&self) -> String {
        self.status.lock().expect("agent task lock").error_msg.clone()
    }
}

impl fmt::Debug for AgentTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status.lock().expect("agent task lock").clone();
        f.debug_struct("AgentTask")
            .field("backend_id", &self.backend_id)
            .field("task_type", &self.task_type)
            .field("signature", &self.signature)
            .field("partition_id", &self.partition_id)
            .field("index_id", &self.index_id)
            .field("finished", &status.finished)
            .field("failed", &status.failed)
            .field("failed_times", &status.failed_times)
            .finish()
    }
}

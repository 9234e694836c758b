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
//! Shared in-memory cluster for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use novarocks_fe_alter::alter::{AddRollupRequest, AlterContext, AlterHandler};
use novarocks_fe_alter::analysis::{DefineExprParser, Expr, OriginStatement, SlotBindingAnalyzer};
use novarocks_fe_alter::catalog::{
    AggregateType, Backend, Catalog, Column, Database, IndexMetaDef, IndexState, KeysType, LocalMetastore,
    MaterializedIndex, OlapTable, OlapTableState, Partition, PrimitiveType, Replica, ReplicaState, StorageType,
    SystemInfoService, TableRef, Tablet, read_table,
};
use novarocks_fe_alter::common::config::AlterJobConfig;
use novarocks_fe_alter::common::status::{Status, StatusCode};
use novarocks_fe_alter::persist::{AlterJobRecord, EditLog, MemoryEditLog};
use novarocks_fe_alter::task::{
    AgentClient, AgentTask, AgentTaskExecutor, AgentTaskQueue, TaskReport, TaskType,
};
use novarocks_fe_alter::transaction::{GlobalTransactionMgr, TransactionManager};

pub const DB_ID: i64 = 1;
pub const TABLE_ID: i64 = 2;
pub const BASE_INDEX_ID: i64 = 3;
pub const PARTITION_ID: i64 = 4;
pub const BASE_TABLET_IDS: [i64; 2] = [100, 101];
pub const BACKEND_IDS: [i64; 3] = [1, 2, 3];
pub const VISIBLE_VERSION: i64 = 5;
pub const TABLE_NAME: &str = "orders";

/// How the fake backends answer CREATE tasks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateReply {
    Succeed,
    /// Every CREATE on this backend fails with the message.
    FailOn(i64, String),
    /// No reply at all; the job waits on its latch.
    Silent,
}

/// Records every task sent and answers CREATE tasks through the task queue. ALTER tasks are
/// only recorded; tests report them explicitly.
pub struct FakeAgentClient {
    task_queue: Arc<AgentTaskQueue>,
    reply: Mutex<CreateReply>,
    sent: Mutex<Vec<Arc<AgentTask>>>,
}

impl FakeAgentClient {
    pub fn new(task_queue: Arc<AgentTaskQueue>) -> Self {
        Self {
            task_queue,
            reply: Mutex::new(CreateReply::Succeed),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reply(&self, reply: CreateReply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn sent_tasks(&self, task_type: TaskType) -> Vec<Arc<AgentTask>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.task_type == task_type)
            .cloned()
            .collect()
    }
}

impl AgentClient for FakeAgentClient {
    fn submit_tasks(&self, backend_id: i64, tasks: &[Arc<AgentTask>]) -> Result<(), String> {
        self.sent.lock().unwrap().extend(tasks.iter().cloned());
        let reply = self.reply.lock().unwrap().clone();
        for task in tasks.iter().filter(|t| t.task_type == TaskType::Create) {
            let report = match &reply {
                CreateReply::Succeed => TaskReport::ok(backend_id, TaskType::Create, task.signature),
                CreateReply::FailOn(failing, msg) if *failing == backend_id => TaskReport::failed(
                    backend_id,
                    TaskType::Create,
                    task.signature,
                    Status::new(StatusCode::InternalError, msg.clone()),
                ),
                CreateReply::FailOn(..) => {
                    TaskReport::ok(backend_id, TaskType::Create, task.signature)
                }
                CreateReply::Silent => continue,
            };
            self.task_queue.finish_task(&report)?;
        }
        Ok(())
    }
}

/// Answers define expressions from a fixed map, regardless of the statement.
pub struct FixedDefineExprParser {
    pub exprs: HashMap<String, Expr>,
}

impl DefineExprParser for FixedDefineExprParser {
    fn parse_column_define_exprs(
        &self,
        _stmt: &OriginStatement,
    ) -> Result<HashMap<String, Expr>, String> {
        Ok(self.exprs.clone())
    }
}

pub fn base_schema() -> Vec<Column> {
    vec![
        Column::new("k1", PrimitiveType::Int, true).with_unique_id(0),
        Column::new("k2", PrimitiveType::Bigint, true).with_unique_id(1),
        Column::new("v1", PrimitiveType::Bigint, false)
            .with_unique_id(2)
            .with_aggregate(AggregateType::Sum),
    ]
}

fn build_table() -> OlapTable {
    let mut table = OlapTable::new(
        TABLE_ID,
        TABLE_NAME,
        KeysType::AggKeys,
        IndexMetaDef {
            index_id: BASE_INDEX_ID,
            index_name: TABLE_NAME.to_string(),
            schema: base_schema(),
            schema_version: 0,
            schema_hash: 1_234,
            short_key_column_count: 2,
            storage_type: StorageType::Column,
            keys_type: KeysType::AggKeys,
            orig_stmt: None,
        },
    );
    let mut base = MaterializedIndex::new(BASE_INDEX_ID, IndexState::Normal);
    let mut replica_id = 200;
    for tablet_id in BASE_TABLET_IDS {
        let mut tablet = Tablet::new(tablet_id);
        for backend_id in BACKEND_IDS {
            tablet.add_replica(Replica::new(
                replica_id,
                backend_id,
                ReplicaState::Normal,
                VISIBLE_VERSION,
                1_234,
            ));
            replica_id += 1;
        }
        base.add_tablet(tablet);
    }
    let mut partition = Partition::new(PARTITION_ID, "p1", 3, base);
    partition.visible_version = VISIBLE_VERSION;
    table.add_partition(partition);
    table
}

pub fn test_config() -> AlterJobConfig {
    AlterJobConfig {
        tablet_create_timeout: Duration::from_secs(10),
        max_create_table_timeout: Duration::from_secs(60),
        alter_table_timeout: Duration::from_secs(3600),
        history_job_keep_max: Duration::from_secs(3600),
        scheduler_interval: Duration::from_millis(20),
        max_running_rollup_job_num_per_table: 1,
        max_worker_threads: 2,
    }
}

/// Accepts a fixed number of writes, then fails every later one.
pub struct FlakyEditLog {
    pub log: Arc<MemoryEditLog>,
    writes_left: Mutex<usize>,
}

impl FlakyEditLog {
    pub fn new(writes: usize) -> Self {
        Self {
            log: Arc::new(MemoryEditLog::new()),
            writes_left: Mutex::new(writes),
        }
    }

    fn take_write(&self) -> Result<(), String> {
        let mut left = self.writes_left.lock().unwrap();
        if *left == 0 {
            return Err("journal unavailable".to_string());
        }
        *left -= 1;
        Ok(())
    }
}

impl EditLog for FlakyEditLog {
    fn log_alter_job(&self, record: &AlterJobRecord) -> Result<(), String> {
        self.take_write()?;
        self.log.log_alter_job(record)
    }

    fn log_remove_alter_jobs(&self, job_ids: &[i64]) -> Result<(), String> {
        self.take_write()?;
        self.log.log_remove_alter_jobs(job_ids)
    }
}

/// Three backends, one database and a two-tablet table with three replicas per tablet.
pub struct TestCluster {
    pub metastore: Arc<LocalMetastore>,
    pub db: Arc<Database>,
    pub table: TableRef,
    pub txn_mgr: Arc<GlobalTransactionMgr>,
    pub task_queue: Arc<AgentTaskQueue>,
    pub client: Arc<FakeAgentClient>,
    /// Receives the journal unless the builder was given another edit log.
    pub memory_log: Arc<MemoryEditLog>,
    pub handler: Arc<AlterHandler>,
}

pub struct ClusterBuilder {
    config: AlterJobConfig,
    edit_log: Option<Arc<dyn EditLog>>,
    parser: Option<Arc<dyn DefineExprParser>>,
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self {
            config: test_config(),
            edit_log: None,
            parser: None,
        }
    }

    pub fn config(mut self, config: AlterJobConfig) -> Self {
        self.config = config;
        self
    }

    pub fn edit_log(mut self, edit_log: Arc<dyn EditLog>) -> Self {
        self.edit_log = Some(edit_log);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn DefineExprParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn build(self) -> TestCluster {
        let system_info = Arc::new(SystemInfoService::new());
        for backend_id in BACKEND_IDS {
            system_info.add_backend(Backend::new(backend_id, format!("be{backend_id}"), 9050));
        }
        let metastore = Arc::new(LocalMetastore::new(system_info));
        let db = metastore.create_db(DB_ID, "test_db");
        let table = db.register_table(build_table());

        let txn_mgr = Arc::new(GlobalTransactionMgr::default());
        let task_queue = Arc::new(AgentTaskQueue::new());
        let client = Arc::new(FakeAgentClient::new(Arc::clone(&task_queue)));
        let executor = Arc::new(AgentTaskExecutor::new(
            Arc::clone(&client) as Arc<dyn AgentClient>,
            self.config.max_worker_threads,
        ));
        let memory_log = Arc::new(MemoryEditLog::new());
        let edit_log = self
            .edit_log
            .unwrap_or_else(|| Arc::clone(&memory_log) as Arc<dyn EditLog>);
        let ctx = AlterContext {
            catalog: Arc::clone(&metastore) as Arc<dyn Catalog>,
            txn_mgr: Arc::clone(&txn_mgr) as Arc<dyn TransactionManager>,
            task_queue: Arc::clone(&task_queue),
            executor,
            edit_log,
            analyzer: Arc::new(SlotBindingAnalyzer),
            define_expr_parser: self.parser,
            config: self.config,
        };
        TestCluster {
            metastore,
            db,
            table,
            txn_mgr,
            task_queue,
            client,
            memory_log,
            handler: Arc::new(AlterHandler::new(ctx)),
        }
    }
}

impl TestCluster {
    pub fn new() -> Self {
        ClusterBuilder::new().build()
    }

    /// Waits for the dispatch pool to deliver every queued send.
    pub fn drain_sends(&self) {
        self.handler.context().executor.join();
    }

    /// Reports every ALTER task sent so far, bumping replicas to the visible version.
    pub fn finish_alter_tasks(&self) {
        self.drain_sends();
        for task in self.client.sent_tasks(TaskType::Alter) {
            if task.is_finished() {
                continue;
            }
            let mut report = TaskReport::ok(task.backend_id, TaskType::Alter, task.signature);
            report.version = Some(VISIBLE_VERSION);
            self.handler.finish_task(&report).unwrap();
        }
    }

    pub fn table_state(&self) -> OlapTableState {
        read_table(&self.table).state
    }
}

/// `ADD ROLLUP r1 (k2, v1)` over the base index.
pub fn rollup_request(name: &str) -> AddRollupRequest {
    AddRollupRequest {
        rollup_name: name.to_string(),
        columns: vec![
            Column::new("k2", PrimitiveType::Bigint, true),
            Column::new("v1", PrimitiveType::Bigint, false),
        ],
        ..Default::default()
    }
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

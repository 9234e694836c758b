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
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::alter::job::{
    AlterContext, AlterError, AlterJob, JobInfoRow, JobState, JobType, StepOutcome,
    UnfinishedTaskRow,
};
use crate::alter::shadow_index::{ShadowIndexPlan, register_shadow_tablets, unregister_shadow_tablets};
use crate::analysis::expr::{Expr, OriginStatement, WHERE_PREDICATE_COLUMN_NAME};
use crate::catalog::column::Column;
use crate::catalog::database::{TableRef, read_table, write_table};
use crate::catalog::inverted_index::TabletMeta;
use crate::catalog::schema_info::TabletSchema;
use crate::catalog::table::{IndexMetaDef, KeysType, OlapTable, OlapTableState, StorageType};
use crate::catalog::tablet::{MaterializedIndex, PARTITION_INIT_VERSION, ReplicaState};
use crate::common::status::Status;
use crate::common::util::{NULL_STRING, long_to_time_string, now_ms};
use crate::persist::alter_job_record::{AlterJobRecord, CURRENT_RECORD_VERSION, RollupJobRecord};
use crate::task::agent_task::{
    AgentTask, AlterReplicaRequest, CreateReplicaLatch, CreateReplicaRequest, TaskBody, TaskType,
};
use crate::task::batch::AgentBatchTask;

/// A task failing more often than this cancels the job.
pub const MAX_FAILED_TIMES: u32 = 3;

const MAX_ERROR_REPLICAS_IN_MSG: usize = 3;
const UNFINISHED_TASK_SCAN_LIMIT: usize = 2000;

/// Everything admission decides about a new rollup job.
#[derive(Clone, Debug)]
pub struct RollupJobDesc {
    pub job_id: i64,
    pub db_id: i64,
    pub table_id: i64,
    pub table_name: String,
    pub timeout_ms: i64,
    pub base_index_id: i64,
    pub rollup_index_id: i64,
    pub base_index_name: String,
    pub rollup_index_name: String,
    pub rollup_schema: Vec<Column>,
    pub base_schema_hash: i32,
    pub rollup_schema_hash: i32,
    pub rollup_keys_type: KeysType,
    pub rollup_short_key_column_count: i16,
    pub schema_version: i32,
    pub origin_stmt: Option<OriginStatement>,
    pub view_define_sql: Option<String>,
    pub is_colocate_mv_index: bool,
    pub where_clause: Option<Expr>,
}

#[derive(Default)]
struct CancelControl {
    cancelling: bool,
    /// Set while the pending step waits for replica creation.
    waiting_latch: Option<Arc<CreateReplicaLatch>>,
}

struct RollupJobInner {
    table_name: String,
    job_state: JobState,
    err_msg: String,
    create_time_ms: i64,
    finished_time_ms: i64,
    timeout_ms: i64,
    watershed_txn_id: i64,

    base_index_id: i64,
    rollup_index_id: i64,
    base_index_name: String,
    rollup_index_name: String,
    rollup_schema: Vec<Column>,
    base_schema_hash: i32,
    rollup_schema_hash: i32,
    rollup_keys_type: KeysType,
    rollup_short_key_column_count: i16,
    schema_version: i32,

    partition_id_to_base_rollup_tablet_ids: BTreeMap<i64, BTreeMap<i64, i64>>,
    partition_id_to_rollup_index: BTreeMap<i64, MaterializedIndex>,

    origin_stmt: Option<OriginStatement>,
    view_define_sql: Option<String>,
    is_colocate_mv_index: bool,
    where_clause: Option<Expr>,

    batch: AgentBatchTask,
    span: Option<tracing::Span>,
}

/// Builds a rollup index next to the base index of one table.
///
/// Drives `PENDING -> WAITING_TXN -> RUNNING -> FINISHED`, with `CANCELLED` reachable from every
/// non-terminal state. Steps run on the scheduler thread through [`AlterJob::run`];
/// [`AlterJob::cancel`] may be called from any thread and interrupts a pending replica wait.
pub struct RollupJob {
    job_id: i64,
    db_id: i64,
    table_id: i64,
    ctx: Arc<AlterContext>,
    // serializes steps; `inner` alone is released while replicas are being created
    step_lock: Mutex<()>,
    control: Mutex<CancelControl>,
    inner: Mutex<RollupJobInner>,
}

/// Replica creation sent by the pending step and not yet confirmed.
struct ReplicaWait {
    latch: Arc<CreateReplicaLatch>,
    timeout: Duration,
}

fn job_span(job_id: i64, table_name: &str) -> tracing::Span {
    tracing::info_span!(
        "rollup_job",
        job_id,
        table = table_name,
        watershed_txn_id = tracing::field::Empty
    )
}

impl RollupJob {
    pub fn new(desc: RollupJobDesc, plan: ShadowIndexPlan, ctx: Arc<AlterContext>) -> Self {
        let span = job_span(desc.job_id, &desc.table_name);
        let inner = RollupJobInner {
            table_name: desc.table_name,
            job_state: JobState::Pending,
            err_msg: String::new(),
            create_time_ms: now_ms(),
            finished_time_ms: -1,
            timeout_ms: desc.timeout_ms,
            watershed_txn_id: -1,
            base_index_id: desc.base_index_id,
            rollup_index_id: desc.rollup_index_id,
            base_index_name: desc.base_index_name,
            rollup_index_name: desc.rollup_index_name,
            rollup_schema: desc.rollup_schema,
            base_schema_hash: desc.base_schema_hash,
            rollup_schema_hash: desc.rollup_schema_hash,
            rollup_keys_type: desc.rollup_keys_type,
            rollup_short_key_column_count: desc.rollup_short_key_column_count,
            schema_version: desc.schema_version,
            partition_id_to_base_rollup_tablet_ids: plan.partition_id_to_base_rollup_tablet_ids,
            partition_id_to_rollup_index: plan.partition_id_to_rollup_index,
            origin_stmt: desc.origin_stmt,
            view_define_sql: desc.view_define_sql,
            is_colocate_mv_index: desc.is_colocate_mv_index,
            where_clause: desc.where_clause,
            batch: AgentBatchTask::new(),
            span: Some(span),
        };
        Self {
            job_id: desc.job_id,
            db_id: desc.db_id,
            table_id: desc.table_id,
            ctx,
            step_lock: Mutex::new(()),
            control: Mutex::new(CancelControl::default()),
            inner: Mutex::new(inner),
        }
    }

    /// Rebuilds a job from its durable form. A PENDING job re-derives its define expressions
    /// from the origin statement.
    pub fn from_record(record: &RollupJobRecord, ctx: Arc<AlterContext>) -> Result<Self, String> {
        let span = (!record.job_state.is_final_state())
            .then(|| job_span(record.job_id, &record.table_name));
        if let Some(span) = span.as_ref()
            && record.watershed_txn_id != -1
        {
            span.record("watershed_txn_id", record.watershed_txn_id);
        }
        let mut inner = RollupJobInner {
            table_name: record.table_name.clone(),
            job_state: record.job_state,
            err_msg: record.err_msg.clone(),
            create_time_ms: record.create_time_ms,
            finished_time_ms: record.finished_time_ms,
            timeout_ms: record.timeout_ms,
            watershed_txn_id: record.watershed_txn_id,
            base_index_id: record.base_index_id,
            rollup_index_id: record.rollup_index_id,
            base_index_name: record.base_index_name.clone(),
            rollup_index_name: record.rollup_index_name.clone(),
            rollup_schema: record.rollup_schema.clone(),
            base_schema_hash: record.base_schema_hash,
            rollup_schema_hash: record.rollup_schema_hash,
            rollup_keys_type: record.rollup_keys_type,
            rollup_short_key_column_count: record.rollup_short_key_column_count,
            schema_version: record.schema_version,
            partition_id_to_base_rollup_tablet_ids: record
                .partition_id_to_base_rollup_tablet_ids
                .clone(),
            partition_id_to_rollup_index: record.partition_id_to_rollup_index.clone(),
            origin_stmt: record.origin_stmt.clone(),
            view_define_sql: record.view_define_sql.clone(),
            is_colocate_mv_index: record.is_colocate_mv_index,
            where_clause: None,
            batch: AgentBatchTask::new(),
            span,
        };
        if inner.job_state == JobState::Pending
            && let Some(stmt) = inner.origin_stmt.clone()
            && let Some(parser) = ctx.define_expr_parser.as_ref()
        {
            let define_exprs = parser.parse_column_define_exprs(&stmt)?;
            apply_define_exprs(&mut inner, define_exprs);
        }
        Ok(Self {
            job_id: record.job_id,
            db_id: record.db_id,
            table_id: record.table_id,
            ctx,
            step_lock: Mutex::new(()),
            control: Mutex::new(CancelControl::default()),
            inner: Mutex::new(inner),
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, RollupJobInner> {
        self.inner.lock().expect("rollup job lock")
    }

    /// Watershed transaction id, once assigned.
    pub fn transaction_id(&self) -> Option<i64> {
        let inner = self.lock_inner();
        (inner.watershed_txn_id != -1).then_some(inner.watershed_txn_id)
    }

    pub fn err_msg(&self) -> String {
        self.lock_inner().err_msg.clone()
    }

    pub fn rollup_index_id(&self) -> i64 {
        self.lock_inner().rollup_index_id
    }

    pub fn rollup_index_name(&self) -> String {
        self.lock_inner().rollup_index_name.clone()
    }

    /// Rollup tablet ids of every partition.
    pub fn rollup_tablet_ids(&self) -> Vec<i64> {
        let inner = self.lock_inner();
        inner
            .partition_id_to_rollup_index
            .values()
            .flat_map(|index| index.tablets.iter().map(|t| t.id))
            .collect()
    }

    /// `done/total` of the current batch.
    pub fn task_progress(&self) -> (usize, usize) {
        let inner = self.lock_inner();
        (inner.batch.finished_task_num(), inner.batch.task_num())
    }

    /// Runs one step and returns what it did.
    ///
    /// The job lock is released while the pending step waits for replica creation, so state
    /// queries and [`AlterJob::cancel`] never wait on backends.
    pub fn step(&self) -> StepOutcome {
        let _step = self.step_lock.lock().expect("rollup step lock");
        let mut inner = self.lock_inner();
        if inner.job_state.is_final_state() {
            return StepOutcome::NoOp;
        }
        let span = inner.span.clone().unwrap_or_else(tracing::Span::none);
        let _entered = span.enter();

        if now_ms() - inner.create_time_ms > inner.timeout_ms {
            self.cancel_impl(&mut inner, "Timeout");
            return StepOutcome::Cancelled;
        }

        let result = match inner.job_state {
            JobState::Pending => match self.send_create_replica_tasks(&mut inner) {
                Ok(Some(wait)) => {
                    drop(inner);
                    let completed = wait.latch.await_timeout(wait.timeout);
                    inner = self.lock_inner();
                    self.run_pending_job(&mut inner, &wait.latch, completed)
                }
                other => other.map(|_| StepOutcome::NoOp),
            },
            JobState::WaitingTxn => self.run_waiting_txn_job(&mut inner),
            JobState::Running => self.run_running_job(&mut inner),
            JobState::Finished | JobState::Cancelled => Ok(StepOutcome::NoOp),
        };
        match result {
            Ok(outcome) => outcome,
            Err(AlterError::Cancel(msg)) => {
                self.cancel_impl(&mut inner, &msg);
                StepOutcome::Cancelled
            }
            Err(err @ AlterError::IllegalState { .. }) => {
                panic!("rollup job {}: {err}", self.job_id)
            }
        }
    }

    fn get_table(&self) -> Result<TableRef, AlterError> {
        let db = self
            .ctx
            .catalog
            .get_db(self.db_id)
            .ok_or_else(|| AlterError::cancel(format!("Database {} does not exist", self.db_id)))?;
        db.table(self.table_id)
            .ok_or_else(|| AlterError::cancel(format!("Table {} does not exist", self.table_id)))
    }

    fn expect_state(inner: &RollupJobInner, expected: JobState) -> Result<(), AlterError> {
        if inner.job_state != expected {
            return Err(AlterError::IllegalState {
                expected,
                actual: inner.job_state,
            });
        }
        Ok(())
    }

    /// Flags an unstable table WAITING_STABLE and returns false; restores ROLLUP once stable.
    fn check_table_stable(&self, inner: &mut RollupJobInner, table_ref: &TableRef) -> bool {
        let mut table = write_table(table_ref);
        if !table.is_stable(self.ctx.catalog.system_info()) {
            inner.err_msg = "table is unstable".to_string();
            table.state = OlapTableState::WaitingStable;
            tracing::warn!(job_id = self.job_id, table = table.name.as_str(), "table is unstable");
            return false;
        }
        if table.state == OlapTableState::WaitingStable {
            table.state = OlapTableState::Rollup;
            inner.err_msg.clear();
        }
        true
    }

    /// Sends CREATE tasks for every shadow replica. Returns `None` when the step has to be
    /// retried later.
    fn send_create_replica_tasks(
        &self,
        inner: &mut RollupJobInner,
    ) -> Result<Option<ReplicaWait>, AlterError> {
        Self::expect_state(inner, JobState::Pending)?;
        let table_ref = self.get_table()?;
        if !self.check_table_stable(inner, &table_ref) {
            return Ok(None);
        }

        let total_replica_num: usize = inner
            .partition_id_to_rollup_index
            .values()
            .map(MaterializedIndex::replica_count)
            .sum();
        let latch = Arc::new(CreateReplicaLatch::new(total_replica_num));
        let batch = {
            let table = read_table(&table_ref);
            self.build_create_replica_batch(inner, &table, &latch)?
        };

        {
            let mut control = self.control.lock().expect("rollup cancel lock");
            if control.cancelling {
                return Ok(None);
            }
            control.waiting_latch = Some(Arc::clone(&latch));
        }
        self.ctx.task_queue.add_batch_task(&batch);
        self.ctx.executor.submit(&batch);
        inner.batch = batch;

        let timeout = self.ctx.config.create_replica_timeout(total_replica_num);
        tracing::info!(
            job_id = self.job_id,
            replicas = total_replica_num,
            timeout_ms = timeout.as_millis() as u64,
            "waiting for rollup replicas to be created"
        );
        Ok(Some(ReplicaWait { latch, timeout }))
    }

    /// Second half of the pending step, run with the job lock taken again after the wait.
    fn run_pending_job(
        &self,
        inner: &mut RollupJobInner,
        latch: &CreateReplicaLatch,
        completed: bool,
    ) -> Result<StepOutcome, AlterError> {
        let cancelling = {
            let mut control = self.control.lock().expect("rollup cancel lock");
            control.waiting_latch = None;
            control.cancelling
        };
        if cancelling || inner.job_state != JobState::Pending {
            self.ctx
                .task_queue
                .remove_batch_task(&inner.batch, TaskType::Create);
            return Ok(StepOutcome::NoOp);
        }
        let table_ref = self.get_table()?;

        let status = latch.status();
        if !completed || !status.is_ok() {
            self.ctx
                .task_queue
                .remove_batch_task(&inner.batch, TaskType::Create);
            let err_msg = if !status.is_ok() {
                status.error_msg
            } else {
                let marks: Vec<String> = latch
                    .left_marks()
                    .into_iter()
                    .take(MAX_ERROR_REPLICAS_IN_MSG)
                    .map(|(backend_id, tablet_id)| format!("{backend_id}={tablet_id}"))
                    .collect();
                format!("Error replicas:{}", marks.join(", "))
            };
            tracing::warn!(
                job_id = self.job_id,
                error = err_msg.as_str(),
                "failed to create rollup replicas"
            );
            return Err(AlterError::cancel(format!(
                "Create rollup replicas failed. Error: {err_msg}"
            )));
        }

        {
            let mut table = write_table(&table_ref);
            if table.state == OlapTableState::Normal {
                table.state = OlapTableState::Rollup;
            }
            add_rollup_index_to_catalog(self.db_id, inner, &mut table);
        }

        if inner.watershed_txn_id == -1 {
            inner.watershed_txn_id = self.ctx.txn_mgr.next_transaction_id();
            if let Some(span) = inner.span.as_ref() {
                span.record("watershed_txn_id", inner.watershed_txn_id);
            }
        }

        let record = self.record_with(inner, JobState::WaitingTxn, inner.finished_time_ms, &inner.err_msg);
        if let Err(err) = self.ctx.edit_log.log_alter_job(&record) {
            tracing::error!(
                job_id = self.job_id,
                error = err.as_str(),
                "failed to log rollup job, retry pending step"
            );
            return Ok(StepOutcome::NoOp);
        }
        inner.job_state = JobState::WaitingTxn;
        tracing::info!(
            job_id = self.job_id,
            watershed_txn_id = inner.watershed_txn_id,
            "rollup job is waiting for previous transactions"
        );
        Ok(StepOutcome::Advanced(JobState::WaitingTxn))
    }

    fn build_create_replica_batch(
        &self,
        inner: &RollupJobInner,
        table: &OlapTable,
        latch: &Arc<CreateReplicaLatch>,
    ) -> Result<AgentBatchTask, AlterError> {
        let tablet_schema = Arc::new(
            TabletSchema::builder(inner.rollup_index_id, inner.rollup_schema.clone())
                .schema_version(inner.schema_version)
                .schema_hash(inner.rollup_schema_hash)
                .short_key_column_count(inner.rollup_short_key_column_count)
                .keys_type(inner.rollup_keys_type)
                .storage_type(StorageType::Column)
                .bloom_filter(&table.bf_columns, table.bf_fpp)
                .indexes(OlapTable::indexes_by_schema(
                    &table.indexes,
                    &inner.rollup_schema,
                ))
                .build(),
        );

        let mut batch = AgentBatchTask::new();
        for (partition_id, rollup_index) in &inner.partition_id_to_rollup_index {
            let partition = table.partition(*partition_id).ok_or_else(|| {
                AlterError::cancel(format!("Partition {partition_id} does not exist"))
            })?;
            let tablet_map = inner
                .partition_id_to_base_rollup_tablet_ids
                .get(partition_id);
            for tablet in &rollup_index.tablets {
                let base_tablet_id = tablet_map
                    .and_then(|m| m.get(&tablet.id))
                    .copied()
                    .ok_or_else(|| {
                        AlterError::cancel(format!(
                            "base tablet of rollup tablet {} not found",
                            tablet.id
                        ))
                    })?;
                for replica in &tablet.replicas {
                    latch.add_mark(replica.backend_id, tablet.id);
                    let request = CreateReplicaRequest {
                        replica_id: replica.id,
                        version: PARTITION_INIT_VERSION,
                        storage_medium: partition.storage_medium,
                        tablet_type: partition.tablet_type,
                        tablet_schema: Arc::clone(&tablet_schema),
                        base_tablet_id,
                        enable_persistent_index: table.enable_persistent_index,
                        primary_index_cache_expire_sec: table.primary_index_cache_expire_sec,
                        compression_type: table.compression_type,
                        compression_level: table.compression_level,
                        latch: Arc::clone(latch),
                    };
                    batch.add_task(Arc::new(AgentTask::new(
                        replica.backend_id,
                        TaskType::Create,
                        self.db_id,
                        self.table_id,
                        *partition_id,
                        inner.rollup_index_id,
                        tablet.id,
                        TaskBody::CreateReplica(request),
                    )));
                }
            }
        }
        Ok(batch)
    }

    fn run_waiting_txn_job(&self, inner: &mut RollupJobInner) -> Result<StepOutcome, AlterError> {
        Self::expect_state(inner, JobState::WaitingTxn)?;
        let finished = self
            .ctx
            .txn_mgr
            .is_previous_transactions_finished(inner.watershed_txn_id, self.db_id, &[self.table_id])
            .map_err(AlterError::Cancel)?;
        if !finished {
            tracing::info!(
                job_id = self.job_id,
                watershed_txn_id = inner.watershed_txn_id,
                "wait for previous transactions to finish"
            );
            return Ok(StepOutcome::NoOp);
        }

        let db = self
            .ctx
            .catalog
            .get_db(self.db_id)
            .ok_or_else(|| AlterError::cancel(format!("Database {} does not exist", self.db_id)))?;
        let table_ref = db
            .table(self.table_id)
            .ok_or_else(|| AlterError::cancel(format!("Table {} does not exist", self.table_id)))?;

        let batch = {
            let table = read_table(&table_ref);
            let params = self
                .ctx
                .analyzer
                .analyze_and_create_params(
                    &table,
                    &db.full_name,
                    &inner.rollup_schema,
                    inner.where_clause.as_ref(),
                )
                .map_err(AlterError::Cancel)?;
            let params = Arc::new(params);

            let base_columns: Arc<Vec<Column>> = Arc::new(
                table
                    .index_meta(inner.base_index_id)
                    .map(|m| m.schema.clone())
                    .unwrap_or_default(),
            );

            let mut batch = AgentBatchTask::new();
            for (partition_id, rollup_index) in &inner.partition_id_to_rollup_index {
                let partition = table.partition(*partition_id).ok_or_else(|| {
                    AlterError::cancel(format!("Partition {partition_id} does not exist"))
                })?;
                let visible_version = partition.visible_version;
                let tablet_map = inner
                    .partition_id_to_base_rollup_tablet_ids
                    .get(partition_id);
                for tablet in &rollup_index.tablets {
                    let Some(base_tablet_id) = tablet_map.and_then(|m| m.get(&tablet.id)).copied()
                    else {
                        return Err(AlterError::cancel(format!(
                            "base tablet of rollup tablet {} not found",
                            tablet.id
                        )));
                    };
                    for replica in &tablet.replicas {
                        let request = AlterReplicaRequest {
                            job_id: self.job_id,
                            base_tablet_id,
                            base_schema_hash: inner.base_schema_hash,
                            new_schema_hash: inner.rollup_schema_hash,
                            version: visible_version,
                            base_columns: Arc::clone(&base_columns),
                            params: Arc::clone(&params),
                        };
                        batch.add_task(Arc::new(AgentTask::new(
                            replica.backend_id,
                            TaskType::Alter,
                            self.db_id,
                            self.table_id,
                            *partition_id,
                            inner.rollup_index_id,
                            tablet.id,
                            TaskBody::AlterReplica(request),
                        )));
                    }
                }
            }
            batch
        };

        self.ctx.task_queue.add_batch_task(&batch);
        self.ctx.executor.submit(&batch);
        tracing::info!(
            job_id = self.job_id,
            tasks = batch.task_num(),
            "sent alter replica tasks"
        );
        inner.batch = batch;
        // not logged: a restarted job resends these tasks from WAITING_TXN
        inner.job_state = JobState::Running;
        Ok(StepOutcome::Advanced(JobState::Running))
    }

    fn run_running_job(&self, inner: &mut RollupJobInner) -> Result<StepOutcome, AlterError> {
        Self::expect_state(inner, JobState::Running)?;
        let table_ref = self.get_table()?;

        if !inner.batch.is_finished() {
            for task in inner.batch.unfinished_tasks(UNFINISHED_TASK_SCAN_LIMIT) {
                if task.is_failed() || task.failed_times() > MAX_FAILED_TIMES {
                    return Err(AlterError::cancel(format!(
                        "rollup task failed after try three times: {}",
                        task.error_msg()
                    )));
                }
            }
            let mut resend = AgentBatchTask::new();
            for task in inner.batch.unfinished_tasks(UNFINISHED_TASK_SCAN_LIMIT) {
                if task.take_resend() {
                    resend.add_task(task);
                }
            }
            if !resend.is_empty() {
                tracing::info!(
                    job_id = self.job_id,
                    tasks = resend.task_num(),
                    "resend failed alter replica tasks"
                );
                self.ctx.executor.submit(&resend);
                return Ok(StepOutcome::NoOp);
            }
            tracing::debug!(
                job_id = self.job_id,
                finished = inner.batch.finished_task_num(),
                total = inner.batch.task_num(),
                "rollup tasks not finished"
            );
            return Ok(StepOutcome::NoOp);
        }

        let mut table = write_table(&table_ref);
        for partition_id in inner.partition_id_to_rollup_index.keys() {
            let partition = table.partition(*partition_id).ok_or_else(|| {
                AlterError::cancel(format!("Partition {partition_id} does not exist"))
            })?;
            let visible_version = partition.visible_version;
            let quorum = usize::try_from(partition.replication_num / 2 + 1).unwrap_or(1);
            let installed = partition.index(inner.rollup_index_id).ok_or_else(|| {
                AlterError::cancel(format!(
                    "rollup index {} not found in partition {partition_id}",
                    inner.rollup_index_id
                ))
            })?;
            for tablet in &installed.tablets {
                let healthy = tablet
                    .replicas
                    .iter()
                    .filter(|r| {
                        r.last_failed_version < 0 && r.check_version_catch_up(visible_version, false)
                    })
                    .count();
                if healthy < quorum {
                    return Err(AlterError::cancel(format!(
                        "rollup tablet {} has few healthy replicas: {healthy}, rollup job: {}",
                        tablet.id, self.job_id
                    )));
                }
            }
        }

        self.on_finished(inner, &mut table);
        drop(table);

        let finished_time_ms = now_ms();
        let record = self.record_with(inner, JobState::Finished, finished_time_ms, &inner.err_msg);
        if let Err(err) = self.ctx.edit_log.log_alter_job(&record) {
            tracing::error!(
                job_id = self.job_id,
                error = err.as_str(),
                "failed to log finished rollup job"
            );
            return Ok(StepOutcome::NoOp);
        }
        inner.job_state = JobState::Finished;
        inner.finished_time_ms = finished_time_ms;
        tracing::info!(job_id = self.job_id, "rollup job finished");
        inner.span = None;
        Ok(StepOutcome::Advanced(JobState::Finished))
    }

    /// Replicas go NORMAL and the shadow index becomes queryable. Repeating it is harmless.
    fn on_finished(&self, inner: &mut RollupJobInner, table: &mut OlapTable) {
        let rollup_index_id = inner.rollup_index_id;
        let inverted_index = self.ctx.catalog.inverted_index();
        for partition_id in inner.partition_id_to_rollup_index.keys() {
            let Some(partition) = table.partition_mut(*partition_id) else {
                continue;
            };
            if let Some(index) = partition.index_mut(rollup_index_id) {
                for tablet in &mut index.tablets {
                    for replica in &mut tablet.replicas {
                        replica.state = ReplicaState::Normal;
                        if inverted_index.contains_tablet(tablet.id)
                            && let Err(err) = inverted_index.add_replica(tablet.id, replica.clone())
                        {
                            tracing::warn!(
                                job_id = self.job_id,
                                tablet_id = tablet.id,
                                error = err.as_str(),
                                "failed to update rollup replica in inverted index"
                            );
                        }
                    }
                }
            }
            partition.visualise_shadow_index(rollup_index_id);
        }
        for index in inner.partition_id_to_rollup_index.values_mut() {
            for tablet in &mut index.tablets {
                for replica in &mut tablet.replicas {
                    replica.state = ReplicaState::Normal;
                }
            }
        }
        table.rebuild_full_schema();
        table.last_schema_update_time_ns = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
    }

    fn cancel_impl(&self, inner: &mut RollupJobInner, err_msg: &str) -> bool {
        if inner.job_state.is_final_state() {
            return false;
        }
        self.cancel_internal(inner);

        let finished_time_ms = now_ms();
        let record = self.record_with(inner, JobState::Cancelled, finished_time_ms, err_msg);
        if let Err(err) = self.ctx.edit_log.log_alter_job(&record) {
            tracing::error!(
                job_id = self.job_id,
                error = err.as_str(),
                "failed to log cancelled rollup job"
            );
        }
        inner.job_state = JobState::Cancelled;
        inner.err_msg = err_msg.to_string();
        inner.finished_time_ms = finished_time_ms;
        tracing::info!(job_id = self.job_id, error = err_msg, "cancel rollup job");
        inner.span = None;
        true
    }

    /// Removes in-flight tasks and every trace of the shadow index from the catalog.
    fn cancel_internal(&self, inner: &mut RollupJobInner) {
        self.ctx
            .task_queue
            .remove_batch_task(&inner.batch, TaskType::Create);
        self.ctx
            .task_queue
            .remove_batch_task(&inner.batch, TaskType::Alter);

        let inverted_index = self.ctx.catalog.inverted_index();
        for index in inner.partition_id_to_rollup_index.values() {
            unregister_shadow_tablets(inverted_index, index);
        }
        let Ok(table_ref) = self.get_table() else {
            return;
        };
        let mut table = write_table(&table_ref);
        for partition_id in inner.partition_id_to_rollup_index.keys() {
            if let Some(partition) = table.partition_mut(*partition_id) {
                partition.delete_rollup_index(inner.rollup_index_id);
            }
        }
        if table.index_name_by_id(inner.rollup_index_id) == Some(inner.rollup_index_name.as_str()) {
            table.delete_index_info(&inner.rollup_index_name);
        }
        table.rebuild_full_schema();
    }

    fn add_tablets_to_inverted_index(&self, inner: &RollupJobInner, table: &OlapTable) -> Result<(), String> {
        let inverted_index = self.ctx.catalog.inverted_index();
        for (partition_id, index) in &inner.partition_id_to_rollup_index {
            let Some(partition) = table.partition(*partition_id) else {
                continue;
            };
            let meta = TabletMeta {
                db_id: self.db_id,
                table_id: self.table_id,
                partition_id: *partition_id,
                index_id: inner.rollup_index_id,
                storage_medium: partition.storage_medium,
            };
            register_shadow_tablets(inverted_index, meta, index)?;
        }
        Ok(())
    }

    fn replay_table(&self) -> Option<TableRef> {
        self.ctx
            .catalog
            .get_db(self.db_id)
            .and_then(|db| db.table(self.table_id))
    }

    fn replay_pending(&self, inner: &mut RollupJobInner, record: &RollupJobRecord) -> Result<(), String> {
        if let Some(table_ref) = self.replay_table() {
            let mut table = write_table(&table_ref);
            self.add_tablets_to_inverted_index(inner, &table)?;
            table.state = OlapTableState::Rollup;
        }
        inner.job_state = JobState::Pending;
        inner.watershed_txn_id = record.watershed_txn_id;
        Ok(())
    }

    fn replay_waiting_txn(&self, inner: &mut RollupJobInner, record: &RollupJobRecord) -> Result<(), String> {
        if let Some(table_ref) = self.replay_table() {
            let mut table = write_table(&table_ref);
            self.add_tablets_to_inverted_index(inner, &table)?;
            add_rollup_index_to_catalog(self.db_id, inner, &mut table);
            table.state = OlapTableState::Rollup;
        }
        inner.job_state = JobState::WaitingTxn;
        inner.watershed_txn_id = record.watershed_txn_id;
        if inner.watershed_txn_id != -1
            && let Some(span) = inner.span.as_ref()
        {
            span.record("watershed_txn_id", inner.watershed_txn_id);
        }
        Ok(())
    }

    fn replay_finished(&self, inner: &mut RollupJobInner, record: &RollupJobRecord) {
        if let Some(table_ref) = self.replay_table() {
            let mut table = write_table(&table_ref);
            self.on_finished(inner, &mut table);
        }
        inner.job_state = JobState::Finished;
        inner.finished_time_ms = record.finished_time_ms;
        inner.span = None;
    }

    fn replay_cancelled(&self, inner: &mut RollupJobInner, record: &RollupJobRecord) {
        self.cancel_internal(inner);
        inner.job_state = JobState::Cancelled;
        inner.finished_time_ms = record.finished_time_ms;
        inner.err_msg = record.err_msg.clone();
        inner.span = None;
    }

    fn record_with(
        &self,
        inner: &RollupJobInner,
        job_state: JobState,
        finished_time_ms: i64,
        err_msg: &str,
    ) -> AlterJobRecord {
        AlterJobRecord::Rollup(RollupJobRecord {
            record_version: CURRENT_RECORD_VERSION,
            job_id: self.job_id,
            db_id: self.db_id,
            table_id: self.table_id,
            table_name: inner.table_name.clone(),
            job_state,
            err_msg: err_msg.to_string(),
            create_time_ms: inner.create_time_ms,
            finished_time_ms,
            timeout_ms: inner.timeout_ms,
            watershed_txn_id: inner.watershed_txn_id,
            base_index_id: inner.base_index_id,
            rollup_index_id: inner.rollup_index_id,
            base_index_name: inner.base_index_name.clone(),
            rollup_index_name: inner.rollup_index_name.clone(),
            rollup_schema: inner.rollup_schema.clone(),
            base_schema_hash: inner.base_schema_hash,
            rollup_schema_hash: inner.rollup_schema_hash,
            rollup_keys_type: inner.rollup_keys_type,
            rollup_short_key_column_count: inner.rollup_short_key_column_count,
            schema_version: inner.schema_version,
            partition_id_to_base_rollup_tablet_ids: inner
                .partition_id_to_base_rollup_tablet_ids
                .clone(),
            partition_id_to_rollup_index: inner.partition_id_to_rollup_index.clone(),
            origin_stmt: inner.origin_stmt.clone(),
            view_define_sql: inner.view_define_sql.clone(),
            is_colocate_mv_index: inner.is_colocate_mv_index,
        })
    }
}

/// Installs the shadow index into every partition and registers its schema on the table. The
/// index is reachable for loads from here on.
fn add_rollup_index_to_catalog(db_id: i64, inner: &RollupJobInner, table: &mut OlapTable) {
    for (partition_id, index) in &inner.partition_id_to_rollup_index {
        if let Some(partition) = table.partition_mut(*partition_id) {
            partition.create_rollup_index(index.clone());
        }
    }
    let meta = table.set_index_meta(IndexMetaDef {
        index_id: inner.rollup_index_id,
        index_name: inner.rollup_index_name.clone(),
        schema: inner.rollup_schema.clone(),
        schema_version: inner.schema_version,
        schema_hash: inner.rollup_schema_hash,
        short_key_column_count: inner.rollup_short_key_column_count,
        storage_type: StorageType::Column,
        keys_type: inner.rollup_keys_type,
        orig_stmt: inner.origin_stmt.clone(),
    });
    meta.db_id = db_id;
    meta.view_define_sql = inner.view_define_sql.clone();
    meta.is_colocate_mv_index = inner.is_colocate_mv_index;
    meta.where_clause = inner.where_clause.clone();
    table.rebuild_full_schema();
}

fn apply_define_exprs(inner: &mut RollupJobInner, mut define_exprs: HashMap<String, Expr>) {
    inner.where_clause = define_exprs.remove(WHERE_PREDICATE_COLUMN_NAME);
    for (name, expr) in define_exprs {
        if let Some(column) = inner.rollup_schema.iter_mut().find(|c| c.name == name) {
            column.define_expr = Some(expr);
        }
    }
}

impl AlterJob for RollupJob {
    fn job_id(&self) -> i64 {
        self.job_id
    }

    fn job_type(&self) -> JobType {
        JobType::Rollup
    }

    fn db_id(&self) -> i64 {
        self.db_id
    }

    fn table_id(&self) -> i64 {
        self.table_id
    }

    fn state(&self) -> JobState {
        self.lock_inner().job_state
    }

    fn finished_time_ms(&self) -> i64 {
        self.lock_inner().finished_time_ms
    }

    fn run(&self) {
        self.step();
    }

    fn cancel(&self, err_msg: &str) -> bool {
        {
            let mut control = self.control.lock().expect("rollup cancel lock");
            control.cancelling = true;
            if let Some(latch) = control.waiting_latch.as_ref() {
                latch.count_down_to_zero(Status::cancelled("rollup job cancelled"));
            }
        }
        let cancelled = {
            let mut inner = self.lock_inner();
            self.cancel_impl(&mut inner, err_msg)
        };
        self.control.lock().expect("rollup cancel lock").cancelling = false;
        cancelled
    }

    fn replay(&self, record: &AlterJobRecord) -> Result<(), String> {
        let AlterJobRecord::Rollup(record) = record;
        if record.job_id != self.job_id {
            return Err(format!(
                "replay record of job {} on rollup job {}",
                record.job_id, self.job_id
            ));
        }
        let mut inner = self.lock_inner();
        match record.job_state {
            JobState::Pending => self.replay_pending(&mut inner, record)?,
            JobState::WaitingTxn => self.replay_waiting_txn(&mut inner, record)?,
            JobState::Finished => self.replay_finished(&mut inner, record),
            JobState::Cancelled => self.replay_cancelled(&mut inner, record),
            JobState::Running => {
                return Err(format!(
                    "rollup job {} has no durable RUNNING state",
                    self.job_id
                ));
            }
        }
        tracing::info!(job_id = self.job_id, state = %record.job_state, "replayed rollup job");
        Ok(())
    }

    fn to_record(&self) -> AlterJobRecord {
        let inner = self.lock_inner();
        // RUNNING is persisted as WAITING_TXN so a restarted job resends its alter tasks
        let state = match inner.job_state {
            JobState::Running => JobState::WaitingTxn,
            other => other,
        };
        self.record_with(&inner, state, inner.finished_time_ms, &inner.err_msg)
    }

    fn info(&self) -> JobInfoRow {
        let inner = self.lock_inner();
        let progress = if inner.job_state == JobState::Running && inner.batch.task_num() > 0 {
            format!(
                "{}/{}",
                inner.batch.finished_task_num(),
                inner.batch.task_num()
            )
        } else {
            NULL_STRING.to_string()
        };
        JobInfoRow {
            job_id: self.job_id,
            table_name: inner.table_name.clone(),
            create_time: long_to_time_string(inner.create_time_ms),
            finish_time: long_to_time_string(inner.finished_time_ms),
            base_index_name: inner.base_index_name.clone(),
            rollup_index_name: inner.rollup_index_name.clone(),
            rollup_index_id: inner.rollup_index_id,
            transaction_id: inner.watershed_txn_id,
            state: inner.job_state.to_string(),
            err_msg: inner.err_msg.clone(),
            progress,
            timeout_second: inner.timeout_ms / 1000,
        }
    }

    fn unfinished_tasks(&self, limit: usize) -> Vec<UnfinishedTaskRow> {
        let inner = self.lock_inner();
        if inner.job_state != JobState::Running {
            return Vec::new();
        }
        inner
            .batch
            .unfinished_tasks(limit)
            .iter()
            .map(|task| UnfinishedTaskRow {
                backend_id: task.backend_id,
                base_tablet_id: task
                    .alter_request()
                    .map(|req| req.base_tablet_id)
                    .unwrap_or(-1),
                signature: task.signature,
            })
            .collect()
    }
}

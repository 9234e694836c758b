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
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crate::alter::job::{AlterContext, AlterJob, JobInfoRow, JobState, UnfinishedTaskRow};
use crate::alter::rollup_job::{RollupJob, RollupJobDesc};
use crate::alter::shadow_index::{materialize_shadow_index, register_shadow_tablets};
use crate::analysis::expr::{Expr, OriginStatement};
use crate::catalog::column::{Column, calc_short_key_column_count};
use crate::catalog::database::{TableRef, read_table, write_table};
use crate::catalog::inverted_index::TabletMeta;
use crate::catalog::schema_info::schema_hash;
use crate::catalog::table::{KeysType, OlapTable, OlapTableState};
use crate::catalog::tablet::MaterializedIndex;
use crate::common::util::now_ms;
use crate::persist::alter_job_record::AlterJobRecord;
use crate::persist::edit_log::{JournalEntry, read_journal};
use crate::persist::image::{AlterImage, read_image, write_image};
use crate::task::agent_task::TaskType;
use crate::task::task_queue::TaskReport;

/// One `ADD ROLLUP` clause.
#[derive(Clone, Debug, Default)]
pub struct AddRollupRequest {
    pub rollup_name: String,
    /// Defaults to the table's base index.
    pub base_index_name: Option<String>,
    /// Plain columns must exist in the base index; computed columns carry a define expression.
    pub columns: Vec<Column>,
    pub keys_type: Option<KeysType>,
    pub origin_stmt: Option<OriginStatement>,
    pub view_define_sql: Option<String>,
    pub where_clause: Option<Expr>,
    pub is_colocate_mv_index: bool,
    pub timeout_second: Option<i64>,
}

// A new job plus the shadow tablets it registers in the inverted index.
type AdmittedJob = (Arc<RollupJob>, Vec<(TabletMeta, MaterializedIndex)>);

#[derive(Default)]
struct SchedulerState {
    started: AtomicBool,
    shutdown: Mutex<bool>,
    shutdown_cv: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Registry and scheduler of rollup jobs.
pub struct AlterHandler {
    ctx: Arc<AlterContext>,
    jobs: RwLock<BTreeMap<i64, Arc<dyn AlterJob>>>,
    scheduler: SchedulerState,
}

impl AlterHandler {
    pub fn new(ctx: AlterContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            jobs: RwLock::new(BTreeMap::new()),
            scheduler: SchedulerState::default(),
        }
    }

    pub fn context(&self) -> &Arc<AlterContext> {
        &self.ctx
    }

    pub fn get_job(&self, job_id: i64) -> Option<Arc<dyn AlterJob>> {
        self.jobs.read().expect("alter jobs lock").get(&job_id).cloned()
    }

    pub fn job_ids(&self) -> Vec<i64> {
        self.jobs.read().expect("alter jobs lock").keys().copied().collect()
    }

    fn snapshot_jobs(&self) -> Vec<Arc<dyn AlterJob>> {
        self.jobs
            .read()
            .expect("alter jobs lock")
            .values()
            .cloned()
            .collect()
    }

    fn add_job(&self, job: Arc<dyn AlterJob>) {
        self.jobs
            .write()
            .expect("alter jobs lock")
            .insert(job.job_id(), job);
    }

    fn get_table(&self, db_id: i64, table_name: &str) -> Result<TableRef, String> {
        let db = self
            .ctx
            .catalog
            .get_db(db_id)
            .ok_or_else(|| format!("Database {db_id} does not exist"))?;
        db.table_by_name(table_name)
            .ok_or_else(|| format!("Table[{table_name}] does not exist"))
    }

    pub fn process_add_rollup(
        &self,
        db_id: i64,
        table_name: &str,
        request: AddRollupRequest,
    ) -> Result<i64, String> {
        let ids = self.process_batch_add_rollup(db_id, table_name, vec![request])?;
        ids.into_iter()
            .next()
            .ok_or_else(|| "no rollup job created".to_string())
    }

    /// Admits every clause or none. The table goes to ROLLUP and one PENDING job per clause is
    /// registered and logged.
    pub fn process_batch_add_rollup(
        &self,
        db_id: i64,
        table_name: &str,
        requests: Vec<AddRollupRequest>,
    ) -> Result<Vec<i64>, String> {
        let table_ref = self.get_table(db_id, table_name)?;
        let jobs = {
            let mut table = write_table(&table_ref);
            if table.state != OlapTableState::Normal {
                return Err(format!(
                    "Table[{table_name}]'s state is not NORMAL. Do not allow doing ALTER ops"
                ));
            }
            let mut names = Vec::with_capacity(requests.len());
            for request in &requests {
                if table.has_index_name(&request.rollup_name)
                    || names.contains(&request.rollup_name)
                {
                    return Err(format!(
                        "Rollup name[{}] already exists",
                        request.rollup_name
                    ));
                }
                names.push(request.rollup_name.clone());
            }

            let mut jobs = Vec::with_capacity(requests.len());
            for request in requests {
                jobs.push(self.create_rollup_job(db_id, &table, request)?);
            }
            for (job, plan_meta) in &jobs {
                for (meta, index) in plan_meta {
                    register_shadow_tablets(self.ctx.catalog.inverted_index(), *meta, index)?;
                }
                tracing::info!(
                    job_id = job.job_id(),
                    table = table.name.as_str(),
                    rollup = job.rollup_index_name().as_str(),
                    "admitted rollup job"
                );
            }
            table.state = OlapTableState::Rollup;
            jobs
        };

        let jobs: Vec<Arc<RollupJob>> = jobs.into_iter().map(|(job, _)| job).collect();
        for job in &jobs {
            self.add_job(Arc::clone(job) as Arc<dyn AlterJob>);
        }
        let mut job_ids = Vec::with_capacity(jobs.len());
        for (i, job) in jobs.iter().enumerate() {
            if let Err(err) = self.ctx.edit_log.log_alter_job(&job.to_record()) {
                tracing::error!(
                    job_id = job.job_id(),
                    error = err.as_str(),
                    "failed to log new rollup job"
                );
                // the batch is admitted whole or not at all; logged jobs stay as CANCELLED
                let cancel_msg = format!("failed to log rollup job: {err}");
                for logged in &jobs[..i] {
                    logged.cancel(&cancel_msg);
                }
                for unlogged in &jobs[i..] {
                    unlogged.cancel(&cancel_msg);
                    self.jobs
                        .write()
                        .expect("alter jobs lock")
                        .remove(&unlogged.job_id());
                }
                let job: Arc<dyn AlterJob> = Arc::clone(job) as Arc<dyn AlterJob>;
                self.on_job_done(&job);
                return Err(err);
            }
            job_ids.push(job.job_id());
        }
        Ok(job_ids)
    }

    fn create_rollup_job(
        &self,
        db_id: i64,
        table: &OlapTable,
        request: AddRollupRequest,
    ) -> Result<AdmittedJob, String> {
        let base_index_name = match request.base_index_name.as_deref() {
            Some(name) => name.to_string(),
            None => table
                .index_name_by_id(table.base_index_id)
                .unwrap_or(table.name.as_str())
                .to_string(),
        };
        let base_index_id = table
            .index_id_by_name(&base_index_name)
            .ok_or_else(|| format!("Base index[{base_index_name}] does not exist"))?;
        let base_meta = table
            .index_meta(base_index_id)
            .ok_or_else(|| format!("Base index[{base_index_name}] has no schema"))?;
        if request.columns.is_empty() {
            return Err(format!("No column in rollup[{}]", request.rollup_name));
        }

        let mut next_unique_id = base_meta
            .schema
            .iter()
            .map(|c| c.unique_id)
            .max()
            .unwrap_or(-1)
            + 1;
        let mut rollup_schema = Vec::with_capacity(request.columns.len());
        for column in &request.columns {
            if column.define_expr.is_some() {
                let mut computed = column.clone();
                if computed.unique_id < 0 {
                    computed.unique_id = next_unique_id;
                    next_unique_id += 1;
                }
                rollup_schema.push(computed);
                continue;
            }
            let base_column = base_meta
                .schema
                .iter()
                .find(|c| c.name_eq(&column.name))
                .ok_or_else(|| {
                    format!(
                        "Column[{}] does not exist in base index[{base_index_name}]",
                        column.name
                    )
                })?;
            let mut rollup_column = base_column.clone();
            rollup_column.is_key = column.is_key;
            rollup_schema.push(rollup_column);
        }
        if !rollup_schema.iter().any(|c| c.is_key) {
            return Err(format!(
                "No key column is found in rollup[{}]",
                request.rollup_name
            ));
        }

        let short_key_column_count = calc_short_key_column_count(&rollup_schema)?;
        let schema_version = 0;
        let rollup_schema_hash =
            schema_hash(schema_version, &rollup_schema, &table.bf_columns, table.bf_fpp);
        let rollup_index_id = self.ctx.catalog.next_id();
        let job_id = self.ctx.catalog.next_id();
        let plan = materialize_shadow_index(
            self.ctx.catalog.as_ref(),
            table,
            base_index_id,
            rollup_index_id,
            rollup_schema_hash,
        )?;

        let tablet_metas = plan
            .partition_id_to_rollup_index
            .iter()
            .filter_map(|(partition_id, index)| {
                table.partition(*partition_id).map(|partition| {
                    (
                        TabletMeta {
                            db_id,
                            table_id: table.id,
                            partition_id: *partition_id,
                            index_id: rollup_index_id,
                            storage_medium: partition.storage_medium,
                        },
                        index.clone(),
                    )
                })
            })
            .collect();

        let timeout_second = request
            .timeout_second
            .unwrap_or(self.ctx.config.alter_table_timeout.as_secs() as i64);
        let desc = RollupJobDesc {
            job_id,
            db_id,
            table_id: table.id,
            table_name: table.name.clone(),
            timeout_ms: timeout_second * 1000,
            base_index_id,
            rollup_index_id,
            base_index_name,
            rollup_index_name: request.rollup_name,
            rollup_schema,
            base_schema_hash: base_meta.schema_hash,
            rollup_schema_hash,
            rollup_keys_type: request.keys_type.unwrap_or(base_meta.keys_type),
            rollup_short_key_column_count: short_key_column_count,
            schema_version,
            origin_stmt: request.origin_stmt,
            view_define_sql: request.view_define_sql,
            is_colocate_mv_index: request.is_colocate_mv_index,
            where_clause: request.where_clause,
        };
        let job = Arc::new(RollupJob::new(desc, plan, Arc::clone(&self.ctx)));
        Ok((job, tablet_metas))
    }

    /// One scheduler tick: expires old finished jobs, then steps every live job.
    pub fn run_once(&self) {
        self.clear_expired_jobs();

        let jobs = self.snapshot_jobs();
        let cap = self.ctx.config.max_running_rollup_job_num_per_table;
        let mut active_per_table: HashMap<i64, usize> = HashMap::new();
        for job in &jobs {
            if matches!(job.state(), JobState::WaitingTxn | JobState::Running) {
                *active_per_table.entry(job.table_id()).or_default() += 1;
            }
        }

        for job in jobs {
            let state = job.state();
            if state.is_final_state() {
                continue;
            }
            if state == JobState::Pending {
                let active = active_per_table.entry(job.table_id()).or_default();
                if *active >= cap {
                    tracing::debug!(
                        job_id = job.job_id(),
                        table_id = job.table_id(),
                        "too many running rollup jobs on table, wait"
                    );
                    continue;
                }
                *active += 1;
            }
            job.run();
            if job.state().is_final_state() {
                self.on_job_done(&job);
            }
        }
    }

    fn clear_expired_jobs(&self) {
        let keep_ms = self.ctx.config.history_job_keep_max.as_millis() as i64;
        let now = now_ms();
        let expired: Vec<i64> = self
            .snapshot_jobs()
            .iter()
            .filter(|job| job.is_expired(now, keep_ms))
            .map(|job| job.job_id())
            .collect();
        if expired.is_empty() {
            return;
        }
        if let Err(err) = self.ctx.edit_log.log_remove_alter_jobs(&expired) {
            tracing::error!(error = err.as_str(), "failed to log removal of expired alter jobs");
            return;
        }
        let mut guard = self.jobs.write().expect("alter jobs lock");
        for job_id in &expired {
            guard.remove(job_id);
        }
        tracing::info!(jobs = ?expired, "removed expired alter jobs");
    }

    /// Returns the table to NORMAL once no other live job works on it.
    fn on_job_done(&self, job: &Arc<dyn AlterJob>) {
        let others_active = self.snapshot_jobs().iter().any(|other| {
            other.job_id() != job.job_id()
                && other.table_id() == job.table_id()
                && !other.state().is_final_state()
        });
        if others_active {
            return;
        }
        let Some(table_ref) = self.ctx.catalog.get_table(job.db_id(), job.table_id()) else {
            return;
        };
        let mut table = write_table(&table_ref);
        if matches!(
            table.state,
            OlapTableState::Rollup | OlapTableState::WaitingStable
        ) {
            table.state = OlapTableState::Normal;
        }
    }

    /// Starts the named scheduler thread. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<(), String> {
        if self
            .scheduler
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let handler = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("alter_scheduler".to_string())
            .spawn(move || handler.run_scheduler())
            .map_err(|e| format!("spawn alter scheduler thread failed: {e}"))?;
        *self
            .scheduler
            .thread
            .lock()
            .expect("alter scheduler thread lock") = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        {
            let mut shutdown = self
                .scheduler
                .shutdown
                .lock()
                .expect("alter scheduler lock");
            *shutdown = true;
            self.scheduler.shutdown_cv.notify_all();
        }
        let handle = self
            .scheduler
            .thread
            .lock()
            .expect("alter scheduler thread lock")
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::error!("alter scheduler thread panicked");
        }
    }

    fn run_scheduler(&self) {
        let interval = self.ctx.config.scheduler_interval;
        tracing::info!(interval_ms = interval.as_millis() as u64, "alter scheduler started");
        loop {
            self.run_once();
            let guard = self
                .scheduler
                .shutdown
                .lock()
                .expect("alter scheduler lock");
            let (guard, _) = self
                .scheduler
                .shutdown_cv
                .wait_timeout_while(guard, interval, |stop| !*stop)
                .expect("alter scheduler lock");
            if *guard {
                break;
            }
        }
        tracing::info!("alter scheduler stopped");
    }

    /// Cancels every live rollup job of a table.
    pub fn cancel_rollup(&self, db_id: i64, table_name: &str, err_msg: &str) -> Result<Vec<i64>, String> {
        let table_ref = self.get_table(db_id, table_name)?;
        let table_id = read_table(&table_ref).id;
        let mut cancelled = Vec::new();
        for job in self.snapshot_jobs() {
            if job.db_id() != db_id || job.table_id() != table_id {
                continue;
            }
            if job.cancel(err_msg) {
                cancelled.push(job.job_id());
                self.on_job_done(&job);
            }
        }
        if cancelled.is_empty() {
            return Err(format!("Table[{table_name}] is not under ROLLUP"));
        }
        Ok(cancelled)
    }

    pub fn cancel_job(&self, job_id: i64, err_msg: &str) -> Result<bool, String> {
        let job = self
            .get_job(job_id)
            .ok_or_else(|| format!("rollup job {job_id} does not exist"))?;
        let cancelled = job.cancel(err_msg);
        self.on_job_done(&job);
        Ok(cancelled)
    }

    /// Drop table and drop database path. Returns how many jobs were cancelled.
    pub fn cancel_jobs_of_table(&self, db_id: i64, table_id: i64, err_msg: &str) -> usize {
        self.snapshot_jobs()
            .iter()
            .filter(|job| job.db_id() == db_id && job.table_id() == table_id)
            .filter(|job| job.cancel(err_msg))
            .count()
    }

    /// Routes a backend report. A successful ALTER advances the shadow replica to the
    /// transformed version.
    pub fn finish_task(&self, report: &TaskReport) -> Result<(), String> {
        let task = self.ctx.task_queue.finish_task(report)?;
        if task.task_type != TaskType::Alter || !report.status.is_ok() {
            return Ok(());
        }
        let Some(version) = report
            .version
            .or_else(|| task.alter_request().map(|req| req.version))
        else {
            return Ok(());
        };
        self.update_shadow_replica_version(task.tablet_id, task.backend_id, version)
    }

    fn update_shadow_replica_version(&self, tablet_id: i64, backend_id: i64, version: i64) -> Result<(), String> {
        let inverted_index = self.ctx.catalog.inverted_index();
        let meta = inverted_index
            .tablet_meta(tablet_id)
            .ok_or_else(|| format!("tablet {tablet_id} is not in inverted index"))?;
        let table_ref = self
            .ctx
            .catalog
            .get_table(meta.db_id, meta.table_id)
            .ok_or_else(|| format!("table {} of tablet {tablet_id} does not exist", meta.table_id))?;
        let mut table = write_table(&table_ref);
        let replica = table
            .partition_mut(meta.partition_id)
            .and_then(|p| p.index_mut(meta.index_id))
            .and_then(|index| index.tablet_mut(tablet_id))
            .and_then(|tablet| tablet.replica_by_backend_mut(backend_id))
            .ok_or_else(|| format!("replica of tablet {tablet_id} on backend {backend_id} not found"))?;
        replica.update_version(version);
        let replica = replica.clone();
        drop(table);
        inverted_index.add_replica(tablet_id, replica)
    }

    fn job_from_record(&self, record: &AlterJobRecord) -> Result<Arc<dyn AlterJob>, String> {
        match record {
            AlterJobRecord::Rollup(rollup) => {
                let job: Arc<dyn AlterJob> =
                    Arc::new(RollupJob::from_record(rollup, Arc::clone(&self.ctx))?);
                Ok(job)
            }
        }
    }

    /// Applies one journal entry. The first record of a job registers it.
    pub fn replay_journal_entry(&self, entry: &JournalEntry) -> Result<(), String> {
        match entry {
            JournalEntry::AlterJob { job: record } => {
                let job = match self.get_job(record.job_id()) {
                    Some(job) => job,
                    None => {
                        let job = self.job_from_record(record)?;
                        self.add_job(Arc::clone(&job));
                        job
                    }
                };
                job.replay(record)?;
                if job.state().is_final_state() {
                    self.on_job_done(&job);
                }
                Ok(())
            }
            JournalEntry::RemoveAlterJobs { job_ids } => {
                let mut guard = self.jobs.write().expect("alter jobs lock");
                for job_id in job_ids {
                    guard.remove(job_id);
                }
                Ok(())
            }
        }
    }

    /// Replays a whole journal file and returns the number of entries applied.
    pub fn replay_journal(&self, path: impl AsRef<Path>) -> Result<usize, String> {
        let entries = read_journal(path)?;
        for entry in &entries {
            self.replay_journal_entry(entry)?;
        }
        Ok(entries.len())
    }

    pub fn save_image(&self, path: impl AsRef<Path>) -> Result<(), String> {
        let image = AlterImage {
            jobs: self.snapshot_jobs().iter().map(|job| job.to_record()).collect(),
        };
        write_image(path, &image)
    }

    /// Loads a checkpoint and re-applies each job's catalog effects. Returns the job count.
    pub fn load_image(&self, path: impl AsRef<Path>) -> Result<usize, String> {
        let image = read_image(path)?;
        for record in &image.jobs {
            let job = self.job_from_record(record)?;
            job.replay(record)?;
            self.add_job(job);
        }
        Ok(image.jobs.len())
    }

    /// `SHOW ALTER TABLE ROLLUP` rows of a database, oldest job first.
    pub fn show_rollup_jobs(&self, db_id: i64) -> Vec<JobInfoRow> {
        self.snapshot_jobs()
            .iter()
            .filter(|job| job.db_id() == db_id)
            .map(|job| job.info())
            .collect()
    }

    pub fn get_unfinished_tasks(&self, job_id: i64, limit: usize) -> Result<Vec<UnfinishedTaskRow>, String> {
        let job = self
            .get_job(job_id)
            .ok_or_else(|| format!("rollup job {job_id} does not exist"))?;
        Ok(job.unfinished_tasks(limit))
    }
}

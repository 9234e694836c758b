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
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis::expr::DefineExprParser;
use crate::analysis::rollup_params::ExprAnalyzer;
use crate::catalog::metastore::Catalog;
use crate::common::config::AlterJobConfig;
use crate::persist::alter_job_record::AlterJobRecord;
use crate::persist::edit_log::EditLog;
use crate::task::executor::AgentTaskExecutor;
use crate::task::task_queue::AgentTaskQueue;
use crate::transaction::TransactionManager;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    WaitingTxn,
    Running,
    Finished,
    Cancelled,
}

impl JobState {
    pub fn is_final_state(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::WaitingTxn => "WAITING_TXN",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Rollup,
}

/// Error raised by a job step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlterError {
    /// The job cannot make progress and must be cancelled with this message.
    Cancel(String),
    /// A step was entered in the wrong state.
    IllegalState {
        expected: JobState,
        actual: JobState,
    },
}

impl AlterError {
    pub fn cancel(msg: impl Into<String>) -> Self {
        Self::Cancel(msg.into())
    }
}

impl fmt::Display for AlterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancel(msg) => f.write_str(msg),
            Self::IllegalState { expected, actual } => {
                write!(f, "illegal job state: expected {expected}, actual {actual}")
            }
        }
    }
}

impl std::error::Error for AlterError {}

/// What one scheduler tick did to a job.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    /// Preconditions not met yet; retried next tick.
    NoOp,
    Advanced(JobState),
    Cancelled,
}

/// Collaborators injected into every alter job.
#[derive(Clone)]
pub struct AlterContext {
    pub catalog: Arc<dyn Catalog>,
    pub txn_mgr: Arc<dyn TransactionManager>,
    pub task_queue: Arc<AgentTaskQueue>,
    pub executor: Arc<AgentTaskExecutor>,
    pub edit_log: Arc<dyn EditLog>,
    pub analyzer: Arc<dyn ExprAnalyzer>,
    pub define_expr_parser: Option<Arc<dyn DefineExprParser>>,
    pub config: AlterJobConfig,
}

/// Progress row of `SHOW ALTER TABLE ROLLUP`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JobInfoRow {
    pub job_id: i64,
    pub table_name: String,
    pub create_time: String,
    pub finish_time: String,
    pub base_index_name: String,
    pub rollup_index_name: String,
    pub rollup_index_id: i64,
    pub transaction_id: i64,
    pub state: String,
    pub err_msg: String,
    /// `done/total` while RUNNING, otherwise `NULL`.
    pub progress: String,
    pub timeout_second: i64,
}

impl JobInfoRow {
    pub fn to_strings(&self) -> Vec<String> {
        vec![
            self.job_id.to_string(),
            self.table_name.clone(),
            self.create_time.clone(),
            self.finish_time.clone(),
            self.base_index_name.clone(),
            self.rollup_index_name.clone(),
            self.rollup_index_id.to_string(),
            self.transaction_id.to_string(),
            self.state.clone(),
            self.err_msg.clone(),
            self.progress.clone(),
            self.timeout_second.to_string(),
        ]
    }
}

/// `[backend id, base tablet id, signature]` of a task still running.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnfinishedTaskRow {
    pub backend_id: i64,
    pub base_tablet_id: i64,
    pub signature: i64,
}

/// State machine shape shared by alter jobs. The handler only sees jobs through this trait.
pub trait AlterJob: Send + Sync {
    fn job_id(&self) -> i64;

    fn job_type(&self) -> JobType;

    fn db_id(&self) -> i64;

    fn table_id(&self) -> i64;

    fn state(&self) -> JobState;

    fn finished_time_ms(&self) -> i64;

    /// Advances the job by at most one step. Fatal errors cancel the job.
    fn run(&self);

    /// Returns false when the job already reached a terminal state.
    fn cancel(&self, err_msg: &str) -> bool;

    /// Re-applies the catalog effects recorded in `record` and adopts its state.
    fn replay(&self, record: &AlterJobRecord) -> Result<(), String>;

    fn to_record(&self) -> AlterJobRecord;

    fn info(&self) -> JobInfoRow;

    fn unfinished_tasks(&self, limit: usize) -> Vec<UnfinishedTaskRow>;

    fn is_expired(&self, now_ms: i64, keep_ms: i64) -> bool {
        let finished = self.finished_time_ms();
        self.state().is_final_state() && finished > 0 && now_ms - finished > keep_ms
    }
}

#[cfg(test)]
mod tests {
    use super::{AlterError, JobState};

    #[test]
    fn only_finished_and_cancelled_are_final() {
        assert!(JobState::Finished.is_final_state());
        assert!(JobState::Cancelled.is_final_state());
        assert!(!JobState::Pending.is_final_state());
        assert!(!JobState::WaitingTxn.is_final_state());
        assert!(!JobState::Running.is_final_state());
        assert_eq!(JobState::WaitingTxn.to_string(), "WAITING_TXN");
    }

    #[test]
    fn illegal_state_message_names_both_states() {
        let err = AlterError::IllegalState {
            expected: JobState::Running,
            actual: JobState::Pending,
        };
        assert_eq!(err.to_string(), "illegal job state: expected RUNNING, actual PENDING");
        assert_eq!(AlterError::cancel("Timeout").to_string(), "Timeout");
    }
}

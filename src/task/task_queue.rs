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
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::common::status::Status;
use crate::task::agent_task::{AgentTask, TaskType};
use crate::task::batch::AgentBatchTask;

/// Completion report of one agent task sent back by a backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub backend_id: i64,
    pub task_type: TaskType,
    pub signature: i64,
    pub status: Status,
    /// Version the replica reached, reported by ALTER tasks.
    #[serde(default)]
    pub version: Option<i64>,
}

impl TaskReport {
    pub fn ok(backend_id: i64, task_type: TaskType, signature: i64) -> Self {
        Self {
            backend_id,
            task_type,
            signature,
            status: Status::ok(),
            version: None,
        }
    }

    pub fn failed(backend_id: i64, task_type: TaskType, signature: i64, status: Status) -> Self {
        Self {
            backend_id,
            task_type,
            signature,
            status,
            version: None,
        }
    }
}

type TaskKey = (i64, TaskType, i64);

/// In-flight agent tasks keyed by `(backend, type, signature)`.
#[derive(Debug, Default)]
pub struct AgentTaskQueue {
    tasks: Mutex<BTreeMap<TaskKey, Arc<AgentTask>>>,
}

impl AgentTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when a task with the same key is already queued.
    pub fn add_task(&self, task: Arc<AgentTask>) -> bool {
        let key = (task.backend_id, task.task_type, task.signature);
        let mut guard = self.tasks.lock().expect("task queue lock");
        if guard.contains_key(&key) {
            return false;
        }
        guard.insert(key, task);
        true
    }

    pub fn add_batch_task(&self, batch: &AgentBatchTask) {
        for task in batch.all_tasks() {
            self.add_task(Arc::clone(task));
        }
    }

    pub fn remove_batch_task(&self, batch: &AgentBatchTask, task_type: TaskType) {
        let mut guard = self.tasks.lock().expect("task queue lock");
        for task in batch.all_tasks().filter(|t| t.task_type == task_type) {
            guard.remove(&(task.backend_id, task.task_type, task.signature));
        }
    }

    pub fn remove_task(&self, backend_id: i64, task_type: TaskType, signature: i64) {
        let mut guard = self.tasks.lock().expect("task queue lock");
        guard.remove(&(backend_id, task_type, signature));
    }

    pub fn get_task(&self, backend_id: i64, task_type: TaskType, signature: i64) -> Option<Arc<AgentTask>> {
        let guard = self.tasks.lock().expect("task queue lock");
        guard.get(&(backend_id, task_type, signature)).cloned()
    }

    pub fn task_num(&self) -> usize {
        self.tasks.lock().expect("task queue lock").len()
    }

    pub fn task_num_of_type(&self, task_type: TaskType) -> usize {
        let guard = self.tasks.lock().expect("task queue lock");
        guard.keys().filter(|(_, t, _)| *t == task_type).count()
    }

    /// Applies a backend report to the queued task and returns it.
    ///
    /// Successful tasks and CREATE failures leave the queue. A failed ALTER stays queued so it can
    /// be resent, unless the status is fatal.
    pub fn finish_task(&self, report: &TaskReport) -> Result<Arc<AgentTask>, String> {
        let task = self
            .get_task(report.backend_id, report.task_type, report.signature)
            .ok_or_else(|| {
                format!(
                    "cannot find task. type: {}, backend: {}, signature: {}",
                    report.task_type, report.backend_id, report.signature
                )
            })?;

        match (report.task_type, report.status.is_ok()) {
            (TaskType::Create, true) => {
                if let Some(req) = task.create_request() {
                    req.latch.count_down(&task.backend_id, &task.tablet_id);
                }
                task.set_finished();
                self.remove_task(task.backend_id, task.task_type, task.signature);
            }
            (TaskType::Create, false) => {
                let msg = format!("{}: {}", task.backend_id, report.status.error_msg);
                task.set_failed(msg.clone());
                if let Some(req) = task.create_request() {
                    req.latch
                        .count_down_to_zero(Status::new(report.status.code, msg));
                }
                self.remove_task(task.backend_id, task.task_type, task.signature);
            }
            (TaskType::Alter, true) => {
                task.set_finished();
                self.remove_task(task.backend_id, task.task_type, task.signature);
            }
            (TaskType::Alter, false) => {
                if report.status.is_fatal() {
                    task.set_failed(report.status.error_msg.clone());
                    self.remove_task(task.backend_id, task.task_type, task.signature);
                } else {
                    let failed_times = task.fail(report.status.error_msg.clone());
                    tracing::warn!(
                        backend_id = task.backend_id,
                        tablet_id = task.tablet_id,
                        failed_times,
                        error = report.status.error_msg.as_str(),
                        "alter replica task failed"
                    );
                }
            }
        }
        Ok(task)
    }
}

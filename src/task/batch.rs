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
use std::sync::Arc;

use crate::task::agent_task::AgentTask;

/// Tasks of one job step, grouped by backend.
#[derive(Debug, Default)]
pub struct AgentBatchTask {
    backend_to_tasks: BTreeMap<i64, Vec<Arc<AgentTask>>>,
}

impl AgentBatchTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, task: Arc<AgentTask>) {
        self.backend_to_tasks
            .entry(task.backend_id)
            .or_default()
            .push(task);
    }

    pub fn all_tasks(&self) -> impl Iterator<Item = &Arc<AgentTask>> {
        self.backend_to_tasks.values().flatten()
    }

    pub fn backend_tasks(&self) -> impl Iterator<Item = (i64, &[Arc<AgentTask>])> {
        self.backend_to_tasks
            .iter()
            .map(|(backend_id, tasks)| (*backend_id, tasks.as_slice()))
    }

    pub fn task_num(&self) -> usize {
        self.backend_to_tasks.values().map(Vec::len).sum()
    }

    pub fn finished_task_num(&self) -> usize {
        self.all_tasks().filter(|t| t.is_finished()).count()
    }

    pub fn is_finished(&self) -> bool {
        self.all_tasks().all(|t| t.is_finished())
    }

    /// At most `limit` unfinished tasks in backend order.
    pub fn unfinished_tasks(&self, limit: usize) -> Vec<Arc<AgentTask>> {
        self.all_tasks()
            .filter(|t| !t.is_finished())
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backend_to_tasks.is_empty()
    }
}

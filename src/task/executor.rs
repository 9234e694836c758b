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

use threadpool::ThreadPool;

use crate::common::status::Status;
use crate::task::agent_task::{AgentTask, TaskType};
use crate::task::batch::AgentBatchTask;

/// Transport that delivers tasks to one backend.
pub trait AgentClient: Send + Sync {
    fn submit_tasks(&self, backend_id: i64, tasks: &[Arc<AgentTask>]) -> Result<(), String>;
}

/// Sends batches on a named worker pool, one job per backend.
pub struct AgentTaskExecutor {
    pool: ThreadPool,
    client: Arc<dyn AgentClient>,
}

impl AgentTaskExecutor {
    pub fn new(client: Arc<dyn AgentClient>, threads: usize) -> Self {
        Self {
            pool: ThreadPool::with_name("alter agent task".to_string(), threads.max(1)),
            client,
        }
    }

    pub fn submit(&self, batch: &AgentBatchTask) {
        for (backend_id, tasks) in batch.backend_tasks() {
            let tasks: Vec<Arc<AgentTask>> = tasks.to_vec();
            let client = Arc::clone(&self.client);
            self.pool.execute(move || {
                if let Err(err) = client.submit_tasks(backend_id, &tasks) {
                    tracing::warn!(
                        backend_id,
                        tasks = tasks.len(),
                        error = err.as_str(),
                        "failed to send agent tasks"
                    );
                    fail_unsent(backend_id, &tasks, &err);
                }
            });
        }
    }

    /// Blocks until every queued send has run.
    pub fn join(&self) {
        self.pool.join();
    }
}

impl std::fmt::Debug for AgentTaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTaskExecutor")
            .field("max_count", &self.pool.max_count())
            .field("queued", &self.pool.queued_count())
            .finish()
    }
}

fn fail_unsent(backend_id: i64, tasks: &[Arc<AgentTask>], err: &str) {
    for task in tasks {
        task.fail(err);
        if task.task_type == TaskType::Create
            && let Some(req) = task.create_request()
        {
            req.latch
                .count_down_to_zero(Status::internal_error(format!("{backend_id}: {err}")));
        }
    }
}

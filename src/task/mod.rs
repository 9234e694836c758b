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
//! Agent tasks sent to backends and the bookkeeping that tracks their completion.

pub mod agent_task;
pub mod batch;
pub mod executor;
pub mod latch;
pub mod task_queue;

#[cfg(test)]
pub(crate) mod test_util;

pub use agent_task::{
    AgentTask, AlterReplicaRequest, CreateReplicaLatch, CreateReplicaRequest, TaskBody, TaskType,
};
pub use batch::AgentBatchTask;
pub use executor::{AgentClient, AgentTaskExecutor};
pub use latch::MarkedCountDownLatch;
pub use task_queue::{AgentTaskQueue, TaskReport};

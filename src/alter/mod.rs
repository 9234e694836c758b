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
//! Asynchronous rollup jobs and the handler that schedules them.

pub mod handler;
pub mod job;
pub mod rollup_job;
pub mod service;
pub mod shadow_index;

pub use handler::{AddRollupRequest, AlterHandler};
pub use job::{
    AlterContext, AlterError, AlterJob, JobInfoRow, JobState, JobType, StepOutcome,
    UnfinishedTaskRow,
};
pub use rollup_job::{MAX_FAILED_TIMES, RollupJob, RollupJobDesc};
pub use service::{AlterServiceDeps, start_alter_service, start_alter_service_from_env};
pub use shadow_index::{ShadowIndexPlan, materialize_shadow_index};

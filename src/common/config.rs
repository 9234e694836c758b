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
use std::time::Duration;

use crate::common::app_config::{AlterConfig, config as fe_app_config};

pub(crate) fn tablet_create_timeout_second() -> u64 {
    fe_app_config()
        .ok()
        .map(|c| c.alter.tablet_create_timeout_second)
        .unwrap_or(10)
}

pub(crate) fn max_create_table_timeout_second() -> u64 {
    fe_app_config()
        .ok()
        .map(|c| c.alter.max_create_table_timeout_second)
        .unwrap_or(600)
}

pub(crate) fn alter_table_timeout_second() -> u64 {
    fe_app_config()
        .ok()
        .map(|c| c.alter.alter_table_timeout_second)
        .unwrap_or(86_400)
}

pub(crate) fn history_job_keep_max_second() -> u64 {
    fe_app_config()
        .ok()
        .map(|c| c.alter.history_job_keep_max_second)
        .unwrap_or(7 * 24 * 3600)
}

pub(crate) fn alter_scheduler_interval_millisecond() -> u64 {
    fe_app_config()
        .ok()
        .map(|c| c.alter.alter_scheduler_interval_millisecond)
        .unwrap_or(10_000)
}

pub(crate) fn max_running_rollup_job_num_per_table() -> usize {
    fe_app_config()
        .ok()
        .map(|c| c.alter.max_running_rollup_job_num_per_table)
        .unwrap_or(1)
}

pub(crate) fn alter_max_worker_threads() -> usize {
    fe_app_config()
        .ok()
        .map(|c| c.alter.alter_max_worker_threads)
        .unwrap_or(4)
}

/// Alter settings captured once and handed to the handler and its jobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlterJobConfig {
    pub tablet_create_timeout: Duration,
    pub max_create_table_timeout: Duration,
    pub alter_table_timeout: Duration,
    pub history_job_keep_max: Duration,
    pub scheduler_interval: Duration,
    pub max_running_rollup_job_num_per_table: usize,
    pub max_worker_threads: usize,
}

impl AlterJobConfig {
    /// Snapshot of the process-wide config, or the built-in defaults when no config file
    /// has been loaded.
    pub fn current() -> Self {
        Self {
            tablet_create_timeout: Duration::from_secs(tablet_create_timeout_second()),
            max_create_table_timeout: Duration::from_secs(max_create_table_timeout_second()),
            alter_table_timeout: Duration::from_secs(alter_table_timeout_second()),
            history_job_keep_max: Duration::from_secs(history_job_keep_max_second()),
            scheduler_interval: Duration::from_millis(alter_scheduler_interval_millisecond()),
            max_running_rollup_job_num_per_table: max_running_rollup_job_num_per_table(),
            max_worker_threads: alter_max_worker_threads(),
        }
    }

    /// Bounded wait for replica creation: `min(per_replica * replicas, absolute_max)`.
    pub fn create_replica_timeout(&self, total_replica_num: usize) -> Duration {
        let per_replica = self
            .tablet_create_timeout
            .saturating_mul(u32::try_from(total_replica_num).unwrap_or(u32::MAX));
        per_replica.min(self.max_create_table_timeout)
    }
}

impl From<&AlterConfig> for AlterJobConfig {
    fn from(cfg: &AlterConfig) -> Self {
        Self {
            tablet_create_timeout: Duration::from_secs(cfg.tablet_create_timeout_second),
            max_create_table_timeout: Duration::from_secs(cfg.max_create_table_timeout_second),
            alter_table_timeout: Duration::from_secs(cfg.alter_table_timeout_second),
            history_job_keep_max: Duration::from_secs(cfg.history_job_keep_max_second),
            scheduler_interval: Duration::from_millis(cfg.alter_scheduler_interval_millisecond),
            max_running_rollup_job_num_per_table: cfg.max_running_rollup_job_num_per_table,
            max_worker_threads: cfg.alter_max_worker_threads,
        }
    }
}

impl Default for AlterJobConfig {
    fn default() -> Self {
        Self::from(&AlterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::AlterJobConfig;

    #[test]
    fn create_replica_timeout_is_capped() {
        let cfg = AlterJobConfig::default();
        assert_eq!(cfg.create_replica_timeout(3), Duration::from_secs(30));
        assert_eq!(cfg.create_replica_timeout(1000), Duration::from_secs(600));
    }

    #[test]
    fn current_falls_back_to_defaults_without_config_file() {
        if std::env::var_os("NOVAROCKS_FE_CONFIG").is_some() {
            return;
        }
        assert_eq!(AlterJobConfig::current(), AlterJobConfig::default());
    }
}

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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<FeConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static FeConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = FeConfig::load_from_file(path.as_ref())?;
    let _ = CONFIG.set(cfg);
    CONFIG.get().ok_or_else(|| anyhow!("fe config not initialized"))
}

pub fn init_from_env_or_default() -> Result<&'static FeConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    init_from_path(path)
}

pub fn config() -> Result<&'static FeConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVAROCKS_FE_CONFIG")
        && !p.trim().is_empty()
    {
        return Ok(PathBuf::from(p.trim()));
    }

    let default_path = PathBuf::from("novarocks_fe.toml");
    if default_path.exists() {
        return Ok(default_path);
    }

    Err(anyhow!(
        "missing config file: set $NOVAROCKS_FE_CONFIG or create ./novarocks_fe.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct FeConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Full tracing EnvFilter expression, takes precedence over `log_level`.
    /// Example: "novarocks_fe_alter=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub alter: AlterConfig,

    #[serde(default)]
    pub meta: MetaConfig,
}

impl FeConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: FeConfig = toml::from_str(s)?;
        cfg.alter.validate()?;
        Ok(cfg)
    }

    pub fn effective_log_filter(&self) -> &str {
        self.log_filter
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(&self.log_level)
    }
}

impl Default for FeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            alter: AlterConfig::default(),
            meta: MetaConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AlterConfig {
    /// Maximal waiting time for creating a single replica.
    #[serde(default = "default_tablet_create_timeout_second")]
    pub tablet_create_timeout_second: u64,
    /// Upper bound of the whole replica creation wait.
    #[serde(default = "default_max_create_table_timeout_second")]
    pub max_create_table_timeout_second: u64,
    #[serde(default = "default_alter_table_timeout_second")]
    pub alter_table_timeout_second: u64,
    /// Terminal jobs are dropped from the registry after this long.
    #[serde(default = "default_history_job_keep_max_second")]
    pub history_job_keep_max_second: u64,
    #[serde(default = "default_alter_scheduler_interval_millisecond")]
    pub alter_scheduler_interval_millisecond: u64,
    #[serde(default = "default_max_running_rollup_job_num_per_table")]
    pub max_running_rollup_job_num_per_table: usize,
    #[serde(default = "default_alter_max_worker_threads")]
    pub alter_max_worker_threads: usize,
}

fn default_tablet_create_timeout_second() -> u64 {
    10
}
fn default_max_create_table_timeout_second() -> u64 {
    600
}
fn default_alter_table_timeout_second() -> u64 {
    86_400
}
fn default_history_job_keep_max_second() -> u64 {
    7 * 24 * 3600
}
fn default_alter_scheduler_interval_millisecond() -> u64 {
    10_000
}
fn default_max_running_rollup_job_num_per_table() -> usize {
    1
}
fn default_alter_max_worker_threads() -> usize {
    4
}

impl AlterConfig {
    fn validate(&self) -> Result<()> {
        if self.alter_scheduler_interval_millisecond == 0 {
            return Err(anyhow!("alter.alter_scheduler_interval_millisecond must be > 0"));
        }
        if self.max_running_rollup_job_num_per_table == 0 {
            return Err(anyhow!("alter.max_running_rollup_job_num_per_table must be > 0"));
        }
        if self.alter_max_worker_threads == 0 {
            return Err(anyhow!("alter.alter_max_worker_threads must be > 0"));
        }
        Ok(())
    }
}

impl Default for AlterConfig {
    fn default() -> Self {
        Self {
            tablet_create_timeout_second: default_tablet_create_timeout_second(),
            max_create_table_timeout_second: default_max_create_table_timeout_second(),
            alter_table_timeout_second: default_alter_table_timeout_second(),
            history_job_keep_max_second: default_history_job_keep_max_second(),
            alter_scheduler_interval_millisecond: default_alter_scheduler_interval_millisecond(),
            max_running_rollup_job_num_per_table: default_max_running_rollup_job_num_per_table(),
            alter_max_worker_threads: default_alter_max_worker_threads(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct MetaConfig {
    #[serde(default = "default_meta_dir")]
    pub meta_dir: String,
}

fn default_meta_dir() -> String {
    "meta".to_string()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            meta_dir: default_meta_dir(),
        }
    }
}

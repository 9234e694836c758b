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

use crate::alter::handler::AlterHandler;
use crate::alter::job::AlterContext;
use crate::analysis::expr::DefineExprParser;
use crate::analysis::rollup_params::{ExprAnalyzer, SlotBindingAnalyzer};
use crate::catalog::metastore::Catalog;
use crate::common::app_config::{self, FeConfig};
use crate::common::config::AlterJobConfig;
use crate::common::logging;
use crate::persist::edit_log::JournalEditLog;
use crate::task::executor::{AgentClient, AgentTaskExecutor};
use crate::task::task_queue::AgentTaskQueue;
use crate::transaction::TransactionManager;

/// Collaborators owned by the rest of the frontend.
pub struct AlterServiceDeps {
    pub catalog: Arc<dyn Catalog>,
    pub txn_mgr: Arc<dyn TransactionManager>,
    pub task_queue: Arc<AgentTaskQueue>,
    pub client: Arc<dyn AgentClient>,
    pub analyzer: Option<Arc<dyn ExprAnalyzer>>,
    pub define_expr_parser: Option<Arc<dyn DefineExprParser>>,
}

/// Opens the journal under `meta.meta_dir`, replays it and starts the scheduler.
pub fn start_alter_service(cfg: &FeConfig, deps: AlterServiceDeps) -> Result<Arc<AlterHandler>, String> {
    logging::init_from_config(cfg);
    let config = AlterJobConfig::from(&cfg.alter);
    let edit_log = JournalEditLog::open(&cfg.meta.meta_dir)?;
    let journal_path = edit_log.path().to_path_buf();

    let executor = AgentTaskExecutor::new(deps.client, config.max_worker_threads);
    let ctx = AlterContext {
        catalog: deps.catalog,
        txn_mgr: deps.txn_mgr,
        task_queue: deps.task_queue,
        executor: Arc::new(executor),
        edit_log: Arc::new(edit_log),
        analyzer: deps
            .analyzer
            .unwrap_or_else(|| Arc::new(SlotBindingAnalyzer)),
        define_expr_parser: deps.define_expr_parser,
        config,
    };
    let handler = Arc::new(AlterHandler::new(ctx));
    let replayed = handler.replay_journal(&journal_path)?;
    tracing::info!(
        journal = %journal_path.display(),
        entries = replayed,
        jobs = handler.job_ids().len(),
        "replayed alter journal"
    );
    handler.start()?;
    Ok(handler)
}

/// Same as [`start_alter_service`] with the process-wide config file.
pub fn start_alter_service_from_env(deps: AlterServiceDeps) -> Result<Arc<AlterHandler>, String> {
    let cfg = app_config::config().map_err(|e| format!("load fe config failed: {e:#}"))?;
    start_alter_service(cfg, deps)
}

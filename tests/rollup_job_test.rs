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
//! Rollup job lifecycle driven tick by tick through the handler.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::common::{
    BACKEND_IDS, BASE_INDEX_ID, CreateReply, DB_ID, PARTITION_ID, TABLE_ID, TABLE_NAME,
    TestCluster, VISIBLE_VERSION, rollup_request, wait_until,
};
use novarocks_fe_alter::alter::{AlterJob, JobState};
use novarocks_fe_alter::catalog::{Catalog, IndexState, OlapTableState, ReplicaState, read_table};
use novarocks_fe_alter::common::status::{Status, StatusCode};
use novarocks_fe_alter::persist::AlterJobRecord;
use novarocks_fe_alter::task::{TaskReport, TaskType};

mod common;

fn job_state(cluster: &TestCluster, job_id: i64) -> JobState {
    cluster.handler.get_job(job_id).expect("job").state()
}

fn err_msg(cluster: &TestCluster, job_id: i64) -> String {
    cluster.handler.get_job(job_id).expect("job").info().err_msg
}

fn logged_states(cluster: &TestCluster) -> Vec<JobState> {
    cluster
        .memory_log
        .alter_job_records()
        .iter()
        .map(AlterJobRecord::state)
        .collect()
}

/// Admits `r1` and ticks until the job sends its alter tasks.
fn run_to_running(cluster: &TestCluster) -> i64 {
    let job_id = cluster
        .handler
        .process_add_rollup(DB_ID, TABLE_NAME, rollup_request("r1"))
        .expect("admit");
    cluster.handler.run_once();
    assert_eq!(job_state(cluster, job_id), JobState::WaitingTxn);
    cluster.handler.run_once();
    assert_eq!(job_state(cluster, job_id), JobState::Running);
    cluster.drain_sends();
    job_id
}

#[test]
fn rollup_job_runs_to_finished() {
    let cluster = TestCluster::new();
    let job_id = cluster
        .handler
        .process_add_rollup(DB_ID, TABLE_NAME, rollup_request("r1"))
        .expect("admit");

    assert_eq!(job_state(&cluster, job_id), JobState::Pending);
    assert_eq!(cluster.table_state(), OlapTableState::Rollup);
    assert_eq!(cluster.metastore.inverted_index().tablet_count(), 2);
    assert_eq!(logged_states(&cluster), vec![JobState::Pending]);

    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::WaitingTxn);
    cluster.drain_sends();
    assert_eq!(cluster.client.sent_tasks(TaskType::Create).len(), 6);
    {
        let table = read_table(&cluster.table);
        let rollup_index_id = table.index_id_by_name("r1").expect("rollup meta");
        let partition = table.partition(PARTITION_ID).unwrap();
        assert!(partition.is_shadow(rollup_index_id));
        assert_eq!(partition.visible_indexes().count(), 1);
    }

    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Running);
    let info = cluster.handler.get_job(job_id).unwrap().info();
    assert_eq!(info.progress, "0/6");
    assert_eq!(info.state, "RUNNING");
    cluster.drain_sends();
    let alter_tasks = cluster.client.sent_tasks(TaskType::Alter);
    assert_eq!(alter_tasks.len(), 6);
    for task in &alter_tasks {
        let req = task.alter_request().expect("alter body");
        assert_eq!(req.version, VISIBLE_VERSION);
        assert_eq!(req.job_id, job_id);
        assert_eq!(req.base_columns.len(), 3);
    }
    let unfinished = cluster
        .handler
        .get_unfinished_tasks(job_id, 100)
        .expect("unfinished tasks");
    assert_eq!(unfinished.len(), 6);

    cluster.finish_alter_tasks();
    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Finished);
    assert_eq!(cluster.table_state(), OlapTableState::Normal);
    assert_eq!(
        logged_states(&cluster),
        vec![JobState::Pending, JobState::WaitingTxn, JobState::Finished]
    );

    let table = read_table(&cluster.table);
    let rollup_index_id = table.index_id_by_name("r1").unwrap();
    let partition = table.partition(PARTITION_ID).unwrap();
    let rollup = partition.index(rollup_index_id).unwrap();
    assert_eq!(rollup.state, IndexState::Normal);
    assert!(!partition.is_shadow(rollup_index_id));
    for tablet in &rollup.tablets {
        for replica in &tablet.replicas {
            assert_eq!(replica.state, ReplicaState::Normal);
            assert_eq!(replica.version, VISIBLE_VERSION);
        }
    }
    assert!(table.full_schema().iter().any(|c| c.name == "k2"));
    assert!(cluster.handler.get_job(job_id).unwrap().info().finish_time != "NULL");
}

#[test]
fn waits_for_transactions_below_watershed() {
    let cluster = TestCluster::new();
    let txn_id = cluster.txn_mgr.begin_transaction(DB_ID, &[TABLE_ID]);
    let job_id = cluster
        .handler
        .process_add_rollup(DB_ID, TABLE_NAME, rollup_request("r1"))
        .unwrap();

    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::WaitingTxn);
    let info = cluster.handler.get_job(job_id).unwrap().info();
    assert_eq!(info.transaction_id, txn_id + 1);

    cluster.handler.run_once();
    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::WaitingTxn);

    cluster.txn_mgr.finish_transaction(txn_id).unwrap();
    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Running);
}

#[test]
fn transaction_started_after_watershed_does_not_block() {
    let cluster = TestCluster::new();
    let job_id = cluster
        .handler
        .process_add_rollup(DB_ID, TABLE_NAME, rollup_request("r1"))
        .unwrap();
    cluster.handler.run_once();
    cluster.txn_mgr.begin_transaction(DB_ID, &[TABLE_ID]);
    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Running);
}

#[test]
fn shadow_replicas_follow_base_replicas() {
    let cluster = TestCluster::new();
    cluster
        .handler
        .process_add_rollup(DB_ID, TABLE_NAME, rollup_request("r1"))
        .unwrap();
    cluster.handler.run_once();
    cluster.drain_sends();

    let create_tasks = cluster.client.sent_tasks(TaskType::Create);
    assert_eq!(create_tasks.len(), 6);
    let latch = Arc::clone(&create_tasks[0].create_request().unwrap().latch);
    assert_eq!(latch.count(), 0);
    let table = read_table(&cluster.table);
    let base = table
        .partition(PARTITION_ID)
        .unwrap()
        .index(BASE_INDEX_ID)
        .unwrap();
    for task in &create_tasks {
        let req = task.create_request().unwrap();
        assert!(Arc::ptr_eq(&req.latch, &latch));
        assert_eq!(req.version, 1);
        let base_tablet = base.tablet(req.base_tablet_id).expect("base tablet");
        assert!(base_tablet.replica_by_backend(task.backend_id).is_some());
        assert_eq!(req.tablet_schema.short_key_column_count, 1);
        assert_eq!(req.tablet_schema.columns.len(), 2);
    }
    let mut backends: Vec<i64> = create_tasks.iter().map(|t| t.backend_id).collect();
    backends.sort_unstable();
    backends.dedup();
    assert_eq!(backends, BACKEND_IDS.to_vec());
}

#[test]
fn failed_replica_creation_cancels_job() {
    let cluster = TestCluster::new();
    cluster
        .client
        .set_reply(CreateReply::FailOn(2, "disk full".to_string()));
    let job_id = cluster
        .handler
        .process_add_rollup(DB_ID, TABLE_NAME, rollup_request("r1"))
        .unwrap();

    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Cancelled);
    assert_eq!(
        err_msg(&cluster, job_id),
        "Create rollup replicas failed. Error: 2: disk full"
    );
    assert_eq!(cluster.table_state(), OlapTableState::Normal);
    assert_eq!(cluster.metastore.inverted_index().tablet_count(), 0);
    let table = read_table(&cluster.table);
    assert!(!table.has_index_name("r1"));
    assert_eq!(table.partition(PARTITION_ID).unwrap().shadow_indexes().count(), 0);
}

#[test]
fn cancel_while_waiting_for_replicas() {
    let cluster = TestCluster::new();
    cluster.client.set_reply(CreateReply::Silent);
    let job_id = cluster
        .handler
        .process_add_rollup(DB_ID, TABLE_NAME, rollup_request("r1"))
        .unwrap();

    let handler = Arc::clone(&cluster.handler);
    let runner = thread::spawn(move || handler.run_once());
    assert!(wait_until(Duration::from_secs(5), || {
        cluster.task_queue.task_num_of_type(TaskType::Create) == 6
    }));

    let started = Instant::now();
    let cancelled = cluster
        .handler
        .cancel_rollup(DB_ID, TABLE_NAME, "user cancelled")
        .expect("cancel");
    assert_eq!(cancelled, vec![job_id]);
    runner.join().unwrap();
    // replica creation would wait 60s without the cancel
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(job_state(&cluster, job_id), JobState::Cancelled);
    assert_eq!(err_msg(&cluster, job_id), "user cancelled");
    assert_eq!(cluster.task_queue.task_num(), 0);
    assert_eq!(cluster.metastore.inverted_index().tablet_count(), 0);
    assert_eq!(cluster.table_state(), OlapTableState::Normal);
    let table = read_table(&cluster.table);
    assert_eq!(table.partition(PARTITION_ID).unwrap().shadow_indexes().count(), 0);
    assert_eq!(
        logged_states(&cluster),
        vec![JobState::Pending, JobState::Cancelled]
    );
}

#[test]
fn job_cancel_interrupts_replica_wait() {
    let cluster = TestCluster::new();
    cluster.client.set_reply(CreateReply::Silent);
    let job_id = cluster
        .handler
        .process_add_rollup(DB_ID, TABLE_NAME, rollup_request("r1"))
        .unwrap();
    let job = cluster.handler.get_job(job_id).unwrap();

    let handler = Arc::clone(&cluster.handler);
    let runner = thread::spawn(move || handler.run_once());
    assert!(wait_until(Duration::from_secs(5), || {
        cluster.task_queue.task_num_of_type(TaskType::Create) == 6
    }));

    let started = Instant::now();
    assert_eq!(job.state(), JobState::Pending);
    assert!(job.cancel("user cancelled"));
    assert!(started.elapsed() < Duration::from_secs(1));
    runner.join().unwrap();

    assert_eq!(job.state(), JobState::Cancelled);
    assert_eq!(job.info().err_msg, "user cancelled");
    assert!(!job.cancel("again"));
    assert_eq!(cluster.task_queue.task_num(), 0);
    assert_eq!(cluster.metastore.inverted_index().tablet_count(), 0);
    assert_eq!(
        logged_states(&cluster),
        vec![JobState::Pending, JobState::Cancelled]
    );
}

#[test]
fn cancel_after_install_removes_rollup_index() {
    let cluster = TestCluster::new();
    let job_id = run_to_running(&cluster);

    assert!(cluster.handler.cancel_job(job_id, "stop").unwrap());
    assert!(!cluster.handler.cancel_job(job_id, "again").unwrap());
    assert_eq!(cluster.task_queue.task_num(), 0);
    let table = read_table(&cluster.table);
    assert!(!table.has_index_name("r1"));
    assert_eq!(table.state, OlapTableState::Normal);
    let partition = table.partition(PARTITION_ID).unwrap();
    assert_eq!(partition.visible_indexes().count(), 1);
    assert_eq!(partition.shadow_indexes().count(), 0);
}

#[test]
fn two_of_three_caught_up_replicas_finish_job() {
    let cluster = TestCluster::new();
    let job_id = run_to_running(&cluster);

    for task in cluster.client.sent_tasks(TaskType::Alter) {
        let mut report = TaskReport::ok(task.backend_id, TaskType::Alter, task.signature);
        if task.backend_id == 3 {
            // finished without reaching the visible version
            cluster.task_queue.finish_task(&report).unwrap();
        } else {
            report.version = Some(VISIBLE_VERSION);
            cluster.handler.finish_task(&report).unwrap();
        }
    }
    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Finished);
}

#[test]
fn one_of_three_caught_up_replicas_cancels_job() {
    let cluster = TestCluster::new();
    let job_id = run_to_running(&cluster);

    for task in cluster.client.sent_tasks(TaskType::Alter) {
        let mut report = TaskReport::ok(task.backend_id, TaskType::Alter, task.signature);
        if task.backend_id == 1 {
            report.version = Some(VISIBLE_VERSION);
            cluster.handler.finish_task(&report).unwrap();
        } else {
            cluster.task_queue.finish_task(&report).unwrap();
        }
    }
    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Cancelled);
    let msg = err_msg(&cluster, job_id);
    assert!(msg.starts_with("rollup tablet "), "{msg}");
    assert!(
        msg.ends_with(&format!("has few healthy replicas: 1, rollup job: {job_id}")),
        "{msg}"
    );
}

#[test]
fn alter_task_may_fail_three_times() {
    let cluster = TestCluster::new();
    let job_id = run_to_running(&cluster);
    let task = cluster.client.sent_tasks(TaskType::Alter)[0].clone();
    let failure = || {
        TaskReport::failed(
            task.backend_id,
            TaskType::Alter,
            task.signature,
            Status::internal_error("compaction running"),
        )
    };

    for _ in 0..3 {
        cluster.handler.finish_task(&failure()).unwrap();
        cluster.handler.run_once();
        assert_eq!(job_state(&cluster, job_id), JobState::Running);
    }
    assert_eq!(task.failed_times(), 3);

    cluster.handler.finish_task(&failure()).unwrap();
    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Cancelled);
    assert_eq!(
        err_msg(&cluster, job_id),
        "rollup task failed after try three times: compaction running"
    );
}

#[test]
fn failed_alter_task_is_resent() {
    let cluster = TestCluster::new();
    let job_id = run_to_running(&cluster);
    let task = cluster.client.sent_tasks(TaskType::Alter)[0].clone();
    let sends = || {
        cluster
            .client
            .sent_tasks(TaskType::Alter)
            .iter()
            .filter(|t| t.signature == task.signature)
            .count()
    };
    assert_eq!(sends(), 1);

    let report = TaskReport::failed(
        task.backend_id,
        TaskType::Alter,
        task.signature,
        Status::internal_error("compaction running"),
    );
    cluster.handler.finish_task(&report).unwrap();
    cluster.handler.run_once();
    cluster.drain_sends();
    assert_eq!(sends(), 2);
    assert_eq!(task.failed_times(), 1);

    // one resend per failed attempt
    cluster.handler.run_once();
    cluster.drain_sends();
    assert_eq!(sends(), 2);

    cluster.finish_alter_tasks();
    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Finished);
}

#[test]
fn fatal_alter_failure_cancels_at_once() {
    let cluster = TestCluster::new();
    let job_id = run_to_running(&cluster);
    let task = cluster.client.sent_tasks(TaskType::Alter)[0].clone();
    let report = TaskReport::failed(
        task.backend_id,
        TaskType::Alter,
        task.signature,
        Status::new(StatusCode::InvalidArgument, "bad schema"),
    );
    cluster.handler.finish_task(&report).unwrap();
    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Cancelled);
    assert_eq!(
        err_msg(&cluster, job_id),
        "rollup task failed after try three times: bad schema"
    );
}

#[test]
fn unstable_table_delays_replica_creation() {
    let cluster = TestCluster::new();
    let job_id = cluster
        .handler
        .process_add_rollup(DB_ID, TABLE_NAME, rollup_request("r1"))
        .unwrap();
    cluster.metastore.system_info().set_alive(3, false);

    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Pending);
    assert_eq!(cluster.table_state(), OlapTableState::WaitingStable);
    assert_eq!(err_msg(&cluster, job_id), "table is unstable");
    assert_eq!(cluster.task_queue.task_num(), 0);

    cluster.metastore.system_info().set_alive(3, true);
    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::WaitingTxn);
    assert_eq!(cluster.table_state(), OlapTableState::Rollup);
    assert_eq!(err_msg(&cluster, job_id), "");
}

#[test]
fn job_times_out() {
    let cluster = TestCluster::new();
    let mut request = rollup_request("r1");
    request.timeout_second = Some(0);
    let job_id = cluster
        .handler
        .process_add_rollup(DB_ID, TABLE_NAME, request)
        .unwrap();
    thread::sleep(Duration::from_millis(5));

    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Cancelled);
    assert_eq!(err_msg(&cluster, job_id), "Timeout");
    assert_eq!(cluster.table_state(), OlapTableState::Normal);
}

#[test]
fn failed_finish_log_keeps_job_running() {
    let cluster = TestCluster::new();
    let job_id = run_to_running(&cluster);
    cluster.finish_alter_tasks();

    cluster
        .memory_log
        .set_fail_writes(Some("journal unavailable".to_string()));
    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Running);

    cluster.memory_log.set_fail_writes(None);
    cluster.handler.run_once();
    assert_eq!(job_state(&cluster, job_id), JobState::Finished);
}

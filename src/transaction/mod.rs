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
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Transaction id source and watermark queries consumed by alter jobs.
pub trait TransactionManager: Send + Sync {
    /// Id the next transaction will get. Does not begin a transaction.
    fn next_transaction_id(&self) -> i64;

    /// True when no running transaction with an id below `end_txn_id` touches any of
    /// `table_ids` in `db_id`.
    fn is_previous_transactions_finished(
        &self,
        end_txn_id: i64,
        db_id: i64,
        table_ids: &[i64],
    ) -> Result<bool, String>;
}

#[derive(Debug)]
struct RunningTxn {
    db_id: i64,
    table_ids: BTreeSet<i64>,
}

#[derive(Debug)]
struct TxnState {
    next_id: i64,
    running: BTreeMap<i64, RunningTxn>,
}

/// In-memory transaction registry with a monotonic id generator.
#[derive(Debug)]
pub struct GlobalTransactionMgr {
    state: Mutex<TxnState>,
}

impl Default for GlobalTransactionMgr {
    fn default() -> Self {
        Self::new(1)
    }
}

impl GlobalTransactionMgr {
    pub fn new(first_txn_id: i64) -> Self {
        Self {
            state: Mutex::new(TxnState {
                next_id: first_txn_id,
                running: BTreeMap::new(),
            }),
        }
    }

    pub fn begin_transaction(&self, db_id: i64, table_ids: &[i64]) -> i64 {
        let mut guard = self.state.lock().expect("txn lock");
        let txn_id = guard.next_id;
        guard.next_id += 1;
        guard.running.insert(
            txn_id,
            RunningTxn {
                db_id,
                table_ids: table_ids.iter().copied().collect(),
            },
        );
        tracing::debug!(txn_id, db_id, "begin transaction");
        txn_id
    }

    /// Commits or aborts; either way the transaction stops blocking watermarks.
    pub fn finish_transaction(&self, txn_id: i64) -> Result<(), String> {
        let mut guard = self.state.lock().expect("txn lock");
        guard
            .running
            .remove(&txn_id)
            .map(|_| ())
            .ok_or_else(|| format!("transaction {txn_id} is not running"))
    }

    pub fn running_transaction_num(&self) -> usize {
        self.state.lock().expect("txn lock").running.len()
    }

    /// Keeps the generator ahead of ids restored from the journal.
    pub fn observe_txn_id(&self, txn_id: i64) {
        let mut guard = self.state.lock().expect("txn lock");
        if txn_id >= guard.next_id {
            guard.next_id = txn_id + 1;
        }
    }
}

impl TransactionManager for GlobalTransactionMgr {
    fn next_transaction_id(&self) -> i64 {
        self.state.lock().expect("txn lock").next_id
    }

    fn is_previous_transactions_finished(
        &self,
        end_txn_id: i64,
        db_id: i64,
        table_ids: &[i64],
    ) -> Result<bool, String> {
        let guard = self.state.lock().expect("txn lock");
        let blocked = guard.running.range(..end_txn_id).any(|(_, txn)| {
            txn.db_id == db_id && table_ids.iter().any(|id| txn.table_ids.contains(id))
        });
        Ok(!blocked)
    }
}

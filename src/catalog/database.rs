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
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::catalog::table::OlapTable;

/// A table behind its table-scoped lock: read for inspection, write for mutation.
pub type TableRef = Arc<RwLock<OlapTable>>;

pub fn read_table(table: &TableRef) -> RwLockReadGuard<'_, OlapTable> {
    table.read().expect("table lock")
}

pub fn write_table(table: &TableRef) -> RwLockWriteGuard<'_, OlapTable> {
    table.write().expect("table lock")
}

#[derive(Debug)]
pub struct Database {
    pub id: i64,
    pub full_name: String,
    tables: RwLock<BTreeMap<i64, TableRef>>,
}

impl Database {
    pub fn new(id: i64, full_name: impl Into<String>) -> Self {
        Self {
            id,
            full_name: full_name.into(),
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn register_table(&self, table: OlapTable) -> TableRef {
        let table_id = table.id;
        let table_ref = Arc::new(RwLock::new(table));
        let mut guard = self.tables.write().expect("database lock");
        guard.insert(table_id, Arc::clone(&table_ref));
        table_ref
    }

    pub fn table(&self, table_id: i64) -> Option<TableRef> {
        let guard = self.tables.read().expect("database lock");
        guard.get(&table_id).cloned()
    }

    pub fn table_by_name(&self, name: &str) -> Option<TableRef> {
        let guard = self.tables.read().expect("database lock");
        guard
            .values()
            .find(|t| read_table(t).name == name)
            .cloned()
    }

    pub fn drop_table(&self, table_id: i64) -> Option<TableRef> {
        let mut guard = self.tables.write().expect("database lock");
        guard.remove(&table_id)
    }

    pub fn table_ids(&self) -> Vec<i64> {
        let guard = self.tables.read().expect("database lock");
        guard.keys().copied().collect()
    }
}

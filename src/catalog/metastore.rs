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
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use crate::catalog::database::{Database, TableRef};
use crate::catalog::inverted_index::TabletInvertedIndex;
use crate::catalog::system_info::SystemInfoService;

/// Read/mutation surface of the metadata store consumed by alter jobs.
pub trait Catalog: Send + Sync {
    fn get_db(&self, db_id: i64) -> Option<Arc<Database>>;

    fn get_table(&self, db_id: i64, table_id: i64) -> Option<TableRef> {
        self.get_db(db_id)?.table(table_id)
    }

    /// Catalog-wide unique id for indexes, tablets and replicas.
    fn next_id(&self) -> i64;

    fn inverted_index(&self) -> &TabletInvertedIndex;

    fn system_info(&self) -> &SystemInfoService;
}

/// In-process metastore holding databases, the tablet inverted index and backend info.
#[derive(Debug)]
pub struct LocalMetastore {
    dbs: RwLock<BTreeMap<i64, Arc<Database>>>,
    next_id: AtomicI64,
    inverted_index: TabletInvertedIndex,
    system_info: Arc<SystemInfoService>,
}

impl LocalMetastore {
    pub fn new(system_info: Arc<SystemInfoService>) -> Self {
        Self {
            dbs: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(10_000),
            inverted_index: TabletInvertedIndex::new(),
            system_info,
        }
    }

    pub fn create_db(&self, db_id: i64, full_name: impl Into<String>) -> Arc<Database> {
        let db = Arc::new(Database::new(db_id, full_name));
        let mut guard = self.dbs.write().expect("metastore lock");
        guard.insert(db_id, Arc::clone(&db));
        db
    }

    pub fn drop_db(&self, db_id: i64) -> Option<Arc<Database>> {
        let mut guard = self.dbs.write().expect("metastore lock");
        guard.remove(&db_id)
    }

    /// Keeps the id generator ahead of ids seen in replayed records.
    pub fn observe_id(&self, id: i64) {
        self.next_id.fetch_max(id + 1, Ordering::AcqRel);
    }
}

impl Catalog for LocalMetastore {
    fn get_db(&self, db_id: i64) -> Option<Arc<Database>> {
        let guard = self.dbs.read().expect("metastore lock");
        guard.get(&db_id).cloned()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::AcqRel)
    }

    fn inverted_index(&self) -> &TabletInvertedIndex {
        &self.inverted_index
    }

    fn system_info(&self) -> &SystemInfoService {
        &self.system_info
    }
}

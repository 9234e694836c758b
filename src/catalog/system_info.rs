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
use std::sync::RwLock;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backend {
    pub id: i64,
    pub host: String,
    pub heartbeat_port: u16,
    pub alive: bool,
    pub decommissioned: bool,
}

impl Backend {
    pub fn new(id: i64, host: impl Into<String>, heartbeat_port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            heartbeat_port,
            alive: true,
            decommissioned: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.alive && !self.decommissioned
    }
}

/// Storage nodes known to the frontend, updated by heartbeats.
#[derive(Debug, Default)]
pub struct SystemInfoService {
    backends: RwLock<BTreeMap<i64, Backend>>,
}

impl SystemInfoService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_backend(&self, backend: Backend) {
        let mut guard = self.backends.write().expect("system info lock");
        guard.insert(backend.id, backend);
    }

    pub fn set_alive(&self, backend_id: i64, alive: bool) -> bool {
        let mut guard = self.backends.write().expect("system info lock");
        match guard.get_mut(&backend_id) {
            Some(backend) => {
                backend.alive = alive;
                true
            }
            None => false,
        }
    }

    pub fn set_decommissioned(&self, backend_id: i64, decommissioned: bool) -> bool {
        let mut guard = self.backends.write().expect("system info lock");
        match guard.get_mut(&backend_id) {
            Some(backend) => {
                backend.decommissioned = decommissioned;
                true
            }
            None => false,
        }
    }

    pub fn backend(&self, backend_id: i64) -> Option<Backend> {
        let guard = self.backends.read().expect("system info lock");
        guard.get(&backend_id).cloned()
    }

    pub fn check_backend_available(&self, backend_id: i64) -> bool {
        let guard = self.backends.read().expect("system info lock");
        guard.get(&backend_id).is_some_and(Backend::is_available)
    }

    pub fn backend_ids(&self, need_available: bool) -> Vec<i64> {
        let guard = self.backends.read().expect("system info lock");
        guard
            .values()
            .filter(|b| !need_available || b.is_available())
            .map(|b| b.id)
            .collect()
    }
}

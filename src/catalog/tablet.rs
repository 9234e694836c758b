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
use serde::{Deserialize, Serialize};

/// Version every freshly created partition (and replica) starts at.
pub const PARTITION_INIT_VERSION: i64 = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicaState {
    Normal,
    /// Shadow replica of an in-flight alter job.
    Alter,
    Clone,
    Decommission,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub id: i64,
    pub backend_id: i64,
    pub state: ReplicaState,
    pub version: i64,
    /// Smallest version the replica failed to load, `-1` when healthy.
    pub last_failed_version: i64,
    pub schema_hash: i32,
}

impl Replica {
    pub fn new(id: i64, backend_id: i64, state: ReplicaState, version: i64, schema_hash: i32) -> Self {
        Self {
            id,
            backend_id,
            state,
            version,
            last_failed_version: -1,
            schema_hash,
        }
    }

    pub fn check_version_catch_up(&self, expected_version: i64, ignore_alter: bool) -> bool {
        if ignore_alter
            && self.state == ReplicaState::Alter
            && self.version == PARTITION_INIT_VERSION
        {
            return true;
        }
        if expected_version == PARTITION_INIT_VERSION {
            // no data was loaded into this partition
            return true;
        }
        self.version >= expected_version
    }

    pub fn is_bad(&self) -> bool {
        self.last_failed_version > 0
    }

    pub fn update_version(&mut self, version: i64) {
        if version > self.version {
            self.version = version;
        }
        if self.last_failed_version > 0 && self.version >= self.last_failed_version {
            self.last_failed_version = -1;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tablet {
    pub id: i64,
    pub replicas: Vec<Replica>,
}

impl Tablet {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            replicas: Vec::new(),
        }
    }

    pub fn add_replica(&mut self, replica: Replica) {
        self.replicas.retain(|r| r.backend_id != replica.backend_id);
        self.replicas.push(replica);
    }

    pub fn replica_by_backend(&self, backend_id: i64) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.backend_id == backend_id)
    }

    pub fn replica_by_backend_mut(&mut self, backend_id: i64) -> Option<&mut Replica> {
        self.replicas.iter_mut().find(|r| r.backend_id == backend_id)
    }

    pub fn backend_ids(&self) -> Vec<i64> {
        self.replicas.iter().map(|r| r.backend_id).collect()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexState {
    Normal,
    /// Reachable for loads, invisible to queries.
    Shadow,
}

/// Physical tablets of one index inside one partition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedIndex {
    pub id: i64,
    pub state: IndexState,
    pub tablets: Vec<Tablet>,
}

impl MaterializedIndex {
    pub fn new(id: i64, state: IndexState) -> Self {
        Self {
            id,
            state,
            tablets: Vec::new(),
        }
    }

    pub fn add_tablet(&mut self, tablet: Tablet) {
        self.tablets.push(tablet);
    }

    pub fn tablet(&self, tablet_id: i64) -> Option<&Tablet> {
        self.tablets.iter().find(|t| t.id == tablet_id)
    }

    pub fn tablet_mut(&mut self, tablet_id: i64) -> Option<&mut Tablet> {
        self.tablets.iter_mut().find(|t| t.id == tablet_id)
    }

    pub fn replica_count(&self) -> usize {
        self.tablets.iter().map(|t| t.replicas.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::{PARTITION_INIT_VERSION, Replica, ReplicaState};

    #[test]
    fn init_version_partition_is_always_caught_up() {
        let replica = Replica::new(1, 10, ReplicaState::Alter, PARTITION_INIT_VERSION, 0);
        assert!(replica.check_version_catch_up(PARTITION_INIT_VERSION, false));
        assert!(!replica.check_version_catch_up(5, false));
        assert!(replica.check_version_catch_up(5, true));
    }

    #[test]
    fn update_version_clears_recovered_failure() {
        let mut replica = Replica::new(1, 10, ReplicaState::Normal, 3, 0);
        replica.last_failed_version = 4;
        replica.update_version(4);
        assert_eq!(replica.version, 4);
        assert_eq!(replica.last_failed_version, -1);
    }
}

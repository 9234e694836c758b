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
//! Catalog objects touched by alter jobs: tables, partitions, indexes, tablets and replicas.

pub mod column;
pub mod database;
pub mod inverted_index;
pub mod metastore;
pub mod partition;
pub mod schema_info;
pub mod system_info;
pub mod table;
pub mod tablet;

pub use column::{AggregateType, Column, PrimitiveType};
pub use database::{Database, TableRef, read_table, write_table};
pub use inverted_index::{TabletInvertedIndex, TabletMeta};
pub use metastore::{Catalog, LocalMetastore};
pub use partition::{Partition, StorageMedium, TabletType};
pub use schema_info::{TabletSchema, schema_hash};
pub use system_info::{Backend, SystemInfoService};
pub use table::{
    CompressionType, IndexMetaDef, IndexType, KeysType, MaterializedIndexMeta, OlapTable,
    OlapTableState, SecondaryIndex, StorageType,
};
pub use tablet::{
    IndexState, MaterializedIndex, PARTITION_INIT_VERSION, Replica, ReplicaState, Tablet,
};

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

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::alter::job::JobState;
use crate::analysis::expr::OriginStatement;
use crate::catalog::column::Column;
use crate::catalog::table::KeysType;
use crate::catalog::tablet::MaterializedIndex;

pub const CURRENT_RECORD_VERSION: u32 = 2;

/// Durable form of an alter job, used by the journal and by checkpoint images.
///
/// Decoding always goes through [`upgrade_record`], so older documents load transparently.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "job_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlterJobRecord {
    Rollup(RollupJobRecord),
}

impl AlterJobRecord {
    pub fn job_id(&self) -> i64 {
        match self {
            Self::Rollup(r) => r.job_id,
        }
    }

    pub fn state(&self) -> JobState {
        match self {
            Self::Rollup(r) => r.job_state,
        }
    }

    /// Upgrades and decodes one JSON document.
    pub fn from_json(mut value: JsonValue) -> Result<Self, String> {
        upgrade_record(&mut value)?;
        let job_type = value
            .get("job_type")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        match job_type.as_str() {
            "ROLLUP" => serde_json::from_value(value)
                .map(Self::Rollup)
                .map_err(|e| format!("decode rollup job record failed: {e}")),
            other => Err(format!("unknown alter job type: {other:?}")),
        }
    }
}

impl<'de> Deserialize<'de> for AlterJobRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Self::from_json(value).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollupJobRecord {
    pub record_version: u32,
    pub job_id: i64,
    pub db_id: i64,
    pub table_id: i64,
    pub table_name: String,
    pub job_state: JobState,
    pub err_msg: String,
    pub create_time_ms: i64,
    pub finished_time_ms: i64,
    pub timeout_ms: i64,
    pub watershed_txn_id: i64,

    pub base_index_id: i64,
    pub rollup_index_id: i64,
    pub base_index_name: String,
    pub rollup_index_name: String,
    pub rollup_schema: Vec<Column>,
    pub base_schema_hash: i32,
    pub rollup_schema_hash: i32,
    pub rollup_keys_type: KeysType,
    pub rollup_short_key_column_count: i16,
    pub schema_version: i32,

    /// partition id -> rollup tablet id -> base tablet id
    pub partition_id_to_base_rollup_tablet_ids: BTreeMap<i64, BTreeMap<i64, i64>>,
    pub partition_id_to_rollup_index: BTreeMap<i64, MaterializedIndex>,

    #[serde(default)]
    pub origin_stmt: Option<OriginStatement>,
    #[serde(default)]
    pub view_define_sql: Option<String>,
    pub is_colocate_mv_index: bool,
}

/// Rewrites an older record document in place to the current layout.
///
/// Version 1 documents carry no `record_version`, name the tablet map
/// `partitionIdToBaseRollupTabletIdMap` and the index map `partitionIdToRollupIndex`, and have no
/// `is_colocate_mv_index`.
pub fn upgrade_record(value: &mut JsonValue) -> Result<(), String> {
    let obj = value
        .as_object_mut()
        .ok_or_else(|| "alter job record is not a JSON object".to_string())?;
    let version = match obj.get("record_version") {
        None => 1,
        Some(v) => v
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| format!("invalid record_version: {v}"))?,
    };
    if version > CURRENT_RECORD_VERSION {
        return Err(format!(
            "alter job record version {version} is newer than supported version {CURRENT_RECORD_VERSION}"
        ));
    }
    if version == 1 {
        if let Some(v) = obj.remove("partitionIdToBaseRollupTabletIdMap") {
            obj.insert("partition_id_to_base_rollup_tablet_ids".to_string(), v);
        }
        if let Some(v) = obj.remove("partitionIdToRollupIndex") {
            obj.insert("partition_id_to_rollup_index".to_string(), v);
        }
        obj.entry("is_colocate_mv_index")
            .or_insert(JsonValue::Bool(false));
        obj.insert(
            "record_version".to_string(),
            JsonValue::from(CURRENT_RECORD_VERSION),
        );
    }
    Ok(())
}

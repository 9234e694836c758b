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
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::persist::alter_job_record::AlterJobRecord;

/// Checkpoint of every alter job known to the handler.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AlterImage {
    pub jobs: Vec<AlterJobRecord>,
}

/// Writes the image next to `path` and renames it into place.
pub fn write_image(path: impl AsRef<Path>, image: &AlterImage) -> Result<(), String> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("create image dir {} failed: {e}", parent.display()))?;
    }
    let bytes =
        serde_json::to_vec_pretty(image).map_err(|e| format!("encode alter image failed: {e}"))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| format!("write image {} failed: {e}", tmp.display()))?;
    fs::rename(&tmp, path).map_err(|e| format!("install image {} failed: {e}", path.display()))
}

pub fn read_image(path: impl AsRef<Path>) -> Result<AlterImage, String> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| format!("read image {} failed: {e}", path.display()))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("decode image {} failed: {e}", path.display()))
}

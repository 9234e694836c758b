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
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::persist::alter_job_record::AlterJobRecord;

pub const JOURNAL_FILE_NAME: &str = "alter.journal";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    AlterJob { job: AlterJobRecord },
    RemoveAlterJobs { job_ids: Vec<i64> },
}

/// Replicated write-ahead log as seen by alter jobs.
pub trait EditLog: Send + Sync {
    fn log_alter_job(&self, record: &AlterJobRecord) -> Result<(), String>;

    fn log_remove_alter_jobs(&self, job_ids: &[i64]) -> Result<(), String>;
}

/// Newline-delimited JSON journal, flushed after every append.
#[derive(Debug)]
pub struct JournalEditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JournalEditLog {
    pub fn open(meta_dir: impl AsRef<Path>) -> Result<Self, String> {
        let meta_dir = meta_dir.as_ref();
        fs::create_dir_all(meta_dir)
            .map_err(|e| format!("create meta dir {} failed: {e}", meta_dir.display()))?;
        let path = meta_dir.join(JOURNAL_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("open journal {} failed: {e}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, entry: &JournalEntry) -> Result<(), String> {
        let mut line =
            serde_json::to_string(entry).map_err(|e| format!("encode journal entry failed: {e}"))?;
        line.push('\n');
        let mut file = self.file.lock().expect("journal lock");
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| format!("append journal {} failed: {e}", self.path.display()))
    }
}

impl EditLog for JournalEditLog {
    fn log_alter_job(&self, record: &AlterJobRecord) -> Result<(), String> {
        self.append(&JournalEntry::AlterJob {
            job: record.clone(),
        })
    }

    fn log_remove_alter_jobs(&self, job_ids: &[i64]) -> Result<(), String> {
        self.append(&JournalEntry::RemoveAlterJobs {
            job_ids: job_ids.to_vec(),
        })
    }
}

/// Reads every entry of a journal written by [`JournalEditLog`]. A missing file is empty.
pub fn read_journal(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>, String> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(format!("open journal {} failed: {e}", path.display())),
    };
    let mut entries = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| format!("read journal {} failed: {e}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| {
            format!("decode journal {} line {} failed: {e}", path.display(), lineno + 1)
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Keeps entries in memory; can be told to reject appends.
#[derive(Debug, Default)]
pub struct MemoryEditLog {
    entries: Mutex<Vec<JournalEntry>>,
    fail_writes: Mutex<Option<String>>,
}

impl MemoryEditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().expect("edit log lock").clone()
    }

    pub fn alter_job_records(&self) -> Vec<AlterJobRecord> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                JournalEntry::AlterJob { job } => Some(job),
                JournalEntry::RemoveAlterJobs { .. } => None,
            })
            .collect()
    }

    pub fn set_fail_writes(&self, error: Option<String>) {
        *self.fail_writes.lock().expect("edit log lock") = error;
    }

    fn append(&self, entry: JournalEntry) -> Result<(), String> {
        if let Some(err) = self.fail_writes.lock().expect("edit log lock").clone() {
            return Err(err);
        }
        self.entries.lock().expect("edit log lock").push(entry);
        Ok(())
    }
}

impl EditLog for MemoryEditLog {
    fn log_alter_job(&self, record: &AlterJobRecord) -> Result<(), String> {
        self.append(JournalEntry::AlterJob {
            job: record.clone(),
        })
    }

    fn log_remove_alter_jobs(&self, job_ids: &[i64]) -> Result<(), String> {
        self.append(JournalEntry::RemoveAlterJobs {
            job_ids: job_ids.to_vec(),
        })
    }
}

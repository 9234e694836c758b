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
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::Local;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

use crate::common::app_config::FeConfig;

static INIT: OnceLock<()> = OnceLock::new();

/// glog-like line layout: `Lyyyymmdd hh:mm:ss.uuuuuu tid file:line] [span{..}:] message`.
struct FeLogFormatter;

#[derive(Clone)]
struct FeLogFile {
    file: Arc<Mutex<File>>,
}

struct FeLogFileGuard {
    file: Arc<Mutex<File>>,
}

impl<'a> MakeWriter<'a> for FeLogFile {
    type Writer = FeLogFileGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FeLogFileGuard {
            file: Arc::clone(&self.file),
        }
    }
}

impl io::Write for FeLogFileGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("fe log file lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("fe log file lock poisoned"))?
            .flush()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn log_file_path() -> PathBuf {
    if let Some(path) = non_empty_env("NOVAROCKS_FE_LOG_FILE") {
        return PathBuf::from(path);
    }
    let dir = non_empty_env("NOVAROCKS_FE_LOG_DIR").unwrap_or_else(|| "log".to_string());
    PathBuf::from(dir).join("fe.log")
}

fn open_log_file() -> Option<FeLogFile> {
    let path = log_file_path();
    if let Some(parent) = path.parent()
        && let Err(err) = fs::create_dir_all(parent)
    {
        eprintln!(
            "failed to create log directory {}: {}, fallback to stderr",
            parent.display(),
            err
        );
        return None;
    }
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some(FeLogFile {
            file: Arc::new(Mutex::new(file)),
        }),
        Err(err) => {
            eprintln!(
                "failed to open log file {}: {}, fallback to stderr",
                path.display(),
                err
            );
            None
        }
    }
}

fn level_char(level: &tracing::Level) -> char {
    match *level {
        tracing::Level::ERROR => 'E',
        tracing::Level::WARN => 'W',
        tracing::Level::INFO => 'I',
        tracing::Level::DEBUG => 'D',
        tracing::Level::TRACE => 'T',
    }
}

fn thread_id() -> u64 {
    format!("{:?}", std::thread::current().id())
        .trim_start_matches("ThreadId(")
        .trim_end_matches(')')
        .parse::<u64>()
        .unwrap_or(0)
}

impl<S, N> FormatEvent<S, N> for FeLogFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(
            writer,
            "{}{} {} {}:{}] ",
            level_char(metadata.level()),
            Local::now().format("%Y%m%d %H:%M:%S%.6f"),
            thread_id(),
            metadata.file().unwrap_or("unknown"),
            metadata.line().unwrap_or(0)
        )?;

        // Job spans carry job_id / watershed_txn_id, prefix them so grep by job works.
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<tracing_fmt::FormattedFields<N>>()
                    && !fields.is_empty()
                {
                    write!(writer, "{{{}}}", fields)?;
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

pub fn init_with_filter(filter: &str) {
    INIT.get_or_init(|| {
        let env_filter = EnvFilter::new(filter);
        if let Some(make_writer) = open_log_file() {
            let _ = tracing_fmt()
                .with_env_filter(env_filter)
                .with_writer(make_writer)
                .with_ansi(false)
                .event_format(FeLogFormatter)
                .try_init();
            return;
        }

        let _ = tracing_fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
            .event_format(FeLogFormatter)
            .try_init();
    });
}

pub fn init_from_config(cfg: &FeConfig) {
    init_with_filter(cfg.effective_log_filter());
}

pub fn init() {
    init_with_filter("info");
}

pub use tracing::{debug, error, info, warn};

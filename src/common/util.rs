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
use chrono::{Local, TimeZone};

/// Rendered in listings for unset values.
pub const NULL_STRING: &str = "NULL";

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `YYYY-MM-DD HH:MM:SS` in local time, `NULL` for unset (non-positive) timestamps.
pub fn long_to_time_string(timestamp_ms: i64) -> String {
    if timestamp_ms <= 0 {
        return NULL_STRING.to_string();
    }
    match Local.timestamp_millis_opt(timestamp_ms).single() {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => NULL_STRING.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{NULL_STRING, long_to_time_string};

    #[test]
    fn unset_timestamp_renders_null() {
        assert_eq!(long_to_time_string(-1), NULL_STRING);
        assert_eq!(long_to_time_string(0), NULL_STRING);
    }

    #[test]
    fn timestamp_renders_seconds_precision() {
        let s = long_to_time_string(1_700_000_000_123);
        assert_eq!(s.len(), "2023-11-14 22:13:20".len());
        assert!(s.starts_with("2023-11-1"));
    }
}

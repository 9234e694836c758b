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

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    Cancelled,
    InternalError,
    Timeout,
    NotImplementedError,
    InvalidArgument,
}

/// Outcome of a unit of work reported by a storage node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub error_msg: String,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            error_msg: String::new(),
        }
    }

    pub fn new(code: StatusCode, error_msg: impl Into<String>) -> Self {
        Self {
            code,
            error_msg: error_msg.into(),
        }
    }

    pub fn cancelled(error_msg: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, error_msg)
    }

    pub fn internal_error(error_msg: impl Into<String>) -> Self {
        Self::new(StatusCode::InternalError, error_msg)
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    /// Errors that repeating the same request cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.code,
            StatusCode::NotImplementedError | StatusCode::InvalidArgument
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error_msg.is_empty() {
            write!(f, "{:?}", self.code)
        } else {
            write!(f, "{:?}: {}", self.code, self.error_msg)
        }
    }
}

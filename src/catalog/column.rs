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

use crate::analysis::expr::Expr;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimitiveType {
    Boolean,
    Tinyint,
    Smallint,
    Int,
    Bigint,
    Largeint,
    Float,
    Double,
    Date,
    Datetime,
    Decimal64,
    Char,
    Varchar,
    Hll,
    Bitmap,
    Percentile,
    Json,
}

impl PrimitiveType {
    /// Fixed storage width in bytes; variable-length types report their in-index prefix size.
    pub fn slot_size(self) -> usize {
        match self {
            Self::Boolean | Self::Tinyint => 1,
            Self::Smallint => 2,
            Self::Int | Self::Float | Self::Date => 4,
            Self::Bigint | Self::Double | Self::Datetime | Self::Decimal64 => 8,
            Self::Largeint => 16,
            Self::Char | Self::Varchar | Self::Json => 16,
            Self::Hll | Self::Bitmap | Self::Percentile => 16,
        }
    }

    pub fn is_string(self) -> bool {
        matches!(self, Self::Char | Self::Varchar)
    }

    /// Whether a value of `other` can be stored in a column of this type without a cast.
    pub fn is_fully_compatible(self, other: PrimitiveType) -> bool {
        self == other || (self.is_string() && other.is_string())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateType {
    Sum,
    Min,
    Max,
    Replace,
    HllUnion,
    BitmapUnion,
    PercentileUnion,
    None,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub unique_id: i32,
    pub primitive_type: PrimitiveType,
    /// Declared length for CHAR/VARCHAR.
    #[serde(default)]
    pub type_len: i32,
    pub is_key: bool,
    #[serde(default)]
    pub aggregate_type: Option<AggregateType>,
    pub allow_null: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub comment: String,
    /// Derivation of a computed rollup column. Never persisted: it is re-derived from the
    /// job's origin statement when a PENDING job is loaded.
    #[serde(skip)]
    pub define_expr: Option<Expr>,
}

impl Column {
    pub fn new(name: impl Into<String>, primitive_type: PrimitiveType, is_key: bool) -> Self {
        Self {
            name: name.into(),
            unique_id: -1,
            primitive_type,
            type_len: 0,
            is_key,
            aggregate_type: None,
            allow_null: true,
            default_value: None,
            comment: String::new(),
            define_expr: None,
        }
    }

    pub fn with_unique_id(mut self, unique_id: i32) -> Self {
        self.unique_id = unique_id;
        self
    }

    pub fn with_type_len(mut self, type_len: i32) -> Self {
        self.type_len = type_len;
        self
    }

    pub fn with_aggregate(mut self, aggregate_type: AggregateType) -> Self {
        self.aggregate_type = Some(aggregate_type);
        self
    }

    pub fn with_define_expr(mut self, expr: Expr) -> Self {
        self.define_expr = Some(expr);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    pub fn name_eq(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Bytes this column contributes to the short key prefix.
    pub fn short_key_size(&self) -> usize {
        if self.primitive_type.is_string() && self.type_len > 0 {
            self.type_len as usize
        } else {
            self.primitive_type.slot_size()
        }
    }
}

const SHORT_KEY_MAX_COLUMN_COUNT: usize = 3;
const SHORT_KEY_MAX_BYTES: usize = 36;

/// Number of leading key columns forming the short key: at most three, within 36 bytes, and
/// ending at the first VARCHAR column (which is included).
pub fn calc_short_key_column_count(columns: &[Column]) -> Result<i16, String> {
    let mut count = 0usize;
    let mut bytes = 0usize;
    for column in columns {
        if !column.is_key {
            break;
        }
        if count >= SHORT_KEY_MAX_COLUMN_COUNT {
            break;
        }
        if column.primitive_type == PrimitiveType::Varchar {
            count += 1;
            break;
        }
        let size = column.short_key_size();
        if bytes + size > SHORT_KEY_MAX_BYTES {
            break;
        }
        bytes += size;
        count += 1;
    }
    if count == 0 {
        return Err("short key column count is zero: the first column must be a key".to_string());
    }
    i16::try_from(count).map_err(|_| format!("invalid short key column count {count}"))
}

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
use crc32c::{crc32c, crc32c_append};
use serde::{Deserialize, Serialize};

use crate::catalog::column::Column;
use crate::catalog::table::{KeysType, SecondaryIndex, StorageType};

/// Physical schema shipped to backends with replica creation tasks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TabletSchema {
    pub index_id: i64,
    pub schema_version: i32,
    pub schema_hash: i32,
    pub short_key_column_count: i16,
    pub keys_type: KeysType,
    pub storage_type: StorageType,
    pub columns: Vec<Column>,
    pub bloom_filter_columns: Vec<String>,
    pub bloom_filter_fpp: f64,
    pub indexes: Vec<SecondaryIndex>,
    /// Positions of the sort key inside `columns`.
    pub sort_key_idxes: Vec<usize>,
    pub sort_key_unique_ids: Vec<i32>,
}

#[derive(Debug)]
pub struct TabletSchemaBuilder {
    schema: TabletSchema,
}

impl TabletSchema {
    pub fn builder(index_id: i64, columns: Vec<Column>) -> TabletSchemaBuilder {
        TabletSchemaBuilder {
            schema: TabletSchema {
                index_id,
                schema_version: 0,
                schema_hash: 0,
                short_key_column_count: 0,
                keys_type: KeysType::DupKeys,
                storage_type: StorageType::Column,
                columns,
                bloom_filter_columns: Vec::new(),
                bloom_filter_fpp: 0.0,
                indexes: Vec::new(),
                sort_key_idxes: Vec::new(),
                sort_key_unique_ids: Vec::new(),
            },
        }
    }
}

impl TabletSchemaBuilder {
    pub fn schema_version(mut self, version: i32) -> Self {
        self.schema.schema_version = version;
        self
    }

    pub fn schema_hash(mut self, hash: i32) -> Self {
        self.schema.schema_hash = hash;
        self
    }

    pub fn short_key_column_count(mut self, count: i16) -> Self {
        self.schema.short_key_column_count = count;
        self
    }

    pub fn keys_type(mut self, keys_type: KeysType) -> Self {
        self.schema.keys_type = keys_type;
        self
    }

    pub fn storage_type(mut self, storage_type: StorageType) -> Self {
        self.schema.storage_type = storage_type;
        self
    }

    /// Keeps only the bloom filter columns present in this schema.
    pub fn bloom_filter(mut self, columns: &[String], fpp: f64) -> Self {
        self.schema.bloom_filter_columns = columns
            .iter()
            .filter(|name| self.schema.columns.iter().any(|c| c.name_eq(name)))
            .cloned()
            .collect();
        self.schema.bloom_filter_fpp = fpp;
        self
    }

    pub fn indexes(mut self, indexes: Vec<SecondaryIndex>) -> Self {
        self.schema.indexes = indexes;
        self
    }

    /// Sort key defaults to the key columns in schema order.
    pub fn build(mut self) -> TabletSchema {
        if self.schema.sort_key_idxes.is_empty() {
            for (idx, column) in self.schema.columns.iter().enumerate() {
                if column.is_key {
                    self.schema.sort_key_idxes.push(idx);
                    self.schema.sort_key_unique_ids.push(column.unique_id);
                }
            }
        }
        self.schema
    }
}

/// Stable non-negative hash of a schema layout.
pub fn schema_hash(schema_version: i32, columns: &[Column], bf_columns: &[String], bf_fpp: f64) -> i32 {
    let mut crc = crc32c(&schema_version.to_le_bytes());
    for column in columns {
        crc = crc32c_append(crc, column.name.to_ascii_lowercase().as_bytes());
        crc = crc32c_append(crc, format!("{:?}", column.primitive_type).as_bytes());
        crc = crc32c_append(crc, &column.type_len.to_le_bytes());
        crc = crc32c_append(crc, &[u8::from(column.is_key), u8::from(column.allow_null)]);
        if let Some(agg) = column.aggregate_type {
            crc = crc32c_append(crc, format!("{agg:?}").as_bytes());
        }
    }
    if !bf_columns.is_empty() {
        for name in bf_columns {
            crc = crc32c_append(crc, name.to_ascii_lowercase().as_bytes());
        }
        crc = crc32c_append(crc, &bf_fpp.to_le_bytes());
    }
    (crc & 0x7fff_ffff) as i32
}

#[cfg(test)]
mod tests {
    use super::{TabletSchema, schema_hash};
    use crate::catalog::column::{Column, PrimitiveType};
    use crate::catalog::table::{IndexType, KeysType, SecondaryIndex};

    fn columns() -> Vec<Column> {
        vec![
            Column::new("k1", PrimitiveType::Int, true).with_unique_id(0),
            Column::new("v1", PrimitiveType::Bigint, false).with_unique_id(2),
            Column::new("k2", PrimitiveType::Varchar, true)
                .with_type_len(32)
                .with_unique_id(1),
        ]
    }

    #[test]
    fn schema_hash_depends_on_layout() {
        let cols = columns();
        let h1 = schema_hash(0, &cols, &[], 0.0);
        assert_eq!(h1, schema_hash(0, &cols, &[], 0.0));
        assert!(h1 >= 0);
        assert_ne!(h1, schema_hash(1, &cols, &[], 0.0));
        assert_ne!(h1, schema_hash(0, &cols[..2], &[], 0.0));
    }

    #[test]
    fn builder_filters_bloom_filter_columns_and_derives_sort_key() {
        let schema = TabletSchema::builder(5, columns())
            .keys_type(KeysType::AggKeys)
            .short_key_column_count(2)
            .bloom_filter(&["v1".to_string(), "absent".to_string()], 0.01)
            .indexes(vec![SecondaryIndex {
                index_id: 1,
                index_name: "idx".to_string(),
                columns: vec!["k2".to_string()],
                index_type: IndexType::Bitmap,
            }])
            .build();
        assert_eq!(schema.bloom_filter_columns, vec!["v1".to_string()]);
        assert_eq!(schema.sort_key_idxes, vec![0, 2]);
        assert_eq!(schema.sort_key_unique_ids, vec![0, 1]);
        assert_eq!(schema.indexes.len(), 1);
    }
}

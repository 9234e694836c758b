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
use std::collections::{BTreeMap, HashMap};

use crate::analysis::expr::{
    DescriptorTable, Expr, SlotBinding, SlotDescriptor, WHERE_PREDICATE_COLUMN_NAME,
};
use crate::catalog::column::{Column, PrimitiveType};
use crate::catalog::table::OlapTable;
use crate::common::ids::IdGenerator;

/// Resolved analysis output shipped with every ALTER task of a rollup job.
#[derive(Clone, Debug, PartialEq)]
pub struct RollupJobParams {
    /// Rollup column name -> bound define expression.
    pub define_exprs: BTreeMap<String, Expr>,
    pub where_expr: Option<Expr>,
    pub desc_table: DescriptorTable,
    /// Base columns the rollup reads, key columns first.
    pub used_column_names: Vec<String>,
}

/// Binds define expressions and the WHERE predicate of a rollup against the live base schema.
pub trait ExprAnalyzer: Send + Sync {
    fn analyze_and_create_params(
        &self,
        table: &OlapTable,
        db_name: &str,
        rollup_schema: &[Column],
        where_clause: Option<&Expr>,
    ) -> Result<RollupJobParams, String>;
}

/// Default analyzer: one slot per base column and case-insensitive name binding.
#[derive(Clone, Copy, Debug, Default)]
pub struct SlotBindingAnalyzer;

impl ExprAnalyzer for SlotBindingAnalyzer {
    fn analyze_and_create_params(
        &self,
        table: &OlapTable,
        db_name: &str,
        rollup_schema: &[Column],
        where_clause: Option<&Expr>,
    ) -> Result<RollupJobParams, String> {
        let mut ids = IdGenerator::default();
        let tuple_id = ids.next_tuple_id();
        let base_schema = table.base_schema();

        let mut slots = Vec::with_capacity(base_schema.len());
        let mut slot_by_name: HashMap<String, SlotBinding> = HashMap::new();
        for column in base_schema {
            let slot_id = ids.next_slot_id();
            slots.push(SlotDescriptor {
                id: slot_id,
                column_name: column.name.clone(),
                primitive_type: column.primitive_type,
                is_nullable: column.allow_null,
                is_materialized: true,
            });
            slot_by_name.insert(
                column.name.to_ascii_lowercase(),
                SlotBinding {
                    slot_id,
                    primitive_type: column.primitive_type,
                },
            );
        }

        let mut used = UsedColumns::default();
        for column in rollup_schema {
            if table.column(&column.name).is_some() {
                used.push(&column.name);
            }
        }

        let mut define_exprs = BTreeMap::new();
        for column in rollup_schema {
            let Some(define_expr) = column.define_expr.as_ref() else {
                continue;
            };
            let bound = bind_expr(
                define_expr,
                column.primitive_type,
                &column.name,
                &slot_by_name,
                &mut used,
            )?;
            define_exprs.insert(column.name.clone(), bound);
        }

        let where_expr = match where_clause {
            Some(expr) => Some(bind_expr(
                expr,
                PrimitiveType::Boolean,
                WHERE_PREDICATE_COLUMN_NAME,
                &slot_by_name,
                &mut used,
            )?),
            None => None,
        };

        let mut keys = Vec::new();
        let mut values = Vec::new();
        for name in used.names {
            match table.column(&name) {
                Some(column) if column.is_key => keys.push(column.name.clone()),
                Some(column) => values.push(column.name.clone()),
                None => {
                    return Err(format!(
                        "Materialized view's ref column {name} is not found in the base table."
                    ));
                }
            }
        }
        keys.extend(values);

        tracing::debug!(
            db = db_name,
            table = table.name.as_str(),
            define_exprs = define_exprs.len(),
            used_columns = keys.len(),
            "analyzed rollup define expressions"
        );

        Ok(RollupJobParams {
            define_exprs,
            where_expr,
            desc_table: DescriptorTable { tuple_id, slots },
            used_column_names: keys,
        })
    }
}

/// Insertion-ordered, case-insensitive set of column names.
#[derive(Default)]
struct UsedColumns {
    names: Vec<String>,
}

impl UsedColumns {
    fn push(&mut self, name: &str) {
        if !self.names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            self.names.push(name.to_string());
        }
    }
}

fn bind_expr(
    expr: &Expr,
    target_type: PrimitiveType,
    column_name: &str,
    slot_by_name: &HashMap<String, SlotBinding>,
    used: &mut UsedColumns,
) -> Result<Expr, String> {
    let mut bound = expr.clone();
    bound.try_for_each_slot_ref_mut(&mut |ref_name, binding| {
        let slot = slot_by_name
            .get(&ref_name.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| {
                format!("Materialized view's ref column {ref_name} is not found in the base table.")
            })?;
        *binding = Some(slot);
        used.push(ref_name);
        Ok(())
    })?;
    match bound.result_type() {
        Some(ty) if ty.is_fully_compatible(target_type) => Ok(bound),
        _ => Ok(Expr::Cast {
            target: target_type,
            child: Box::new(bound),
        }),
    }
}

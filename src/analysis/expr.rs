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
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::column::PrimitiveType;
use crate::common::ids::{SlotId, TupleId};

/// Column name under which a materialized view's WHERE predicate travels next to the
/// define expressions.
pub const WHERE_PREDICATE_COLUMN_NAME: &str = "__WHERE_PREDICATE__";

#[derive(Clone, Debug, PartialEq)]
pub enum LiteralValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl LiteralValue {
    fn result_type(&self) -> Option<PrimitiveType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(PrimitiveType::Boolean),
            Self::Int(_) => Some(PrimitiveType::Bigint),
            Self::Double(_) => Some(PrimitiveType::Double),
            Self::String(_) => Some(PrimitiveType::Varchar),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// Slot a column reference was resolved to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlotBinding {
    pub slot_id: SlotId,
    pub primitive_type: PrimitiveType,
}

/// Expression tree of a computed rollup column or a rollup WHERE predicate.
///
/// Expressions are not serializable: jobs persist the origin statement and re-derive them.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    SlotRef {
        column_name: String,
        binding: Option<SlotBinding>,
    },
    Literal(LiteralValue),
    FunctionCall {
        name: String,
        args: Vec<Expr>,
        return_type: PrimitiveType,
    },
    Cast {
        target: PrimitiveType,
        child: Box<Expr>,
    },
    BinaryPredicate {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn slot_ref(column_name: impl Into<String>) -> Self {
        Self::SlotRef {
            column_name: column_name.into(),
            binding: None,
        }
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>, return_type: PrimitiveType) -> Self {
        Self::FunctionCall {
            name: name.into(),
            args,
            return_type,
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::BinaryPredicate {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `None` while a slot reference is still unbound.
    pub fn result_type(&self) -> Option<PrimitiveType> {
        match self {
            Self::SlotRef { binding, .. } => binding.map(|b| b.primitive_type),
            Self::Literal(value) => value.result_type(),
            Self::FunctionCall { return_type, .. } => Some(*return_type),
            Self::Cast { target, .. } => Some(*target),
            Self::BinaryPredicate { .. } => Some(PrimitiveType::Boolean),
        }
    }

    /// Referenced column names in depth-first order, duplicates kept.
    pub fn slot_ref_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_slot_ref_names(&mut out);
        out
    }

    fn collect_slot_ref_names(&self, out: &mut Vec<String>) {
        match self {
            Self::SlotRef { column_name, .. } => out.push(column_name.clone()),
            Self::Literal(_) => {}
            Self::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_slot_ref_names(out);
                }
            }
            Self::Cast { child, .. } => child.collect_slot_ref_names(out),
            Self::BinaryPredicate { lhs, rhs, .. } => {
                lhs.collect_slot_ref_names(out);
                rhs.collect_slot_ref_names(out);
            }
        }
    }

    /// Rewrites every slot reference in place; stops at the first error.
    pub fn try_for_each_slot_ref_mut<F>(&mut self, f: &mut F) -> Result<(), String>
    where
        F: FnMut(&str, &mut Option<SlotBinding>) -> Result<(), String>,
    {
        match self {
            Self::SlotRef {
                column_name,
                binding,
            } => f(column_name, binding),
            Self::Literal(_) => Ok(()),
            Self::FunctionCall { args, .. } => {
                for arg in args {
                    arg.try_for_each_slot_ref_mut(f)?;
                }
                Ok(())
            }
            Self::Cast { child, .. } => child.try_for_each_slot_ref_mut(f),
            Self::BinaryPredicate { lhs, rhs, .. } => {
                lhs.try_for_each_slot_ref_mut(f)?;
                rhs.try_for_each_slot_ref_mut(f)
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlotRef { column_name, .. } => write!(f, "`{column_name}`"),
            Self::Literal(LiteralValue::Null) => write!(f, "NULL"),
            Self::Literal(LiteralValue::Bool(v)) => write!(f, "{v}"),
            Self::Literal(LiteralValue::Int(v)) => write!(f, "{v}"),
            Self::Literal(LiteralValue::Double(v)) => write!(f, "{v}"),
            Self::Literal(LiteralValue::String(v)) => write!(f, "'{v}'"),
            Self::FunctionCall { name, args, .. } => {
                write!(f, "{name}(")?;
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Self::Cast { target, child } => write!(f, "CAST({child} AS {target:?})"),
            Self::BinaryPredicate { op, lhs, rhs } => write!(f, "{lhs} {} {rhs}", op.as_str()),
        }
    }
}

/// Statement text a rollup was created from, kept to re-derive define expressions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginStatement {
    pub orig_stmt: String,
    pub idx: usize,
}

impl OriginStatement {
    pub fn new(orig_stmt: impl Into<String>, idx: usize) -> Self {
        Self {
            orig_stmt: orig_stmt.into(),
            idx,
        }
    }
}

/// Re-derives `column name -> define expression` from a stored statement. The WHERE predicate,
/// when present, is returned under [`WHERE_PREDICATE_COLUMN_NAME`].
pub trait DefineExprParser: Send + Sync {
    fn parse_column_define_exprs(
        &self,
        stmt: &OriginStatement,
    ) -> Result<HashMap<String, Expr>, String>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub id: SlotId,
    pub column_name: String,
    pub primitive_type: PrimitiveType,
    pub is_nullable: bool,
    pub is_materialized: bool,
}

/// Scan tuple over the base schema that rollup alter tasks evaluate define expressions against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorTable {
    pub tuple_id: TupleId,
    pub slots: Vec<SlotDescriptor>,
}

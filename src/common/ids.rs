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

macro_rules! descriptor_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i32);

        impl $name {
            pub const fn new(value: i32) -> Self {
                Self(value)
            }

            pub const fn as_i32(self) -> i32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

descriptor_id!(
    /// Slot id inside a descriptor table shipped with rollup alter tasks.
    SlotId
);

descriptor_id!(TupleId);

/// Sequential id source for slots and tuples of one descriptor table.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next_slot: i32,
    next_tuple: i32,
}

impl IdGenerator {
    pub fn next_slot_id(&mut self) -> SlotId {
        let id = SlotId::new(self.next_slot);
        self.next_slot += 1;
        id
    }

    pub fn next_tuple_id(&mut self) -> TupleId {
        let id = TupleId::new(self.next_tuple);
        self.next_tuple += 1;
        id
    }
}

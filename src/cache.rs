// Copyright (C) 2020  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Concurrent mapping from conventional address to the most recently observed value.
//!
//! Addresses are added by `poll` (the consumer registering interest) or never removed for
//! the life of the engine. The poll task takes a snapshot of the key set before planning a
//! cycle; `DashMap`'s shard-local locking means that snapshot never contends with concurrent
//! `poll()` calls from other threads.

use dashmap::DashMap;

/// One cached cell: a bit, a register, or "registered but never read"
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value {
    Unknown,
    Bit(bool),
    Word(u16),
}

impl Value {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown)
    }
}

/// The register cache itself
#[derive(Default)]
pub struct Cache {
    cells: DashMap<u32, Value>,
}

impl Cache {
    pub fn new() -> Self {
        Self { cells: DashMap::new() }
    }

    /// Register interest in `count` addresses starting at `address`, inserting an `Unknown`
    /// cell for any that aren't already present. Idempotent.
    pub fn poll(&self, address: u32, count: u32) {
        for addr in address..address + count {
            self.cells.entry(addr).or_insert(Value::Unknown);
        }
    }

    /// Read the cached value for `address`, or `Unknown` if it was never registered.
    pub fn read(&self, address: u32) -> Value {
        self.cells.get(&address).map(|v| *v).unwrap_or(Value::Unknown)
    }

    /// `true` if no address has ever been registered (used to decide whether "nothing is
    /// polling" should flip the engine offline, per the invariant in the data model: `online`
    /// is only meaningful once something has been registered).
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// A sorted snapshot of the registered keys, as unit-length ranges ready to feed into
    /// `plan::merge`. Stable under concurrent `poll()` calls: each key is either present in
    /// the snapshot or not, never partially visible.
    pub fn keys_snapshot(&self) -> Vec<(u32, u32)> {
        let mut keys: Vec<u32> = self.cells.iter().map(|entry| *entry.key()).collect();
        keys.sort_unstable();
        keys.into_iter().map(|addr| (addr, 1)).collect()
    }

    /// Store a single bit value at `address`.
    pub fn store_bit(&self, address: u32, value: bool) {
        self.cells.insert(address, Value::Bit(value));
    }

    /// Store a single register value at `address`.
    pub fn store_word(&self, address: u32, value: u16) {
        self.cells.insert(address, Value::Word(value));
    }

    /// Store a contiguous run of bits starting at `address`, as returned by a multi-coil read.
    /// Values beyond what was originally polled (picked up by a merge's over-read) are stored
    /// too, but only addresses already present are meaningfully observed by consumers.
    pub fn store_bits(&self, address: u32, values: &[bool]) {
        for (i, &v) in values.iter().enumerate() {
            self.cells.insert(address + i as u32, Value::Bit(v));
        }
    }

    /// Store a contiguous run of registers starting at `address`.
    pub fn store_words(&self, address: u32, values: &[u16]) {
        for (i, &v) in values.iter().enumerate() {
            self.cells.insert(address + i as u32, Value::Word(v));
        }
    }
}

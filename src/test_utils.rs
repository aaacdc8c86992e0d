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

//! A fake `Transport` that simulates a PLC's register banks entirely in memory, so the
//! poller, writer and cache can be exercised without a real socket. Mirrors
//! `ii_async_i2c::test_utils::FakeI2cBus`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::classify::{ReadOp, WriteOp};
use crate::error::{Error, Result};
use crate::transport::{ReadValue, Transport, WriteValue};

/// In-memory PLC simulator used as a `Transport` in tests.
pub struct FakeTransport {
    /// If `false`, `connect()` fails (simulating a PLC that's unreachable). Kept behind an
    /// `Arc` so a test can flip reachability after the transport has been moved into an
    /// `Engine`, via the handle returned by `FakeTransport::online_handle`.
    online: Arc<AtomicBool>,
    coils: HashMap<u16, bool>,
    discrete: HashMap<u16, bool>,
    input_regs: HashMap<u16, u16>,
    holding_regs: HashMap<u16, u16>,
    /// (offset, count) ranges that should fail with a Modbus exception when read/written.
    pub fail_offsets: HashSet<u16>,
    /// Highest number of transactions observed to be concurrently in-flight; used by tests
    /// asserting mutual exclusion between the poller and a concurrent writer.
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    /// Artificial per-transaction delay, to give concurrent callers a window to race.
    pub delay: Duration,
    connected: bool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            online: Arc::new(AtomicBool::new(true)),
            coils: HashMap::new(),
            discrete: HashMap::new(),
            input_regs: HashMap::new(),
            holding_regs: HashMap::new(),
            fail_offsets: HashSet::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            connected: false,
        }
    }

    /// A handle that can flip this transport's reachability after it has been handed off to
    /// an `Engine`, e.g. `handle.store(false, Ordering::SeqCst)` to simulate the PLC dropping
    /// off the network.
    pub fn online_handle(&self) -> Arc<AtomicBool> {
        self.online.clone()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_holding(&mut self, offset: u16, value: u16) {
        self.holding_regs.insert(offset, value);
    }

    pub fn set_input(&mut self, offset: u16, value: u16) {
        self.input_regs.insert(offset, value);
    }

    pub fn set_coil(&mut self, offset: u16, value: bool) {
        self.coils.insert(offset, value);
    }

    pub fn set_discrete(&mut self, offset: u16, value: bool) {
        self.discrete.insert(offset, value);
    }

    async fn enter(&self) {
        let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(n, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn begin_transaction(&mut self, _budget: Option<Duration>) {}

    async fn connect(&mut self) -> bool {
        self.connected = self.online.load(Ordering::SeqCst);
        self.connected
    }

    async fn read(&mut self, op: ReadOp, offset: u16, count: u16) -> Result<ReadValue> {
        if !self.connected {
            return Err(Error::PlcOffline("fake".into(), 0));
        }
        self.enter().await;
        let result = if (offset..offset + count).any(|o| self.fail_offsets.contains(&o)) {
            Err(Error::Modbus(tokio_modbus::ExceptionCode::IllegalDataAddress))
        } else {
            Ok(match op {
                ReadOp::ReadCoils => ReadValue::Bits(
                    (offset..offset + count).map(|o| *self.coils.get(&o).unwrap_or(&false)).collect(),
                ),
                ReadOp::ReadDiscreteInputs => ReadValue::Bits(
                    (offset..offset + count).map(|o| *self.discrete.get(&o).unwrap_or(&false)).collect(),
                ),
                ReadOp::ReadInputRegisters => ReadValue::Words(
                    (offset..offset + count).map(|o| *self.input_regs.get(&o).unwrap_or(&0)).collect(),
                ),
                ReadOp::ReadHoldingRegisters => ReadValue::Words(
                    (offset..offset + count).map(|o| *self.holding_regs.get(&o).unwrap_or(&0)).collect(),
                ),
            })
        };
        self.exit();
        result
    }

    async fn write(&mut self, op: WriteOp, offset: u16, value: WriteValue) -> Result<()> {
        if !self.connected {
            return Err(Error::PlcOffline("fake".into(), 0));
        }
        self.enter().await;
        if self.fail_offsets.contains(&offset) {
            self.exit();
            return Err(Error::Modbus(tokio_modbus::ExceptionCode::IllegalDataAddress));
        }
        match (op, value) {
            (WriteOp::WriteSingleCoil, WriteValue::Bit(b)) => {
                self.coils.insert(offset, b);
            }
            (WriteOp::WriteMultipleCoils, WriteValue::Bits(bs)) => {
                for (i, b) in bs.into_iter().enumerate() {
                    self.coils.insert(offset + i as u16, b);
                }
            }
            (WriteOp::WriteSingleRegister, WriteValue::Word(w)) => {
                self.holding_regs.insert(offset, w);
            }
            (WriteOp::WriteMultipleRegisters, WriteValue::Words(ws)) => {
                for (i, w) in ws.into_iter().enumerate() {
                    self.holding_regs.insert(offset + i as u16, w);
                }
            }
            _ => unreachable!("classify::classify_write only pairs ops with matching values"),
        }
        self.exit();
        Ok(())
    }
}

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

//! A Modbus/TCP transport enforcing a single wall-clock deadline across an entire
//! transaction (connect, if needed, plus the PDU exchange itself), on top of the
//! `tokio-modbus` crate's connection and framing.

use std::io;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_modbus::client::{tcp, Context, Reader, Writer};
use tokio_modbus::slave::Slave;

use crate::classify::{ReadOp, WriteOp};
use crate::error::{Error, Result};

/// Value read back from a transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadValue {
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

/// Value to be written by a transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteValue {
    Bit(bool),
    Bits(Vec<bool>),
    Word(u16),
    Words(Vec<u16>),
}

impl WriteValue {
    /// Whether this value names a multi-register/coil write (a list), used to pick the
    /// write opcode in `classify::classify_write`.
    pub fn is_multi(&self) -> bool {
        matches!(self, WriteValue::Bits(_) | WriteValue::Words(_))
    }

    /// Whether this value is bit-shaped (`Bit`/`Bits`) as opposed to word-shaped
    /// (`Word`/`Words`), used by `classify::classify_write` to reject a value whose shape
    /// doesn't match the target address's register kind.
    pub fn is_bit(&self) -> bool {
        matches!(self, WriteValue::Bit(_) | WriteValue::Bits(_))
    }
}

/// Tracks the remaining budget of a single in-flight transaction.
///
/// Mirrors `ModbusTcpClientTimeout.timeout` from the original: assigning a budget starts the
/// clock; `remaining()` always returns `max(0, started + budget - now)`. With no budget
/// started, `remaining()` falls back to `default` so that callers outside a transaction (or
/// a transport that's never had one started) still get a sane per-I/O timeout.
pub struct TimeoutState {
    default: Duration,
    started: Option<Instant>,
    budget: Duration,
}

impl TimeoutState {
    pub fn new(default: Duration) -> Self {
        Self { default, started: None, budget: default }
    }

    /// Begin a transaction. `budget` of `None` means "use the configured default".
    pub fn start(&mut self, budget: Option<Duration>) {
        self.started = Some(Instant::now());
        self.budget = budget.unwrap_or(self.default);
    }

    /// Revert to per-I/O default behaviour.
    pub fn clear(&mut self) {
        self.started = None;
    }

    pub fn remaining(&self) -> Duration {
        match self.started {
            Some(started) => self.budget.saturating_sub(started.elapsed()),
            None => self.default,
        }
    }
}

/// Abstraction over a single-connection Modbus/TCP transport, so the poller and writer can
/// be exercised in tests against `test_utils::FakeTransport` without a real socket.
#[async_trait]
pub trait Transport: Send {
    /// Begin a transaction with the given budget (`None` == use the transport's default).
    fn begin_transaction(&mut self, budget: Option<Duration>);

    /// Ensure a connection is established, within whatever budget remains. Returns `false`
    /// (never an error) on connect failure, matching the original's "swallow and return
    /// false" contract, which callers then turn into `Error::PlcOffline`.
    async fn connect(&mut self) -> bool;

    /// Execute one read transaction.
    async fn read(&mut self, op: ReadOp, offset: u16, count: u16) -> Result<ReadValue>;

    /// Execute one write transaction.
    async fn write(&mut self, op: WriteOp, offset: u16, value: WriteValue) -> Result<()>;
}

/// Real transport, wrapping a lazily-connected `tokio_modbus::client::Context`.
pub struct ModbusTransport {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: TimeoutState,
    ctx: Option<Context>,
}

impl ModbusTransport {
    pub fn new(host: String, port: u16, unit_id: u8, default_timeout: Duration) -> Self {
        Self { host, port, unit_id, timeout: TimeoutState::new(default_timeout), ctx: None }
    }

    fn close(&mut self) {
        self.ctx = None;
    }

    async fn resolve(&self) -> io::Result<std::net::SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address found for host"))
    }
}

impl From<tokio_modbus::Error> for Error {
    fn from(e: tokio_modbus::Error) -> Self {
        match e {
            tokio_modbus::Error::Transport(io_err) => Error::Io(io_err),
            tokio_modbus::Error::Protocol(exc) => Error::Modbus(exc),
        }
    }
}

#[async_trait]
impl Transport for ModbusTransport {
    fn begin_transaction(&mut self, budget: Option<Duration>) {
        self.timeout.start(budget);
    }

    async fn connect(&mut self) -> bool {
        if self.ctx.is_some() {
            return true;
        }
        let remaining = self.timeout.remaining();
        let attempt = async {
            let addr = self.resolve().await?;
            tcp::connect_slave(addr, Slave(self.unit_id)).await
        };
        match tokio::time::timeout(remaining, attempt).await {
            Ok(Ok(ctx)) => {
                self.ctx = Some(ctx);
                true
            }
            _ => {
                self.close();
                false
            }
        }
    }

    async fn read(&mut self, op: ReadOp, offset: u16, count: u16) -> Result<ReadValue> {
        let ctx = self.ctx.as_mut().ok_or_else(|| Error::PlcOffline(self.host.clone(), self.port))?;
        let remaining = self.timeout.remaining();
        let attempt = async {
            match op {
                ReadOp::ReadCoils => ctx.read_coils(offset, count).await.map(ReadValue::Bits),
                ReadOp::ReadDiscreteInputs => {
                    ctx.read_discrete_inputs(offset, count).await.map(ReadValue::Bits)
                }
                ReadOp::ReadInputRegisters => {
                    ctx.read_input_registers(offset, count).await.map(ReadValue::Words)
                }
                ReadOp::ReadHoldingRegisters => {
                    ctx.read_holding_registers(offset, count).await.map(ReadValue::Words)
                }
            }
        };
        match tokio::time::timeout(remaining, attempt).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.close();
                Err(e.into())
            }
            Err(_) => {
                self.close();
                Err(Error::Timeout(remaining))
            }
        }
    }

    async fn write(&mut self, op: WriteOp, offset: u16, value: WriteValue) -> Result<()> {
        let ctx = self.ctx.as_mut().ok_or_else(|| Error::PlcOffline(self.host.clone(), self.port))?;
        let remaining = self.timeout.remaining();
        let attempt = async {
            match (op, value) {
                (WriteOp::WriteSingleCoil, WriteValue::Bit(b)) => ctx.write_single_coil(offset, b).await,
                (WriteOp::WriteMultipleCoils, WriteValue::Bits(bs)) => {
                    ctx.write_multiple_coils(offset, &bs).await
                }
                (WriteOp::WriteSingleRegister, WriteValue::Word(w)) => {
                    ctx.write_single_register(offset, w).await
                }
                (WriteOp::WriteMultipleRegisters, WriteValue::Words(ws)) => {
                    ctx.write_multiple_registers(offset, &ws).await
                }
                _ => unreachable!("classify::classify_write only pairs ops with matching values"),
            }
        };
        match tokio::time::timeout(remaining, attempt).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.close();
                Err(e.into())
            }
            Err(_) => {
                self.close();
                Err(Error::Timeout(remaining))
            }
        }
    }
}

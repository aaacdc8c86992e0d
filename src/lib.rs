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

//! Modbus/TCP polling engine for PLC register supervision.
//!
//! Consumers register interest in conventional (1-based) register addresses with
//! [`Engine::poll`], read back the most recently observed value with [`Engine::read`], and
//! issue synchronous writes with [`Engine::write`]. A background task periodically plans the
//! registered addresses into a minimal set of PDU-legal Modbus transactions, executes them
//! against a single shared, strictly-timed-out transport connection, and updates the cache
//! and online status.

pub mod cache;
pub mod classify;
pub mod engine;
pub mod error;
pub mod plan;
mod poller;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::Value;
pub use classify::{Kind, ReadOp, WriteOp};
pub use engine::{Engine, EngineConfig, PollStatus};
pub use error::{Error, Result};
pub use transport::{ReadValue, Transport, WriteValue};

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

//! Error taxonomy for the Modbus/TCP polling engine

use thiserror::Error;

/// Local error definition
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid address {0} for {1}")]
    InvalidAddress(u32, &'static str),

    #[error("PLC offline: connect to {0}:{1} failed")]
    PlcOffline(String, u16),

    #[error("Modbus protocol exception: {0:?}")]
    Modbus(tokio_modbus::ExceptionCode),

    #[error("transaction timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias
pub type Result<T> = std::result::Result<T, self::Error>;

impl Error {
    /// Is this the kind of error the poller should record-and-continue on, rather than
    /// one a caller needs to see propagated verbatim?
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Timeout(_) | Error::PlcOffline(..))
    }
}

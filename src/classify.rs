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

//! Maps conventional (1-based, Modicon-style) register addresses onto the register kind,
//! zero-based protocol offset and Modbus opcode that address names.

use crate::error::{Error, Result};

/// The four register kinds a conventional address can name
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Coil,
    DiscreteInput,
    InputRegister,
    HoldingRegister,
}

impl Kind {
    /// `true` for single-bit kinds, `false` for 16-bit register kinds
    pub fn is_bit(&self) -> bool {
        matches!(self, Kind::Coil | Kind::DiscreteInput)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Kind::Coil | Kind::HoldingRegister)
    }
}

/// One read opcode, as selected by `classify_read`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOp {
    ReadCoils,
    ReadDiscreteInputs,
    ReadInputRegisters,
    ReadHoldingRegisters,
}

/// One write opcode, as selected by `classify_write`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOp {
    WriteSingleCoil,
    WriteMultipleCoils,
    WriteSingleRegister,
    WriteMultipleRegisters,
}

/// A band of the conventional address space: its inclusive bounds, the kind it names and
/// the zero-based offset base to subtract.
struct Band {
    low: u32,
    high: u32,
    base: u32,
    kind: Kind,
}

/// Ordered low-to-high; `classify_band` relies on this only for readability, not for search order.
const BANDS: &[Band] = &[
    Band { low: 1, high: 9_999, base: 1, kind: Kind::Coil },
    Band { low: 10_001, high: 19_999, base: 10_001, kind: Kind::DiscreteInput },
    Band { low: 30_001, high: 39_999, base: 30_001, kind: Kind::InputRegister },
    Band { low: 40_001, high: 99_999, base: 40_001, kind: Kind::HoldingRegister },
    Band { low: 100_001, high: 165_536, base: 100_001, kind: Kind::DiscreteInput },
    Band { low: 300_001, high: 365_536, base: 300_001, kind: Kind::InputRegister },
    Band { low: 400_001, high: 465_536, base: 400_001, kind: Kind::HoldingRegister },
];

fn classify_band(address: u32) -> Option<&'static Band> {
    BANDS.iter().find(|b| address >= b.low && address <= b.high)
}

/// Result of classifying a single conventional address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classified {
    pub kind: Kind,
    pub offset: u16,
}

/// Classify a bare address, irrespective of read/write intent. Used by the cache and the
/// planner, which only need to know the kind (to enforce the no-cross-band-merge rule) and
/// the offset (for the round-trip invariant).
pub fn classify(address: u32) -> Result<Classified> {
    let band = classify_band(address).ok_or(Error::InvalidAddress(address, "unknown band"))?;
    Ok(Classified {
        kind: band.kind,
        offset: (address - band.base) as u16,
    })
}

/// Classify a read request covering `[address, address + count)`. Fails if the range is
/// invalid, spans two bands, or doesn't fit the zero-based u16 offset space.
pub fn classify_read(address: u32, count: u32) -> Result<(ReadOp, u16)> {
    let band = classify_band(address).ok_or(Error::InvalidAddress(address, "read"))?;
    let last = address + count.saturating_sub(1);
    if last > band.high {
        return Err(Error::InvalidAddress(address, "range spans a register-kind boundary"));
    }
    let offset = (address - band.base) as u16;
    let op = match band.kind {
        Kind::Coil => ReadOp::ReadCoils,
        Kind::DiscreteInput => ReadOp::ReadDiscreteInputs,
        Kind::InputRegister => ReadOp::ReadInputRegisters,
        Kind::HoldingRegister => ReadOp::ReadHoldingRegisters,
    };
    Ok((op, offset))
}

/// Classify a write request. `multi` selects the multiple-register/coil opcode over the
/// single one; it should be `true` iff the caller's value is a list. `is_bit` must match the
/// target kind's width (`true` for a `Bit`/`Bits` value, `false` for `Word`/`Words`); a
/// mismatch (e.g. a word value against a coil address) is rejected rather than trusted, so a
/// bad caller input fails here instead of panicking further down in the transport. Status and
/// Input Register bands are never writable and are rejected here, matching pymodbus's
/// `ParameterException` for those addresses in the original.
pub fn classify_write(address: u32, multi: bool, is_bit: bool) -> Result<(WriteOp, u16)> {
    let band = classify_band(address).ok_or(Error::InvalidAddress(address, "write"))?;
    if !band.kind.is_writable() {
        return Err(Error::InvalidAddress(address, "read-only address"));
    }
    if band.kind.is_bit() != is_bit {
        return Err(Error::InvalidAddress(address, "value shape doesn't match register width"));
    }
    let offset = (address - band.base) as u16;
    let op = match (band.kind, multi) {
        (Kind::Coil, false) => WriteOp::WriteSingleCoil,
        (Kind::Coil, true) => WriteOp::WriteMultipleCoils,
        (Kind::HoldingRegister, false) => WriteOp::WriteSingleRegister,
        (Kind::HoldingRegister, true) => WriteOp::WriteMultipleRegisters,
        _ => unreachable!("non-writable kinds rejected above"),
    };
    Ok((op, offset))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_classify_round_trip() {
        // Law 4: classify(a).offset + kind_base(classify(a).kind) == a, for every valid a.
        let samples = [
            1u32, 9999, 10001, 19999, 30001, 39999, 40001, 99999, 100001, 165536, 300001, 365536,
            400001, 465536, 1234, 40123, 300500,
        ];
        for &a in &samples {
            let c = classify(a).expect("should classify");
            let base = match c.kind {
                Kind::Coil if a <= 9999 => 1,
                Kind::Coil => unreachable!(),
                Kind::DiscreteInput if a <= 19999 => 10_001,
                Kind::DiscreteInput => 100_001,
                Kind::InputRegister if a <= 39999 => 30_001,
                Kind::InputRegister => 300_001,
                Kind::HoldingRegister if a <= 99999 => 40_001,
                Kind::HoldingRegister => 400_001,
            };
            assert_eq!(c.offset as u32 + base, a);
        }
    }

    #[test]
    fn test_classify_invalid() {
        assert!(classify(0).is_err());
        assert!(classify(20_000).is_err());
        assert!(classify(40_000).is_err());
        assert!(classify(500_000).is_err());
    }

    #[test]
    fn test_classify_read_opcodes() {
        assert_eq!(classify_read(1, 1).unwrap(), (ReadOp::ReadCoils, 0));
        assert_eq!(classify_read(10_001, 1).unwrap(), (ReadOp::ReadDiscreteInputs, 0));
        assert_eq!(classify_read(30_001, 1).unwrap(), (ReadOp::ReadInputRegisters, 0));
        assert_eq!(classify_read(40_001, 1).unwrap(), (ReadOp::ReadHoldingRegisters, 0));
        assert_eq!(classify_read(400_010, 1).unwrap(), (ReadOp::ReadHoldingRegisters, 9));
    }

    #[test]
    fn test_classify_read_rejects_spanning_range() {
        // 9999 is the last coil; a 2-register read starting there would spill into the
        // discrete-input band and must be rejected.
        assert!(classify_read(9_999, 2).is_err());
    }

    /// S5 — write classification.
    #[test]
    fn test_classify_write_s5() {
        assert_eq!(classify_write(40_001, false, false).unwrap(), (WriteOp::WriteSingleRegister, 0));
        assert_eq!(classify_write(40_001, true, false).unwrap(), (WriteOp::WriteMultipleRegisters, 0));
        assert!(classify_write(30_001, false, false).is_err());
    }

    #[test]
    fn test_classify_write_accepts_both_holding_bands() {
        // Open Question resolution: both the Modicon (40001-99999) and Allen-Bradley
        // (400001-465536) holding register bands are accepted for writes.
        assert_eq!(classify_write(40_001, false, false).unwrap().1, 0);
        assert_eq!(classify_write(400_001, false, false).unwrap().1, 0);
    }

    #[test]
    fn test_classify_write_coil() {
        assert_eq!(classify_write(1, false, true).unwrap(), (WriteOp::WriteSingleCoil, 0));
        assert_eq!(classify_write(1, true, true).unwrap(), (WriteOp::WriteMultipleCoils, 0));
    }

    #[test]
    fn test_classify_write_rejects_shape_mismatch() {
        // A word value against a coil address (or vice versa) must be rejected here rather
        // than reaching the transport with an opcode/value pairing nothing can execute.
        assert!(classify_write(1, false, false).is_err());
        assert!(classify_write(40_001, false, true).is_err());
    }
}

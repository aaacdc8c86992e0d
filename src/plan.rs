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

//! Turns a sparse set of requested addresses into a minimal ordered sequence of
//! protocol-legal multi-register transactions: `merge` coalesces adjacent/nearby ranges,
//! `shatter` then splits whatever comes out of that back down to the PDU's size limit.

/// Maximum coils/statuses per PDU (253-byte PDU limit)
pub const BIT_LIMIT: u32 = 1968;
/// Maximum registers per PDU
pub const REGISTER_LIMIT: u32 = 123;

/// `true` if `address` falls in one of the bit-kind (coil/status) bands
fn is_bit_address(address: u32) -> bool {
    (1..=9_999).contains(&address)
        || (10_001..=19_999).contains(&address)
        || (100_001..=165_536).contains(&address)
}

fn derive_limit(address: u32) -> u32 {
    if is_bit_address(address) {
        BIT_LIMIT
    } else {
        REGISTER_LIMIT
    }
}

/// Splits `(address, count)` into sub-ranges of length at most `limit`, tiling the input
/// range exactly. If `limit` is `None` it is derived from `address`'s register kind.
pub fn shatter(address: u32, count: u32, limit: Option<u32>) -> impl Iterator<Item = (u32, u32)> {
    let limit = limit.unwrap_or_else(|| derive_limit(address)).max(1);
    let mut address = address;
    let mut remaining = count;
    std::iter::from_fn(move || {
        if remaining == 0 {
            return None;
        }
        let taken = remaining.min(limit);
        let out = (address, taken);
        address += taken;
        remaining -= taken;
        Some(out)
    })
}

/// Coalesces an arbitrary collection of `(address, count)` ranges, merging any two ranges
/// within `reach` of each other (and within the same 10,000-wide kind band), then re-splits
/// each merged super-range through `shatter` with the given `limit`.
///
/// Mirrors `merge()` in the original `plc_modbus.py`: ranges are sorted once, then folded
/// left-to-right, extending a running `(base, length)` merge window for as long as the next
/// range both shares `base`'s band (`address / 10_000 == base / 10_000`) and starts within
/// `reach` registers of the window's current end.
pub fn merge(
    ranges: impl IntoIterator<Item = (u32, u32)>,
    reach: u32,
    limit: Option<u32>,
) -> Vec<(u32, u32)> {
    let mut sorted: Vec<(u32, u32)> = ranges.into_iter().collect();
    sorted.sort_by_key(|&(addr, _)| addr);

    let mut out = Vec::new();
    let mut window: Option<(u32, u32)> = None;
    // The original falls back to a reach of 1 when the caller passes a falsy (zero) reach.
    let reach = if reach == 0 { 1 } else { reach };

    for (address, count) in sorted {
        match window {
            Some((base, length)) => {
                if address / 10_000 == base / 10_000 && address < base + length + reach {
                    let new_end = address + count;
                    let cur_end = base + length;
                    window = Some((base, new_end.max(cur_end) - base));
                } else {
                    out.extend(shatter(base, length, limit));
                    window = Some((address, count));
                }
            }
            None => window = Some((address, count)),
        }
    }
    if let Some((base, length)) = window {
        out.extend(shatter(base, length, limit));
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    /// S1 — shatter derivation.
    #[test]
    fn test_shatter_s1_bits() {
        let out: Vec<_> = shatter(1, 4000, None).collect();
        assert_eq!(out, vec![(1, 1968), (1969, 1968), (3937, 64)]);
    }

    #[test]
    fn test_shatter_s1_registers() {
        let out: Vec<_> = shatter(40_001, 300, None).collect();
        assert_eq!(out, vec![(40_001, 123), (40_124, 123), (40_247, 54)]);
    }

    #[test]
    fn test_shatter_respects_explicit_limit() {
        let out: Vec<_> = shatter(1, 10, Some(4)).collect();
        assert_eq!(out, vec![(1, 4), (5, 4), (9, 2)]);
    }

    #[test]
    fn test_shatter_every_piece_at_most_limit() {
        // Law 3
        for &(addr, count, limit) in &[(1u32, 9999u32, 123u32), (40_001, 5000, 123), (1, 20_000, 1968)] {
            for (_, len) in shatter(addr, count, Some(limit)) {
                assert!(len <= limit);
            }
        }
    }

    /// S2 — merge across kinds is forbidden.
    #[test]
    fn test_merge_s2_forbids_cross_kind() {
        let out = merge([(9_998, 1), (9_999, 1), (10_001, 1)], 10, None);
        assert!(out.contains(&(9_998, 2)));
        assert!(out.contains(&(10_001, 1)));
    }

    /// S3 — merge within reach.
    #[test]
    fn test_merge_s3_within_reach() {
        let out = merge([(40_001, 1), (40_005, 1), (40_010, 1)], 5, Some(123));
        assert_eq!(out, vec![(40_001, 10)]);
    }

    /// S4 — merge beyond reach.
    #[test]
    fn test_merge_s4_beyond_reach() {
        let out = merge([(40_001, 1), (40_005, 1), (40_010, 1)], 2, Some(123));
        assert_eq!(out, vec![(40_001, 1), (40_005, 1), (40_010, 1)]);
    }

    #[test]
    fn test_merge_empty() {
        let out = merge(std::iter::empty(), 100, None);
        assert!(out.is_empty());
    }

    #[test]
    fn test_merge_single_range_is_just_shatter() {
        // Law 1: merge(shatter(R, limit), reach=1, limit) == shatter(R, limit)
        let shattered: Vec<_> = shatter(1, 4000, Some(123)).collect();
        let merged = merge(shattered.clone(), 1, Some(123));
        assert_eq!(merged, shattered);
    }

    #[test]
    fn test_merge_tie_break_longer_survives() {
        // A single-address poll and a multi-address poll registered at the same start:
        // the longer survives after merge.
        let out = merge([(40_001, 1), (40_001, 10)], 100, Some(123));
        assert_eq!(out, vec![(40_001, 10)]);
    }

    #[test]
    fn test_merge_union_covers_input_and_stays_within_band() {
        // Law 2
        let input = vec![(1u32, 5u32), (9_998, 3), (40_001, 1), (40_050, 2)];
        let merged = merge(input.clone(), 20, None);
        for (addr, count) in &input {
            let covered = merged
                .iter()
                .any(|&(m_addr, m_count)| *addr >= m_addr && addr + count <= m_addr + m_count);
            assert!(covered, "input range ({addr}, {count}) not covered by merge output");
        }
        for &(addr, count) in &merged {
            assert_eq!(addr / 10_000, (addr + count - 1) / 10_000);
        }
    }
}

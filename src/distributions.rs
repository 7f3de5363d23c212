// Primitive decoders. Each one is a pure function of the bytes
// it consumes from a TestData, so rerunning a buffer prefix
// always reproduces the same value.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

use crate::data::{StopTest, TestData};

pub type Draw<T> = Result<T, StopTest>;

pub fn byte(data: &mut TestData) -> Draw<u8> {
    Ok(data.draw_bytes(1)?[0])
}

// Big-endian unsigned integer of n freshly drawn bytes.
pub fn n_byte_unsigned(data: &mut TestData, n: usize) -> Draw<u64> {
    assert!(n >= 1 && n <= 8);
    let bytes = data.draw_bytes(n)?;
    Ok(Cursor::new(bytes).read_uint::<BigEndian>(n).unwrap())
}

// Big-endian two's-complement signed integer of n drawn bytes.
pub fn n_byte_signed(data: &mut TestData, n: usize) -> Draw<i64> {
    assert!(n >= 1 && n <= 8);
    let bytes = data.draw_bytes(n)?;
    Ok(Cursor::new(bytes).read_int::<BigEndian>(n).unwrap())
}

// Spreads the top set bit downwards, so the result is
// (1 << bit_length(n)) - 1.
pub fn saturate(mut n: u64) -> u64 {
    let bits = 64 - n.leading_zeros();
    let mut k = 1;
    while k < bits {
        n |= n >> k;
        k *= 2;
    }
    n
}

// Uniform-ish draw in [lower, upper] by rejection sampling:
// draw just enough bytes to cover the gap, mask down to the
// saturated gap, retry until the probe lands inside.
pub fn integer_range(data: &mut TestData, lower: u64, upper: u64) -> Draw<u64> {
    assert!(lower <= upper);
    if lower == upper {
        return Ok(lower);
    }
    let gap = upper - lower;
    let bits = (64 - gap.leading_zeros()) as usize;
    let nbytes = bits / 8 + usize::from(bits % 8 != 0);
    let mask = saturate(gap);
    loop {
        let probe = n_byte_unsigned(data, nbytes)? & mask;
        if probe <= gap {
            return Ok(lower + probe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturate_fills_below_the_top_bit() {
        assert_eq!(saturate(0), 0);
        assert_eq!(saturate(1), 1);
        assert_eq!(saturate(5), 7);
        assert_eq!(saturate(255), 255);
        assert_eq!(saturate(256), 511);
        assert_eq!(saturate(u64::max_value()), u64::max_value());
    }

    #[test]
    fn unsigned_draws_are_big_endian() {
        let mut data = TestData::new(vec![1, 2]);
        assert_eq!(n_byte_unsigned(&mut data, 2).unwrap(), 258);
    }

    #[test]
    fn signed_draws_sign_extend() {
        let mut data = TestData::new(vec![0xff, 0x00, 0x2a]);
        assert_eq!(n_byte_signed(&mut data, 1).unwrap(), -1);
        assert_eq!(n_byte_signed(&mut data, 1).unwrap(), 0);
        assert_eq!(n_byte_signed(&mut data, 1).unwrap(), 42);
    }

    #[test]
    fn integer_range_is_a_single_point_without_a_gap() {
        let mut data = TestData::new(Vec::new());
        assert_eq!(integer_range(&mut data, 7, 7).unwrap(), 7);
        assert_eq!(data.index(), 0);
    }

    #[test]
    fn integer_range_accepts_probes_inside_the_gap() {
        let mut data = TestData::new(vec![0x05]);
        assert_eq!(integer_range(&mut data, 10, 20).unwrap(), 15);
    }

    #[test]
    fn integer_range_rejects_probes_outside_the_gap() {
        // gap = 10, mask = 15: 0x0b masks to 11 and is rejected,
        // the next byte masks to 2 and is accepted.
        let mut data = TestData::new(vec![0x0b, 0x02]);
        assert_eq!(integer_range(&mut data, 10, 20).unwrap(), 12);
        assert_eq!(data.index(), 2);
    }

    #[test]
    fn integer_range_covers_multi_byte_gaps() {
        let mut data = TestData::new(vec![0x01, 0x00]);
        assert_eq!(integer_range(&mut data, 0, 1000).unwrap(), 256);
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Conversion between working samples and interleaved signed 8-bit I/Q bytes.

use num_complex::Complex;

/// Convert an `i16`-range working sample to a signed 8-bit output sample.
#[inline]
pub fn to_i8(v: f32) -> i8 {
    (v / 256.0).round().clamp(-128.0, 127.0) as i8
}

/// Interleave `i`/`q` into `out` as signed bytes. Returns bytes written.
pub fn pack_iq(i: &[f32], q: &[f32], out: &mut [u8]) -> usize {
    let pairs = i.len().min(q.len()).min(out.len() / 2);
    for ((chunk, &re), &im) in out.chunks_exact_mut(2).zip(i).zip(q).take(pairs) {
        chunk[0] = to_i8(re) as u8;
        chunk[1] = to_i8(im) as u8;
    }
    pairs * 2
}

/// Iterate interleaved signed bytes as complex samples in raw `i8` units.
pub fn unpack_iq(bytes: &[u8]) -> impl Iterator<Item = Complex<f32>> + '_ {
    bytes
        .chunks_exact(2)
        .map(|c| Complex::new(c[0] as i8 as f32, c[1] as i8 as f32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_and_clamping() {
        assert_eq!(to_i8(0.0), 0);
        assert_eq!(to_i8(16_584.0), 65);
        assert_eq!(to_i8(-16_584.0), -65);
        assert_eq!(to_i8(40_000.0), 127);
        assert_eq!(to_i8(-40_000.0), -128);
        assert_eq!(to_i8(127.9), 0);
        assert_eq!(to_i8(128.0), 1);
    }

    #[test]
    fn pack_then_unpack_signs() {
        let mut bytes = [0u8; 4];
        assert_eq!(pack_iq(&[256.0, -512.0], &[-256.0, 1024.0], &mut bytes), 4);
        let samples: Vec<_> = unpack_iq(&bytes).collect();
        assert_eq!(samples, vec![Complex::new(1.0, -1.0), Complex::new(-2.0, 4.0)]);
    }
}

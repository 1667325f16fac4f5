// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Static prototype tables.
//!
//! Interpolation prototypes are scaled for a passband gain equal to their
//! conversion factor (2), so every polyphase branch sums to 1.0.

/// Audio lowpass for the first 2x stage: Hamming window, 3.4 kHz cutoff at 16 kS/s.
pub const AUDIO_LOWPASS_32: [f32; 32] = [
    0.003156195,
    0.001914457,
    -0.004053216,
    -0.006865590,
    0.004265809,
    0.017827812,
    0.002989061,
    -0.032984683,
    -0.026511929,
    0.043480464,
    0.074846192,
    -0.031486972,
    -0.161264115,
    -0.046715769,
    0.376554750,
    0.784847535,
    0.784847535,
    0.376554750,
    -0.046715769,
    -0.161264115,
    -0.031486972,
    0.074846192,
    0.043480464,
    -0.026511929,
    -0.032984683,
    0.002989061,
    0.017827812,
    0.004265809,
    -0.006865590,
    -0.004053216,
    0.001914457,
    0.003156195,
];

/// 15-tap half-band, padded with a trailing zero so its length is even.
pub const HALF_BAND_16: [f32; 16] = [
    -0.007330366,
    0.0,
    0.032480172,
    0.0,
    -0.137338000,
    0.0,
    0.612188194,
    1.0,
    0.612188194,
    0.0,
    -0.137338000,
    0.0,
    0.032480172,
    0.0,
    -0.007330366,
    0.0,
];

/// Hamming-windowed Hilbert transformer, `-2 / (pi k)` on odd offsets `k`.
pub const HILBERT_31: [f32; 31] = [
    0.003395305,
    0.0,
    0.005865182,
    0.0,
    0.013438460,
    0.0,
    0.028142285,
    0.0,
    0.053483618,
    0.0,
    0.098039445,
    0.0,
    0.193563779,
    0.0,
    0.630220404,
    0.0,
    -0.630220404,
    0.0,
    -0.193563779,
    0.0,
    -0.098039445,
    0.0,
    -0.053483618,
    0.0,
    -0.028142285,
    0.0,
    -0.013438460,
    0.0,
    -0.005865182,
    0.0,
    -0.003395305,
];

// Tables are used by 2x stages without runtime validation.
const _: () = assert!(AUDIO_LOWPASS_32.len() % 2 == 0 && HALF_BAND_16.len() % 2 == 0);

/// Group delay of [`HILBERT_31`] in samples.
pub const HILBERT_DELAY: usize = 15;

/// Pure delay matching [`HILBERT_31`].
pub const DELAY_31: [f32; 31] = {
    let mut taps = [0.0; 31];
    taps[HILBERT_DELAY] = 1.0;
    taps
};

#[cfg(test)]
mod tests {
    use super::*;

    fn branch_sum(taps: &[f32], factor: usize, phase: usize) -> f32 {
        taps.iter().skip(phase).step_by(factor).sum()
    }

    #[test]
    fn interpolation_branches_have_unity_gain() {
        for phase in 0..2 {
            assert!((branch_sum(&AUDIO_LOWPASS_32, 2, phase) - 1.0).abs() < 1e-5);
            assert!((branch_sum(&HALF_BAND_16, 2, phase) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn hilbert_is_antisymmetric() {
        for k in 0..HILBERT_31.len() {
            assert_eq!(HILBERT_31[k], -HILBERT_31[HILBERT_31.len() - 1 - k]);
        }
        assert_eq!(HILBERT_31[HILBERT_DELAY], 0.0);
        assert_eq!(DELAY_31.iter().sum::<f32>(), 1.0);
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use sdrbb_core::hardware::{PCM_BLOCK_LEN, PCM_SAMPLE_RATE};
use sdrbb_core::{ParamError, ParamResult};
use tracing::warn;

use super::{by_block, IqUpconverter, FM_AMPLITUDE, PCM_FULL_SCALE};
use crate::filter::InterpolatorCascade;
use crate::nco::Nco;

pub const DEFAULT_DEVIATION_HZ: f32 = 70_000.0;
pub const MAX_DEVIATION_HZ: f32 = 224_000.0;

/// 32x audio pre-interpolation ahead of the oscillator.
const PRE_STAGES: usize = 5;
/// 8x from the oscillator rate to the device rate.
const POST_STAGES: usize = 3;
const PRE_FACTOR: usize = 1 << PRE_STAGES;
/// Rate the oscillator runs at (256 kS/s).
pub const OSCILLATOR_RATE: u32 = PCM_SAMPLE_RATE * PRE_FACTOR as u32;

pub(super) fn check_deviation(hz: f32) -> ParamResult {
    if hz > 0.0 && hz <= MAX_DEVIATION_HZ {
        Ok(())
    } else {
        Err(ParamError::out_of_range(
            "wbfm_deviation_hz",
            hz as f64,
            "0 < x <= 224000",
        ))
    }
}

/// Wideband FM.
///
/// PCM is raised to 256 kS/s before the oscillator so that large deviations
/// stay phase continuous; sin/cos come from the lookup table.
pub struct WbfmModulator {
    deviation_hz: f32,
    nco: Nco,
    pre: InterpolatorCascade,
    audio: Vec<f32>,
    i: Vec<f32>,
    q: Vec<f32>,
    up: IqUpconverter,
}

impl WbfmModulator {
    pub fn new() -> Self {
        let len = PCM_BLOCK_LEN * PRE_FACTOR;
        Self {
            deviation_hz: DEFAULT_DEVIATION_HZ,
            nco: Nco::new(OSCILLATOR_RATE as f64),
            pre: InterpolatorCascade::audio(PRE_STAGES, PCM_BLOCK_LEN),
            audio: vec![0.0; len],
            i: Vec::with_capacity(len),
            q: Vec::with_capacity(len),
            up: IqUpconverter::half_band(POST_STAGES, len),
        }
    }

    pub fn deviation(&self) -> f32 {
        self.deviation_hz
    }

    pub fn set_deviation(&mut self, hz: f32) -> ParamResult {
        check_deviation(hz).inspect_err(|e| warn!("WBFM: {}", e))?;
        self.deviation_hz = hz;
        Ok(())
    }

    /// Modulate `pcm` into `out` block by block. Returns bytes written.
    pub fn accept_data(&mut self, pcm: &[i16], out: &mut [u8]) -> usize {
        by_block(pcm, out, |chunk, dst| self.modulate_block(chunk, dst))
    }

    fn modulate_block(&mut self, pcm: &[i16], out: &mut [u8]) -> usize {
        let n = pcm.len().min(PCM_BLOCK_LEN);
        let mut pcm_f = [0.0f32; PCM_BLOCK_LEN];
        for (dst, &x) in pcm_f.iter_mut().zip(&pcm[..n]) {
            *dst = x as f32;
        }
        let produced = self.pre.process(&pcm_f[..n], &mut self.audio);

        self.i.clear();
        self.q.clear();
        for &x in &self.audio[..produced] {
            let hz = x / PCM_FULL_SCALE * self.deviation_hz;
            self.nco.set_frequency(hz as f64);
            let s = self.nco.run_lut();
            self.i.push((s.re * FM_AMPLITUDE) as i16 as f32);
            self.q.push((s.im * FM_AMPLITUDE) as i16 as f32);
        }
        debug_assert_eq!(self.up.factor() * PRE_FACTOR, 256);
        self.up.run(&self.i, &self.q, out)
    }

    pub fn reset(&mut self) {
        self.nco.reset();
        self.pre.reset();
        self.up.reset();
    }
}

impl Default for WbfmModulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulate::test_util;

    #[test]
    fn deviation_bounds() {
        let mut m = WbfmModulator::new();
        assert_eq!(m.deviation(), 70_000.0);
        assert!(m.set_deviation(224_000.0).is_ok());
        assert!(m.set_deviation(224_001.0).is_err());
        assert!(m.set_deviation(0.0).is_err());
        assert_eq!(m.deviation(), 224_000.0);
    }

    #[test]
    fn oscillator_runs_at_intermediate_rate() {
        assert_eq!(OSCILLATOR_RATE, 256_000);
    }

    #[test]
    fn produces_full_transfer_with_constant_envelope() {
        let mut m = WbfmModulator::new();
        let mut out = vec![0u8; PCM_BLOCK_LEN * 256 * 2];
        for block in 0..3 {
            let pcm = test_util::tone(1_000.0, 6_000.0, PCM_BLOCK_LEN, block * PCM_BLOCK_LEN);
            assert_eq!(m.accept_data(&pcm, &mut out), out.len());
        }
        for s in test_util::samples(&out).iter().step_by(677) {
            let mag = s.norm();
            assert!((mag - 93.75).abs() < 5.0, "envelope {}", mag);
        }
    }

    #[test]
    fn positive_input_raises_frequency() {
        let mut m = WbfmModulator::new();
        m.set_deviation(32_000.0).unwrap();
        let pcm = vec![16_384i16; PCM_BLOCK_LEN];
        let mut out = vec![0u8; PCM_BLOCK_LEN * 256 * 2];
        m.accept_data(&pcm, &mut out);
        m.accept_data(&pcm, &mut out);
        // 16 kHz at 2.048 MS/s: the phase advances by 2 pi / 128 per sample.
        let s = test_util::samples(&out);
        let mut sum = 0.0f32;
        for w in s[s.len() - 4096..].windows(2) {
            sum += (w[1] * w[0].conj()).arg();
        }
        let mean = sum / 4095.0;
        let expected = std::f32::consts::TAU / 128.0;
        assert!((mean - expected).abs() < expected * 0.1, "mean step {}", mean);
    }

    #[test]
    fn input_is_not_truncated_to_one_block() {
        let mut m = WbfmModulator::new();
        let pcm = test_util::tone(1_000.0, 6_000.0, PCM_BLOCK_LEN * 2 + 100, 0);
        let mut out = vec![0u8; (PCM_BLOCK_LEN * 2 + 100) * 256 * 2];
        assert_eq!(m.accept_data(&pcm, &mut out), out.len());
        let tail = &out[PCM_BLOCK_LEN * 2 * 256 * 2..];
        assert!(tail.iter().any(|&b| b != 0));
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use sdrbb_core::hardware::{PCM_BLOCK_LEN, PCM_SAMPLE_RATE};
use sdrbb_core::{ParamError, ParamResult};
use tracing::warn;

use super::{by_block, IqUpconverter, FM_AMPLITUDE, NARROWBAND_STAGES, PCM_FULL_SCALE};
use crate::nco::Nco;

pub const DEFAULT_DEVIATION_HZ: f32 = 3_500.0;
/// Exclusive upper bound: half the PCM rate.
pub const MAX_DEVIATION_HZ: f32 = PCM_SAMPLE_RATE as f32 / 2.0;

pub(super) fn check_deviation(hz: f32) -> ParamResult {
    if hz > 0.0 && hz < MAX_DEVIATION_HZ {
        Ok(())
    } else {
        Err(ParamError::out_of_range(
            "fm_deviation_hz",
            hz as f64,
            "0 < x < 4000",
        ))
    }
}

/// Narrowband FM: the NCO runs at the PCM rate, then 256x interpolation.
pub struct FmModulator {
    deviation_hz: f32,
    nco: Nco,
    i: Vec<f32>,
    q: Vec<f32>,
    up: IqUpconverter,
}

impl FmModulator {
    pub fn new() -> Self {
        Self {
            deviation_hz: DEFAULT_DEVIATION_HZ,
            nco: Nco::new(PCM_SAMPLE_RATE as f64),
            i: Vec::with_capacity(PCM_BLOCK_LEN),
            q: Vec::with_capacity(PCM_BLOCK_LEN),
            up: IqUpconverter::audio(NARROWBAND_STAGES, PCM_BLOCK_LEN),
        }
    }

    pub fn deviation(&self) -> f32 {
        self.deviation_hz
    }

    pub fn set_deviation(&mut self, hz: f32) -> ParamResult {
        check_deviation(hz).inspect_err(|e| warn!("FM: {}", e))?;
        self.deviation_hz = hz;
        Ok(())
    }

    /// Modulate `pcm` into `out` block by block. Returns bytes written.
    pub fn accept_data(&mut self, pcm: &[i16], out: &mut [u8]) -> usize {
        by_block(pcm, out, |chunk, dst| self.modulate_block(chunk, dst))
    }

    fn modulate_block(&mut self, pcm: &[i16], out: &mut [u8]) -> usize {
        self.i.clear();
        self.q.clear();
        for &x in pcm {
            let hz = x as f32 / PCM_FULL_SCALE * self.deviation_hz;
            self.nco.set_frequency(hz as f64);
            let s = self.nco.run();
            self.i.push((s.re * FM_AMPLITUDE) as i16 as f32);
            self.q.push((s.im * FM_AMPLITUDE) as i16 as f32);
        }
        self.up.run(&self.i, &self.q, out)
    }

    pub fn reset(&mut self) {
        self.nco.reset();
        self.up.reset();
    }
}

impl Default for FmModulator {
    fn default() -> Self {
        Self::new()
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use sdrbb_core::hardware::PCM_BLOCK_LEN;
use sdrbb_core::{ParamError, ParamResult};
use tracing::warn;

use super::{by_block, IqUpconverter, NARROWBAND_STAGES};

pub const DEFAULT_MODULATION_INDEX: f32 = 0.8;

/// Unmodulated carrier level added to every sample.
const CARRIER_OFFSET: f32 = 65_536.0;
/// Divisor keeping carrier plus peak modulation inside `i16`.
const HEADROOM_DIVISOR: f32 = 4.0;

pub(super) fn check_modulation_index(index: f32) -> ParamResult {
    if (0.0..=1.0).contains(&index) {
        Ok(())
    } else {
        Err(ParamError::out_of_range(
            "am_modulation_index",
            index as f64,
            "0 <= x <= 1",
        ))
    }
}

/// Large-carrier AM.
///
/// The same positive value is written to I and Q, so the carrier sits at a
/// fixed phase of +45 degrees, measured as the angle of `I + jQ`, with a
/// sqrt(2) amplitude gain. Receivers that take the angle of `I - jQ` see
/// -45 degrees. Only the envelope carries the audio.
pub struct AmModulator {
    index: f32,
    baseband: Vec<f32>,
    up: IqUpconverter,
}

impl AmModulator {
    pub fn new() -> Self {
        Self {
            index: DEFAULT_MODULATION_INDEX,
            baseband: Vec::with_capacity(PCM_BLOCK_LEN),
            up: IqUpconverter::audio(NARROWBAND_STAGES, PCM_BLOCK_LEN),
        }
    }

    pub fn modulation_index(&self) -> f32 {
        self.index
    }

    /// Accepts `[0, 1]`; anything else keeps the current index.
    pub fn set_modulation_index(&mut self, index: f32) -> ParamResult {
        check_modulation_index(index).inspect_err(|e| warn!("AM: {}", e))?;
        self.index = index;
        Ok(())
    }

    /// Working-width baseband value for one PCM sample.
    pub fn modulate_sample(&self, x: i16) -> i16 {
        ((x as f32 * self.index + CARRIER_OFFSET) / HEADROOM_DIVISOR) as i16
    }

    /// Modulate `pcm` into `out` block by block. Returns bytes written.
    pub fn accept_data(&mut self, pcm: &[i16], out: &mut [u8]) -> usize {
        by_block(pcm, out, |chunk, dst| self.modulate_block(chunk, dst))
    }

    fn modulate_block(&mut self, pcm: &[i16], out: &mut [u8]) -> usize {
        self.baseband.clear();
        for &x in pcm {
            let v = self.modulate_sample(x);
            self.baseband.push(v as f32);
        }
        self.up.run_mirrored(&self.baseband, out)
    }

    pub fn reset(&mut self) {
        self.up.reset();
    }
}

impl Default for AmModulator {
    fn default() -> Self {
        Self::new()
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use sdrbb_core::hardware::PCM_BLOCK_LEN;

use super::{by_block, IqUpconverter, NARROWBAND_STAGES};
use crate::filter::coeffs::{DELAY_31, HILBERT_31};
use crate::filter::PolyphaseFilterBank;

/// Input scaling ahead of the phasing network.
const INPUT_SCALE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sideband {
    Lower,
    Upper,
}

/// Phasing-method SSB.
///
/// A delay line and a Hilbert transformer with equal group delay feed I
/// and Q. With the transformer's `+j` response the pair is lower sideband;
/// negating Q selects the upper sideband.
pub struct SsbModulator {
    sideband: Sideband,
    delay: PolyphaseFilterBank,
    hilbert: PolyphaseFilterBank,
    i: Vec<f32>,
    q: Vec<f32>,
    up: IqUpconverter,
}

impl SsbModulator {
    pub fn new(sideband: Sideband) -> Self {
        Self {
            sideband,
            delay: PolyphaseFilterBank::table_interpolator(&DELAY_31, 1),
            hilbert: PolyphaseFilterBank::table_interpolator(&HILBERT_31, 1),
            i: Vec::with_capacity(PCM_BLOCK_LEN),
            q: Vec::with_capacity(PCM_BLOCK_LEN),
            up: IqUpconverter::audio(NARROWBAND_STAGES, PCM_BLOCK_LEN),
        }
    }

    pub fn sideband(&self) -> Sideband {
        self.sideband
    }

    pub fn set_lsb_modulation_mode(&mut self) {
        self.sideband = Sideband::Lower;
    }

    pub fn set_usb_modulation_mode(&mut self) {
        self.sideband = Sideband::Upper;
    }

    /// Modulate `pcm` into `out` block by block. Returns bytes written.
    pub fn accept_data(&mut self, pcm: &[i16], out: &mut [u8]) -> usize {
        by_block(pcm, out, |chunk, dst| self.modulate_block(chunk, dst))
    }

    fn modulate_block(&mut self, pcm: &[i16], out: &mut [u8]) -> usize {
        let sign = match self.sideband {
            Sideband::Lower => 1.0,
            Sideband::Upper => -1.0,
        };
        self.i.clear();
        self.q.clear();
        let mut d = [0.0f32; 1];
        let mut h = [0.0f32; 1];
        for &x in pcm {
            let s = x as f32 * INPUT_SCALE;
            self.delay.interpolate(s, &mut d);
            self.hilbert.interpolate(s, &mut h);
            self.i.push(d[0] as i16 as f32);
            self.q.push((sign * h[0]) as i16 as f32);
        }
        self.up.run(&self.i, &self.q, out)
    }

    pub fn reset(&mut self) {
        self.delay.reset();
        self.hilbert.reset();
        self.up.reset();
    }
}

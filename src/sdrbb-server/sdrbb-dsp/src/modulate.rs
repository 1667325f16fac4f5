// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Transmit modulators: PCM in, interleaved signed 8-bit I/Q at device rate out.

mod am;
mod fm;
mod ssb;
mod wbfm;

pub use am::AmModulator;
pub use fm::FmModulator;
pub use ssb::{Sideband, SsbModulator};
pub use wbfm::WbfmModulator;

use serde::{Deserialize, Serialize};
use sdrbb_core::hardware::{INTERPOLATION_FACTOR, PCM_BLOCK_LEN};
use sdrbb_core::{ModulationMode, ParamResult};

use crate::filter::InterpolatorCascade;
use crate::iq::pack_iq;

/// Cascade stages for the 256x narrowband paths.
pub const NARROWBAND_STAGES: usize = 8;

/// Peak working amplitude of constant-envelope modulators.
///
/// Leaves headroom below `i16::MAX` for filter overshoot.
pub const FM_AMPLITUDE: f32 = 24_000.0;

/// Full-scale PCM value used to normalise samples to [-1, 1).
pub(crate) const PCM_FULL_SCALE: f32 = 32_768.0;

/// Output bytes for one full PCM block.
pub(crate) const BLOCK_OUTPUT_BYTES: usize = PCM_BLOCK_LEN * INTERPOLATION_FACTOR * 2;

/// Hand `pcm` to `block` at most one PCM block at a time, each run with its
/// own slice of `out`. Input beyond the room left in `out` is not consumed.
pub(crate) fn by_block(
    pcm: &[i16],
    out: &mut [u8],
    mut block: impl FnMut(&[i16], &mut [u8]) -> usize,
) -> usize {
    pcm.chunks(PCM_BLOCK_LEN)
        .zip(out.chunks_mut(BLOCK_OUTPUT_BYTES))
        .map(|(chunk, dst)| block(chunk, dst))
        .sum()
}

/// Runtime parameters shared by all modulators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulatorSettings {
    pub am_modulation_index: f32,
    pub fm_deviation_hz: f32,
    pub wbfm_deviation_hz: f32,
}

impl Default for ModulatorSettings {
    fn default() -> Self {
        Self {
            am_modulation_index: am::DEFAULT_MODULATION_INDEX,
            fm_deviation_hz: fm::DEFAULT_DEVIATION_HZ,
            wbfm_deviation_hz: wbfm::DEFAULT_DEVIATION_HZ,
        }
    }
}

impl ModulatorSettings {
    /// Check every field against the range its modulator accepts.
    pub fn validate(&self) -> ParamResult {
        am::check_modulation_index(self.am_modulation_index)?;
        fm::check_deviation(self.fm_deviation_hz)?;
        wbfm::check_deviation(self.wbfm_deviation_hz)?;
        Ok(())
    }
}

/// Pair of interpolation cascades taking baseband I/Q to the device rate.
pub(crate) struct IqUpconverter {
    i: InterpolatorCascade,
    q: InterpolatorCascade,
    i_out: Vec<f32>,
    q_out: Vec<f32>,
}

impl IqUpconverter {
    pub(crate) fn audio(stages: usize, max_input: usize) -> Self {
        Self::from_cascades(
            InterpolatorCascade::audio(stages, max_input),
            InterpolatorCascade::audio(stages, max_input),
            max_input,
        )
    }

    pub(crate) fn half_band(stages: usize, max_input: usize) -> Self {
        Self::from_cascades(
            InterpolatorCascade::half_band(stages, max_input),
            InterpolatorCascade::half_band(stages, max_input),
            max_input,
        )
    }

    fn from_cascades(i: InterpolatorCascade, q: InterpolatorCascade, max_input: usize) -> Self {
        let len = max_input * i.factor();
        Self {
            i,
            q,
            i_out: vec![0.0; len],
            q_out: vec![0.0; len],
        }
    }

    pub(crate) fn factor(&self) -> usize {
        self.i.factor()
    }

    /// Interpolate both channels and pack them into `out`.
    pub(crate) fn run(&mut self, i: &[f32], q: &[f32], out: &mut [u8]) -> usize {
        let n = self.i.process(i, &mut self.i_out);
        self.q.process(q, &mut self.q_out);
        pack_iq(&self.i_out[..n], &self.q_out[..n], out)
    }

    /// Interpolate one channel and write it to both I and Q.
    pub(crate) fn run_mirrored(&mut self, x: &[f32], out: &mut [u8]) -> usize {
        let n = self.i.process(x, &mut self.i_out);
        pack_iq(&self.i_out[..n], &self.i_out[..n], out)
    }

    pub(crate) fn reset(&mut self) {
        self.i.reset();
        self.q.reset();
    }
}

/// The active transmit modulator.
pub enum Modulator {
    Am(AmModulator),
    Fm(FmModulator),
    Wbfm(WbfmModulator),
    Ssb(SsbModulator),
}

impl Modulator {
    /// Build the modulator for `mode`, or `None` for [`ModulationMode::None`].
    ///
    /// Settings outside their valid range are logged and the default is kept.
    pub fn for_mode(mode: ModulationMode, settings: &ModulatorSettings) -> Option<Self> {
        let mut modulator = match mode {
            ModulationMode::None => return None,
            ModulationMode::Am => Modulator::Am(AmModulator::new()),
            ModulationMode::Fm => Modulator::Fm(FmModulator::new()),
            ModulationMode::Wbfm => Modulator::Wbfm(WbfmModulator::new()),
            ModulationMode::Lsb => Modulator::Ssb(SsbModulator::new(Sideband::Lower)),
            ModulationMode::Usb => Modulator::Ssb(SsbModulator::new(Sideband::Upper)),
        };
        let _ = modulator.apply_settings(settings);
        Some(modulator)
    }

    /// Apply the parameter belonging to this modulator; the others are ignored.
    pub fn apply_settings(&mut self, settings: &ModulatorSettings) -> ParamResult {
        match self {
            Modulator::Am(m) => m.set_modulation_index(settings.am_modulation_index),
            Modulator::Fm(m) => m.set_deviation(settings.fm_deviation_hz),
            Modulator::Wbfm(m) => m.set_deviation(settings.wbfm_deviation_hz),
            Modulator::Ssb(_) => Ok(()),
        }
    }

    pub fn mode(&self) -> ModulationMode {
        match self {
            Modulator::Am(_) => ModulationMode::Am,
            Modulator::Fm(_) => ModulationMode::Fm,
            Modulator::Wbfm(_) => ModulationMode::Wbfm,
            Modulator::Ssb(m) => match m.sideband() {
                Sideband::Lower => ModulationMode::Lsb,
                Sideband::Upper => ModulationMode::Usb,
            },
        }
    }

    /// Modulate `pcm` into `out`, returning the number of bytes written.
    ///
    /// Each PCM sample yields [`INTERPOLATION_FACTOR`] I/Q pairs.
    pub fn accept_data(&mut self, pcm: &[i16], out: &mut [u8]) -> usize {
        match self {
            Modulator::Am(m) => m.accept_data(pcm, out),
            Modulator::Fm(m) => m.accept_data(pcm, out),
            Modulator::Wbfm(m) => m.accept_data(pcm, out),
            Modulator::Ssb(m) => m.accept_data(pcm, out),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Modulator::Am(m) => m.reset(),
            Modulator::Fm(m) => m.reset(),
            Modulator::Wbfm(m) => m.reset(),
            Modulator::Ssb(m) => m.reset(),
        }
    }
}

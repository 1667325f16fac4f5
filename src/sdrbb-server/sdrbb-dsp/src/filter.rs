// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Polyphase FIR rate conversion and the cascades built from it.

pub mod coeffs;

use thiserror::Error;

use coeffs::{AUDIO_LOWPASS_32, HALF_BAND_16};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("prototype filter has no taps")]
    EmptyPrototype,
    #[error("conversion factor must be at least 1")]
    ZeroFactor,
    #[error("prototype length {taps} is not a multiple of factor {factor}")]
    LengthNotMultiple { taps: usize, factor: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Interpolate,
    Decimate,
}

/// FIR filter split into `factor` polyphase branches.
///
/// Branch `p` holds prototype taps `h[k * factor + p]`. Zero taps are
/// dropped from each branch, so half-band prototypes cost half the
/// multiplies of a dense filter.
pub struct PolyphaseFilterBank {
    direction: Direction,
    factor: usize,
    taps: usize,
    /// `(delay, coefficient)` per branch. The delay is in history samples.
    branches: Vec<Vec<(usize, f32)>>,
    history: Vec<f32>,
    /// Next write slot in `history`.
    pos: usize,
    /// Inputs accumulated towards the next decimated output.
    pending: usize,
}

impl PolyphaseFilterBank {
    /// Bank producing `factor` outputs per input.
    ///
    /// Feeding a unit impulse reproduces the prototype tap for tap.
    pub fn interpolator(prototype: &[f32], factor: usize) -> Result<Self, FilterError> {
        Self::validate(prototype, factor)?;
        Ok(Self::build(Direction::Interpolate, prototype, factor))
    }

    /// Bank producing one output per `factor` inputs.
    ///
    /// Taps are scaled by `1 / factor` so that a prototype designed for
    /// interpolation keeps unity passband gain.
    pub fn decimator(prototype: &[f32], factor: usize) -> Result<Self, FilterError> {
        Self::validate(prototype, factor)?;
        Ok(Self::build(Direction::Decimate, prototype, factor))
    }

    /// Interpolator over one of the compile-time checked tables in [`coeffs`].
    pub(crate) fn table_interpolator(prototype: &'static [f32], factor: usize) -> Self {
        debug_assert!(Self::validate(prototype, factor).is_ok());
        Self::build(Direction::Interpolate, prototype, factor)
    }

    pub(crate) fn table_decimator(prototype: &'static [f32], factor: usize) -> Self {
        debug_assert!(Self::validate(prototype, factor).is_ok());
        Self::build(Direction::Decimate, prototype, factor)
    }

    fn build(direction: Direction, prototype: &[f32], factor: usize) -> Self {
        let taps_per_phase = prototype.len() / factor;
        // Interpolation convolves the shared q-sample history per branch;
        // decimation keeps all N inputs and walks every branch once.
        let (scale, history_len) = match direction {
            Direction::Interpolate => (1.0, taps_per_phase),
            Direction::Decimate => (1.0 / factor as f32, prototype.len()),
        };
        let branches = (0..factor)
            .map(|phase| {
                (0..taps_per_phase)
                    .map(|k| {
                        let delay = match direction {
                            Direction::Interpolate => k,
                            Direction::Decimate => k * factor + phase,
                        };
                        (delay, prototype[k * factor + phase] * scale)
                    })
                    .filter(|&(_, c)| c != 0.0)
                    .collect()
            })
            .collect();
        Self {
            direction,
            factor,
            taps: prototype.len(),
            branches,
            history: vec![0.0; history_len],
            pos: 0,
            pending: 0,
        }
    }

    fn validate(prototype: &[f32], factor: usize) -> Result<usize, FilterError> {
        if factor == 0 {
            return Err(FilterError::ZeroFactor);
        }
        if prototype.is_empty() {
            return Err(FilterError::EmptyPrototype);
        }
        if prototype.len() % factor != 0 {
            return Err(FilterError::LengthNotMultiple {
                taps: prototype.len(),
                factor,
            });
        }
        Ok(prototype.len() / factor)
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Prototype tap count.
    pub fn taps(&self) -> usize {
        self.taps
    }

    pub fn taps_per_phase(&self) -> usize {
        self.taps / self.factor
    }

    fn push(&mut self, x: f32) {
        self.history[self.pos] = x;
        self.pos = (self.pos + 1) % self.history.len();
    }

    /// History sample `delay` steps before the newest one.
    #[inline]
    fn past(&self, delay: usize) -> f32 {
        let n = self.history.len();
        self.history[(self.pos + n - 1 - delay) % n]
    }

    /// Consume one input sample and write `factor` outputs into `out`.
    ///
    /// `out` must be exactly `factor` samples long.
    pub fn interpolate(&mut self, x: f32, out: &mut [f32]) {
        debug_assert_eq!(self.direction, Direction::Interpolate);
        debug_assert_eq!(out.len(), self.factor);
        self.push(x);
        for (slot, branch) in out.iter_mut().zip(&self.branches) {
            *slot = branch.iter().map(|&(k, c)| c * self.past(k)).sum();
        }
    }

    /// Consume one input sample; every `factor`-th call yields an output.
    pub fn decimate(&mut self, x: f32) -> Option<f32> {
        debug_assert_eq!(self.direction, Direction::Decimate);
        self.push(x);
        self.pending += 1;
        if self.pending < self.factor {
            return None;
        }
        self.pending = 0;
        let acc: f32 = self
            .branches
            .iter()
            .flat_map(|branch| branch.iter())
            .map(|&(k, c)| c * self.past(k))
            .sum();
        Some(acc)
    }

    /// Clear history and phase without reallocating.
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.pos = 0;
        self.pending = 0;
    }
}

/// Chain of 2x interpolation stages.
///
/// Scratch buffers are sized at construction for `max_input` samples, so
/// [`InterpolatorCascade::process`] does not allocate for inputs up to that size.
pub struct InterpolatorCascade {
    stages: Vec<PolyphaseFilterBank>,
    factor: usize,
    ping: Vec<f32>,
    pong: Vec<f32>,
}

impl InterpolatorCascade {
    /// Audio-band cascade: lowpass first stage, half-band for the rest.
    pub fn audio(stages: usize, max_input: usize) -> Self {
        let stages = (0..stages)
            .map(|i| {
                let table: &'static [f32] = if i == 0 {
                    &AUDIO_LOWPASS_32
                } else {
                    &HALF_BAND_16
                };
                PolyphaseFilterBank::table_interpolator(table, 2)
            })
            .collect();
        Self::with_stages(stages, max_input)
    }

    /// Half-band stages only, for already band-limited input.
    pub fn half_band(stages: usize, max_input: usize) -> Self {
        let stages = (0..stages)
            .map(|_| PolyphaseFilterBank::table_interpolator(&HALF_BAND_16, 2))
            .collect();
        Self::with_stages(stages, max_input)
    }

    pub fn from_prototypes(
        prototypes: &[&[f32]],
        factor: usize,
        max_input: usize,
    ) -> Result<Self, FilterError> {
        let stages = prototypes
            .iter()
            .map(|p| PolyphaseFilterBank::interpolator(p, factor))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_stages(stages, max_input))
    }

    fn with_stages(stages: Vec<PolyphaseFilterBank>, max_input: usize) -> Self {
        let factor: usize = stages.iter().map(PolyphaseFilterBank::factor).product();
        let scratch = max_input * factor;
        Self {
            stages,
            factor,
            ping: Vec::with_capacity(scratch),
            pong: Vec::with_capacity(scratch),
        }
    }

    /// Overall interpolation factor.
    pub fn factor(&self) -> usize {
        self.factor
    }

    pub fn stages(&self) -> usize {
        self.stages.len()
    }

    /// Interpolate `input` into `output[..input.len() * factor]`.
    ///
    /// Returns the number of samples written.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        let produced = input.len() * self.factor;
        assert!(
            output.len() >= produced,
            "interpolator output holds {} samples, needs {}",
            output.len(),
            produced
        );
        let output = &mut output[..produced];

        let last = match self.stages.len() {
            0 => {
                output.copy_from_slice(input);
                return produced;
            }
            n => n - 1,
        };

        self.ping.clear();
        self.ping.extend_from_slice(input);
        for (idx, stage) in self.stages.iter_mut().enumerate() {
            let l = stage.factor();
            if idx == last {
                for (&x, chunk) in self.ping.iter().zip(output.chunks_exact_mut(l)) {
                    stage.interpolate(x, chunk);
                }
            } else {
                self.pong.resize(self.ping.len() * l, 0.0);
                for (&x, chunk) in self.ping.iter().zip(self.pong.chunks_exact_mut(l)) {
                    stage.interpolate(x, chunk);
                }
                std::mem::swap(&mut self.ping, &mut self.pong);
            }
        }
        produced
    }

    pub fn reset(&mut self) {
        self.stages.iter_mut().for_each(PolyphaseFilterBank::reset);
    }
}

/// Chain of 2x half-band decimation stages.
pub struct DecimatorCascade {
    stages: Vec<PolyphaseFilterBank>,
    factor: usize,
}

impl DecimatorCascade {
    pub fn half_band(stages: usize) -> Self {
        let stages: Vec<_> = (0..stages)
            .map(|_| PolyphaseFilterBank::table_decimator(&HALF_BAND_16, 2))
            .collect();
        let factor = stages.iter().map(PolyphaseFilterBank::factor).product();
        Self { stages, factor }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Push one sample through every stage.
    pub fn push(&mut self, x: f32) -> Option<f32> {
        let mut v = x;
        for stage in &mut self.stages {
            v = stage.decimate(v)?;
        }
        Some(v)
    }

    pub fn reset(&mut self) {
        self.stages.iter_mut().for_each(PolyphaseFilterBank::reset);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx_eq(a: f32, b: f32, tol: f32, label: &str) {
        assert!(
            (a - b).abs() <= tol,
            "{}: expected {} ~ {} (tol {})",
            label,
            a,
            b,
            tol
        );
    }

    #[test]
    fn rejects_factor_not_dividing_length() {
        let err = PolyphaseFilterBank::interpolator(&[1.0; 7], 2).err();
        assert_eq!(err, Some(FilterError::LengthNotMultiple { taps: 7, factor: 2 }));
        assert_eq!(
            PolyphaseFilterBank::decimator(&[1.0; 4], 0).err(),
            Some(FilterError::ZeroFactor)
        );
        assert_eq!(
            PolyphaseFilterBank::interpolator(&[], 1).err(),
            Some(FilterError::EmptyPrototype)
        );
    }

    #[test]
    fn impulse_reproduces_prototype() {
        let proto = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
        let mut bank = PolyphaseFilterBank::interpolator(&proto, 2).unwrap();
        assert_eq!(bank.taps_per_phase(), 4);

        let mut out = Vec::new();
        let mut pair = [0.0; 2];
        for n in 0..4 {
            bank.interpolate(if n == 0 { 1.0 } else { 0.0 }, &mut pair);
            out.extend_from_slice(&pair);
        }
        assert_eq!(out, proto);
    }

    #[test]
    fn impulse_reproduces_prototype_factor_four() {
        let proto: Vec<f32> = (1..=12).map(|i| i as f32).collect();
        let mut bank = PolyphaseFilterBank::interpolator(&proto, 4).unwrap();
        let mut out = Vec::new();
        let mut quad = [0.0; 4];
        for n in 0..3 {
            bank.interpolate(if n == 0 { 1.0 } else { 0.0 }, &mut quad);
            out.extend_from_slice(&quad);
        }
        assert_eq!(out, proto);
    }

    #[test]
    fn decimator_rate_and_impulse_response() {
        let proto = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
        let mut bank = PolyphaseFilterBank::decimator(&proto, 2).unwrap();
        let outputs: Vec<f32> = (0..8)
            .filter_map(|n| bank.decimate(if n == 0 { 1.0 } else { 0.0 }))
            .collect();
        // Every second sample of the scaled prototype, starting at h[1].
        assert_eq!(outputs.len(), 4);
        for (i, &y) in outputs.iter().enumerate() {
            assert_approx_eq(y, proto[2 * i + 1] / 2.0, 1e-7, "decimated impulse");
        }
    }

    #[test]
    fn rate_invariant_holds_for_arbitrary_lengths() {
        for &len in &[0usize, 1, 7, 64, 513] {
            let mut up = PolyphaseFilterBank::interpolator(&HALF_BAND_16, 2).unwrap();
            let mut out = [0.0; 2];
            let mut produced = 0;
            for i in 0..len {
                up.interpolate(i as f32, &mut out);
                produced += out.len();
            }
            assert_eq!(produced, len * 2);

            let mut down = PolyphaseFilterBank::decimator(&AUDIO_LOWPASS_32, 4).unwrap();
            let count = (0..len).filter_map(|i| down.decimate(i as f32)).count();
            assert_eq!(count, len / 4);
        }
    }

    #[test]
    fn reset_clears_history() {
        let mut bank = PolyphaseFilterBank::interpolator(&AUDIO_LOWPASS_32, 2).unwrap();
        let mut out = [0.0; 2];
        for _ in 0..20 {
            bank.interpolate(1000.0, &mut out);
        }
        bank.reset();
        bank.interpolate(0.0, &mut out);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn half_band_branch_is_sparse() {
        let bank = PolyphaseFilterBank::interpolator(&HALF_BAND_16, 2).unwrap();
        assert_eq!(bank.branches[0].len(), 8);
        assert_eq!(bank.branches[1].len(), 1);
    }

    #[test]
    fn audio_cascade_preserves_dc() {
        let mut cascade = InterpolatorCascade::audio(8, 64);
        assert_eq!(cascade.factor(), 256);
        let input = [1000.0f32; 64];
        let mut output = vec![0.0; 64 * 256];
        for _ in 0..4 {
            assert_eq!(cascade.process(&input, &mut output), 64 * 256);
        }
        for &y in output.iter().step_by(97) {
            assert_approx_eq(y, 1000.0, 0.5, "settled DC");
        }
    }

    #[test]
    fn decimator_cascade_preserves_dc() {
        let mut cascade = DecimatorCascade::half_band(3);
        assert_eq!(cascade.factor(), 8);
        let mut last = 0.0;
        let mut count = 0;
        for _ in 0..800 {
            if let Some(y) = cascade.push(0.5) {
                last = y;
                count += 1;
            }
        }
        assert_eq!(count, 100);
        assert_approx_eq(last, 0.5, 1e-4, "decimated DC");
    }

    #[test]
    fn cascade_from_invalid_prototype_fails() {
        let odd: &[f32] = &[0.5, 1.0, 0.5];
        let err = InterpolatorCascade::from_prototypes(&[&HALF_BAND_16[..], odd], 2, 8).err();
        assert_eq!(err, Some(FilterError::LengthNotMultiple { taps: 3, factor: 2 }));
    }

    #[test]
    fn empty_cascade_copies_input() {
        let mut cascade = InterpolatorCascade::half_band(0, 4);
        let mut out = [0.0; 4];
        assert_eq!(cascade.process(&[1.0, 2.0, 3.0, 4.0], &mut out), 4);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }
}

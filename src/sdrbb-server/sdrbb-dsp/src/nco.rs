// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Numerically controlled oscillator.

use std::f64::consts::{PI, TAU};
use std::sync::OnceLock;

use num_complex::Complex;

/// Entries in the sine/cosine lookup table (one full period).
pub const LUT_SIZE: usize = 16_384;

/// Beyond this many periods the wrap loops fall back to a single remainder.
const WRAP_LOOP_LIMIT: f64 = 64.0 * TAU;

/// Wrap `phase` into `(-pi, pi]`.
pub fn wrap_phase(mut phase: f64) -> f64 {
    if !phase.is_finite() {
        return 0.0;
    }
    if phase.abs() > WRAP_LOOP_LIMIT {
        phase = phase.rem_euclid(TAU);
    }
    while phase > PI {
        phase -= TAU;
    }
    while phase <= -PI {
        phase += TAU;
    }
    phase
}

/// Phase-continuous accumulator: `phase += 2 pi f / fs` per step.
#[derive(Debug, Clone)]
pub struct PhaseAccumulator {
    sample_rate: f64,
    frequency: f64,
    step: f64,
    phase: f64,
}

impl PhaseAccumulator {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            frequency: 0.0,
            step: 0.0,
            phase: 0.0,
        }
    }

    /// Change the instantaneous frequency. The phase is kept.
    pub fn set_frequency(&mut self, hz: f64) {
        self.frequency = hz;
        self.step = TAU * hz / self.sample_rate;
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Advance by one sample and return the wrapped phase.
    pub fn advance(&mut self) -> f64 {
        self.phase = wrap_phase(self.phase + self.step);
        self.phase
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

struct SinCosTable {
    cos: Vec<f32>,
    sin: Vec<f32>,
}

fn table() -> &'static SinCosTable {
    static TABLE: OnceLock<SinCosTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        let phase_at = |i: usize| -PI + TAU * i as f64 / LUT_SIZE as f64;
        SinCosTable {
            cos: (0..LUT_SIZE).map(|i| phase_at(i).cos() as f32).collect(),
            sin: (0..LUT_SIZE).map(|i| phase_at(i).sin() as f32).collect(),
        }
    })
}

/// Table index for a wrapped phase, clamped for the `+pi` edge.
#[inline]
pub fn lut_index(phase: f64) -> usize {
    let pos = ((phase + PI) / TAU * LUT_SIZE as f64).round();
    if pos <= 0.0 {
        0
    } else {
        (pos as usize).min(LUT_SIZE - 1)
    }
}

/// Unit-amplitude complex oscillator.
#[derive(Debug, Clone)]
pub struct Nco {
    acc: PhaseAccumulator,
}

impl Nco {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            acc: PhaseAccumulator::new(sample_rate),
        }
    }

    pub fn set_frequency(&mut self, hz: f64) {
        self.acc.set_frequency(hz);
    }

    pub fn phase(&self) -> f64 {
        self.acc.phase()
    }

    /// Next sample using direct trigonometry.
    pub fn run(&mut self) -> Complex<f32> {
        let phase = self.acc.advance();
        Complex::new(phase.cos() as f32, phase.sin() as f32)
    }

    /// Next sample from the lookup table.
    pub fn run_lut(&mut self) -> Complex<f32> {
        let idx = lut_index(self.acc.advance());
        let t = table();
        Complex::new(t.cos[idx], t.sin[idx])
    }

    pub fn reset(&mut self) {
        self.acc.reset();
    }
}

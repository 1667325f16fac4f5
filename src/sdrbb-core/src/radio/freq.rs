// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::{Deserialize, Serialize};

/// Frequency wrapper (Hz).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Freq {
    pub hz: u64,
}

impl Freq {
    #[must_use]
    pub fn new(hz: u64) -> Self {
        Self { hz }
    }

    /// Apply a crystal correction in parts per million.
    ///
    /// The same warp is applied to tuning and sample-rate commands so that
    /// both stay consistent with the reference oscillator of the device.
    #[must_use]
    pub fn warped(&self, ppm: f64) -> Self {
        Self {
            hz: warp_hz(self.hz, ppm),
        }
    }

    pub fn as_mhz(&self) -> f64 {
        self.hz as f64 / 1e6
    }
}

impl std::fmt::Display for Freq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6} MHz", self.as_mhz())
    }
}

/// Scale `hz` by `1 + ppm / 1e6`, rounding to the nearest hertz.
pub fn warp_hz(hz: u64, ppm: f64) -> u64 {
    let scaled = (hz as f64 * (1.0 + ppm / 1e6)).round();
    if scaled <= 0.0 {
        0
    } else {
        scaled as u64
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Real-time baseband signal chain: multirate filters, oscillator,
//! modulators, the PCM ring, the transmit pipeline, the receive decimation
//! chain and the AGC.

pub mod agc;
pub mod filter;
pub mod iq;
pub mod modulate;
pub mod nco;
pub mod pipeline;
pub mod ring;
pub mod rx;
pub mod source;

pub use agc::{AgcSettings, AgcStatus, AutomaticGainControl};
pub use filter::{DecimatorCascade, FilterError, InterpolatorCascade, PolyphaseFilterBank};
pub use modulate::{Modulator, ModulatorSettings, Sideband};
pub use nco::{Nco, PhaseAccumulator};
pub use pipeline::{PipelineError, PipelineStats, StreamState, TxPipeline};
pub use ring::{PcmRing, PullKind, RingStats};
pub use rx::{MagnitudeTap, ReceiveChain};
pub use source::{PcmRead, PcmSource, ReaderPcmSource, SilenceSource, ToneSource};

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Contract between the baseband chain and an RF transceiver driver.
//!
//! Drivers own the streaming threads. The chain only registers transfer
//! callbacks and issues tuning/gain commands through [`Transceiver`].

use thiserror::Error;

use crate::radio::freq::Freq;

/// PCM input rate (samples per second).
pub const PCM_SAMPLE_RATE: u32 = 8_000;
/// Samples per PCM block moved through the ring buffer.
pub const PCM_BLOCK_LEN: usize = 512;
/// Ratio between the device sample rate and the PCM rate.
pub const INTERPOLATION_FACTOR: usize = 256;
/// Device IQ sample rate.
pub const DEVICE_SAMPLE_RATE: u32 = PCM_SAMPLE_RATE * INTERPOLATION_FACTOR as u32;
/// Size of one hardware transfer in bytes (interleaved signed 8-bit I/Q).
pub const TRANSFER_BUFFER_BYTES: usize = 262_144;
/// IQ pairs per hardware transfer.
pub const TRANSFER_IQ_PAIRS: usize = TRANSFER_BUFFER_BYTES / 2;

/// Front-end amplifier gain when enabled.
pub const AMP_GAIN_DB: u32 = 14;
pub const IF_GAIN_MAX_DB: u32 = 40;
pub const IF_GAIN_STEP_DB: u32 = 8;
pub const BASEBAND_GAIN_MAX_DB: u32 = 62;
pub const BASEBAND_GAIN_STEP_DB: u32 = 2;
pub const TX_IF_GAIN_MAX_DB: u32 = 47;

const _: () = assert!(PCM_BLOCK_LEN * INTERPOLATION_FACTOR == TRANSFER_IQ_PAIRS);

/// Value returned by a transfer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    Continue,
    Stop,
}

/// Fills one outgoing transfer buffer with interleaved I/Q bytes.
pub type TxCallback = Box<dyn FnMut(&mut [u8]) -> StreamControl + Send>;
/// Consumes one incoming transfer buffer of interleaved I/Q bytes.
pub type RxCallback = Box<dyn FnMut(&[u8]) -> StreamControl + Send>;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("{0} stream already running")]
    AlreadyStreaming(&'static str),
    #[error("{0} stream not running")]
    NotStreaming(&'static str),
    #[error("invalid {name}: {value}")]
    InvalidSetting { name: &'static str, value: String },
    #[error("device error: {0}")]
    Device(String),
}

pub type HardwareResult<T> = Result<T, HardwareError>;

/// Blocking control surface of an RF transceiver.
///
/// All methods take `&self`; implementations synchronise internally so a
/// driver handle can be shared between the transmit pipeline, the AGC and
/// the control task.
pub trait Transceiver: Send + Sync {
    fn name(&self) -> &str;

    fn start_receive(&self, callback: RxCallback) -> HardwareResult<()>;
    fn stop_receive(&self) -> HardwareResult<()>;
    fn start_transmit(&self, callback: TxCallback) -> HardwareResult<()>;
    fn stop_transmit(&self) -> HardwareResult<()>;

    fn set_frequency(&self, freq: Freq) -> HardwareResult<()>;
    fn set_sample_rate(&self, hz: u32) -> HardwareResult<()>;
    fn set_bandwidth(&self, hz: u32) -> HardwareResult<()>;

    /// Front-end amplifier, `AMP_GAIN_DB` when on.
    fn set_amp_enable(&self, enabled: bool) -> HardwareResult<()>;
    /// Receive IF (LNA) gain, 0..=40 dB in 8 dB steps.
    fn set_if_gain(&self, db: u32) -> HardwareResult<()>;
    /// Receive baseband (VGA) gain, 0..=62 dB in 2 dB steps.
    fn set_baseband_gain(&self, db: u32) -> HardwareResult<()>;
    /// Transmit IF gain, 0..=47 dB in 1 dB steps.
    fn set_tx_if_gain(&self, db: u32) -> HardwareResult<()>;
}

/// Round a gain request down to the nearest supported step.
///
/// Returns `None` when the request exceeds `max_db`.
pub fn quantize_gain(db: u32, step_db: u32, max_db: u32) -> Option<u32> {
    if db > max_db {
        return None;
    }
    Some(db - db % step_db.max(1))
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Receive decimation chain.
//!
//! Raw transfer bytes are converted to complex samples, decimated by a
//! cascade of half-band stages and published to subscribers. Each transfer
//! also yields one signal magnitude which is handed to the registered
//! listener (normally the AGC).

use std::sync::{Arc, Mutex, MutexGuard};

use num_complex::Complex;
use sdrbb_core::hardware::{RxCallback, StreamControl, DEVICE_SAMPLE_RATE};
use tokio::sync::broadcast;

use crate::filter::DecimatorCascade;
use crate::iq::unpack_iq;

/// Default half-band stages: 2.048 MS/s down to 8 kS/s.
pub const DEFAULT_DECIMATION_STAGES: usize = 8;
/// Upper bound of the magnitude handed to listeners.
pub const MAGNITUDE_MAX: f32 = 256.0;
/// Decimated blocks buffered per subscriber.
const IQ_CHANNEL_CAPACITY: usize = 64;

pub type MagnitudeListener = Box<dyn FnMut(f32) + Send>;

#[derive(Default)]
struct TapSlot {
    listener: Option<MagnitudeListener>,
    attached: bool,
    /// Bumped on every attach/detach.
    generation: u64,
}

/// Shared registration point for the magnitude listener.
///
/// Cloned handles refer to the same slot, so the listener can be attached
/// or detached after the chain has been moved into the driver callback.
/// The listener runs with the slot unlocked and may itself detach the tap.
#[derive(Clone, Default)]
pub struct MagnitudeTap {
    slot: Arc<Mutex<TapSlot>>,
}

impl MagnitudeTap {
    fn slot(&self) -> MutexGuard<'_, TapSlot> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register `listener`, replacing any previous one.
    pub fn attach(&self, listener: MagnitudeListener) {
        let mut slot = self.slot();
        slot.listener = Some(listener);
        slot.attached = true;
        slot.generation += 1;
    }

    /// Returns `false` if nothing was attached.
    pub fn detach(&self) -> bool {
        let mut slot = self.slot();
        slot.listener = None;
        slot.generation += 1;
        std::mem::replace(&mut slot.attached, false)
    }

    pub fn is_attached(&self) -> bool {
        self.slot().attached
    }

    fn notify(&self, magnitude: f32) {
        let (mut listener, generation) = {
            let mut slot = self.slot();
            match slot.listener.take() {
                Some(listener) => (listener, slot.generation),
                None => return,
            }
        };
        listener(magnitude);
        let mut slot = self.slot();
        if slot.generation == generation {
            slot.listener = Some(listener);
        }
    }
}

/// Mean `|I + jQ|` of a block, clamped to `[0, MAGNITUDE_MAX]`.
pub fn block_magnitude(samples: &[Complex<f32>]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s.norm()).sum();
    (sum / samples.len() as f32).clamp(0.0, MAGNITUDE_MAX)
}

pub struct ReceiveChain {
    i: DecimatorCascade,
    q: DecimatorCascade,
    block: Vec<Complex<f32>>,
    iq_tx: broadcast::Sender<Vec<Complex<f32>>>,
    tap: MagnitudeTap,
}

impl ReceiveChain {
    pub fn new(stages: usize) -> Self {
        let (iq_tx, _) = broadcast::channel(IQ_CHANNEL_CAPACITY);
        Self {
            i: DecimatorCascade::half_band(stages),
            q: DecimatorCascade::half_band(stages),
            block: Vec::new(),
            iq_tx,
            tap: MagnitudeTap::default(),
        }
    }

    pub fn decimation(&self) -> usize {
        self.i.factor()
    }

    pub fn output_rate(&self) -> u32 {
        DEVICE_SAMPLE_RATE / self.decimation() as u32
    }

    /// Receiver of decimated blocks, one per transfer.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<Complex<f32>>> {
        self.iq_tx.subscribe()
    }

    pub fn magnitude_tap(&self) -> MagnitudeTap {
        self.tap.clone()
    }

    /// Process one transfer buffer and return its magnitude.
    pub fn process(&mut self, bytes: &[u8]) -> f32 {
        self.block.clear();
        for s in unpack_iq(bytes) {
            if let (Some(i), Some(q)) = (self.i.push(s.re), self.q.push(s.im)) {
                self.block.push(Complex::new(i, q));
            }
        }

        let magnitude = block_magnitude(&self.block);
        self.tap.notify(magnitude);
        if self.iq_tx.receiver_count() > 0 {
            let _ = self.iq_tx.send(self.block.clone());
        }
        magnitude
    }

    pub fn reset(&mut self) {
        self.i.reset();
        self.q.reset();
    }

    /// Move the chain into a driver receive callback.
    pub fn into_rx_callback(mut self) -> RxCallback {
        Box::new(move |bytes: &[u8]| {
            self.process(bytes);
            StreamControl::Continue
        })
    }
}

impl Default for ReceiveChain {
    fn default() -> Self {
        Self::new(DEFAULT_DECIMATION_STAGES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdrbb_core::hardware::TRANSFER_BUFFER_BYTES;

    fn constant_transfer(i: i8, q: i8) -> Vec<u8> {
        [i as u8, q as u8].repeat(TRANSFER_BUFFER_BYTES / 2)
    }

    #[test]
    fn default_chain_reaches_pcm_rate() {
        let chain = ReceiveChain::default();
        assert_eq!(chain.decimation(), 256);
        assert_eq!(chain.output_rate(), 8_000);
    }

    #[test]
    fn magnitude_of_constant_input() {
        let mut chain = ReceiveChain::default();
        let buf = constant_transfer(30, -40);
        chain.process(&buf);
        let mag = chain.process(&buf);
        assert!((mag - 50.0).abs() < 0.5, "magnitude {}", mag);
    }

    #[test]
    fn silence_has_zero_magnitude() {
        let mut chain = ReceiveChain::new(4);
        assert_eq!(chain.process(&constant_transfer(0, 0)), 0.0);
    }

    #[test]
    fn block_magnitude_clamps() {
        assert_eq!(block_magnitude(&[]), 0.0);
        assert_eq!(block_magnitude(&[Complex::new(300.0, 0.0)]), MAGNITUDE_MAX);
        assert_eq!(block_magnitude(&[Complex::new(3.0, 4.0), Complex::new(0.0, 0.0)]), 2.5);
    }

    #[test]
    fn listener_sees_every_transfer_until_detached() {
        let mut chain = ReceiveChain::new(2);
        let tap = chain.magnitude_tap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tap.attach(Box::new(move |m| sink.lock().unwrap().push(m)));
        assert!(tap.is_attached());

        let buf = constant_transfer(10, 0);
        chain.process(&buf);
        chain.process(&buf);
        assert!(tap.detach());
        assert!(!tap.detach());
        chain.process(&buf);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn listener_may_detach_its_own_tap() {
        let mut chain = ReceiveChain::new(2);
        let tap = chain.magnitude_tap();
        let inner = tap.clone();
        let calls = Arc::new(Mutex::new(0));
        let count = Arc::clone(&calls);
        tap.attach(Box::new(move |_| {
            *count.lock().unwrap() += 1;
            assert!(inner.detach());
        }));

        let buf = constant_transfer(10, 0);
        chain.process(&buf);
        chain.process(&buf);
        assert!(!tap.is_attached());
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn reattach_during_callback_keeps_new_listener() {
        let mut chain = ReceiveChain::new(2);
        let tap = chain.magnitude_tap();
        let inner = tap.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tap.attach(Box::new(move |_| {
            let sink = Arc::clone(&sink);
            inner.attach(Box::new(move |_| sink.lock().unwrap().push("second")));
        }));

        let buf = constant_transfer(10, 0);
        chain.process(&buf);
        chain.process(&buf);
        assert!(tap.is_attached());
        assert_eq!(*seen.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn subscribers_receive_decimated_blocks() {
        let chain = ReceiveChain::default();
        let mut rx = chain.subscribe();
        let mut callback = chain.into_rx_callback();
        assert_eq!(callback(&constant_transfer(1, 1)), StreamControl::Continue);
        let block = rx.try_recv().unwrap();
        assert_eq!(block.len(), TRANSFER_BUFFER_BYTES / 2 / 256);
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Simulated transceiver for development and testing.
//!
//! Streams run on their own threads and invoke the transfer callbacks at
//! the cadence real hardware would, scaled by a speed factor. With loopback
//! enabled, the receive stream replays the most recent transmit buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use sdrbb_core::hardware::{
    quantize_gain, HardwareError, HardwareResult, RxCallback, StreamControl, Transceiver,
    TxCallback, BASEBAND_GAIN_MAX_DB, BASEBAND_GAIN_STEP_DB, DEVICE_SAMPLE_RATE, IF_GAIN_MAX_DB,
    IF_GAIN_STEP_DB, TRANSFER_BUFFER_BYTES, TX_IF_GAIN_MAX_DB,
};
use sdrbb_core::Freq;
use serde::Serialize;
use tracing::{debug, info};

/// Device settings as last applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SimSettings {
    pub frequency: Freq,
    pub sample_rate: u32,
    pub bandwidth: u32,
    pub amp_enabled: bool,
    pub if_gain_db: u32,
    pub baseband_gain_db: u32,
    pub tx_if_gain_db: u32,
    pub tx_transfers: u64,
    pub rx_transfers: u64,
}

struct SimState {
    frequency: Freq,
    sample_rate: u32,
    bandwidth: u32,
    amp_enabled: bool,
    if_gain_db: u32,
    baseband_gain_db: u32,
    tx_if_gain_db: u32,
}

struct Shared {
    state: Mutex<SimState>,
    last_tx: Mutex<Vec<u8>>,
    has_tx: AtomicBool,
    tx_transfers: AtomicU64,
    rx_transfers: AtomicU64,
}

struct StreamThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    fn join(self, name: &str) {
        self.stop.store(true, Ordering::Release);
        if self.handle.join().is_err() {
            tracing::error!("{} stream thread panicked", name);
        }
    }
}

pub struct SimTransceiver {
    shared: Arc<Shared>,
    loopback: bool,
    speed: f64,
    tx: Mutex<Option<StreamThread>>,
    rx: Mutex<Option<StreamThread>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn invalid(name: &'static str, value: impl ToString) -> HardwareError {
    HardwareError::InvalidSetting {
        name,
        value: value.to_string(),
    }
}

impl SimTransceiver {
    pub fn new(loopback: bool, speed: f64) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SimState {
                    frequency: Freq::new(0),
                    sample_rate: DEVICE_SAMPLE_RATE,
                    bandwidth: 0,
                    amp_enabled: false,
                    if_gain_db: 0,
                    baseband_gain_db: 0,
                    tx_if_gain_db: 0,
                }),
                last_tx: Mutex::new(vec![0; TRANSFER_BUFFER_BYTES]),
                has_tx: AtomicBool::new(false),
                tx_transfers: AtomicU64::new(0),
                rx_transfers: AtomicU64::new(0),
            }),
            loopback,
            speed,
            tx: Mutex::new(None),
            rx: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> SimSettings {
        let st = lock(&self.shared.state);
        SimSettings {
            frequency: st.frequency,
            sample_rate: st.sample_rate,
            bandwidth: st.bandwidth,
            amp_enabled: st.amp_enabled,
            if_gain_db: st.if_gain_db,
            baseband_gain_db: st.baseband_gain_db,
            tx_if_gain_db: st.tx_if_gain_db,
            tx_transfers: self.shared.tx_transfers.load(Ordering::Relaxed),
            rx_transfers: self.shared.rx_transfers.load(Ordering::Relaxed),
        }
    }

    /// Time between transfers at the current sample rate and speed.
    pub fn transfer_period(&self) -> Duration {
        let rate = lock(&self.shared.state).sample_rate.max(1) as f64;
        Duration::from_secs_f64((TRANSFER_BUFFER_BYTES / 2) as f64 / rate / self.speed)
    }

    fn spawn_stream<F>(&self, name: &str, mut step: F) -> HardwareResult<StreamThread>
    where
        F: FnMut() -> StreamControl + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let period = self.transfer_period();
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name(format!("sim-{}", name))
            .spawn(move || {
                let mut next = Instant::now();
                while !thread_stop.load(Ordering::Acquire) {
                    if step() == StreamControl::Stop {
                        debug!("Callback ended the stream");
                        break;
                    }
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            })
            .map_err(|e| HardwareError::Device(e.to_string()))?;
        Ok(StreamThread { stop, handle })
    }
}

impl Transceiver for SimTransceiver {
    fn name(&self) -> &str {
        "sim"
    }

    fn start_receive(&self, mut callback: RxCallback) -> HardwareResult<()> {
        let mut slot = lock(&self.rx);
        if slot.is_some() {
            return Err(HardwareError::AlreadyStreaming("receive"));
        }
        let shared = Arc::clone(&self.shared);
        let loopback = self.loopback;
        let mut buf = vec![0u8; TRANSFER_BUFFER_BYTES];
        *slot = Some(self.spawn_stream("rx", move || {
            if loopback && shared.has_tx.load(Ordering::Acquire) {
                buf.copy_from_slice(&lock(&shared.last_tx));
            } else {
                buf.fill(0);
            }
            shared.rx_transfers.fetch_add(1, Ordering::Relaxed);
            callback(&buf)
        })?);
        info!("Simulated receive stream started");
        Ok(())
    }

    fn stop_receive(&self) -> HardwareResult<()> {
        let thread = lock(&self.rx)
            .take()
            .ok_or(HardwareError::NotStreaming("receive"))?;
        thread.join("receive");
        info!("Simulated receive stream stopped");
        Ok(())
    }

    fn start_transmit(&self, mut callback: TxCallback) -> HardwareResult<()> {
        let mut slot = lock(&self.tx);
        if slot.is_some() {
            return Err(HardwareError::AlreadyStreaming("transmit"));
        }
        let shared = Arc::clone(&self.shared);
        let loopback = self.loopback;
        let mut buf = vec![0u8; TRANSFER_BUFFER_BYTES];
        *slot = Some(self.spawn_stream("tx", move || {
            let status = callback(&mut buf);
            if loopback {
                lock(&shared.last_tx).copy_from_slice(&buf);
                shared.has_tx.store(true, Ordering::Release);
            }
            shared.tx_transfers.fetch_add(1, Ordering::Relaxed);
            status
        })?);
        info!("Simulated transmit stream started");
        Ok(())
    }

    fn stop_transmit(&self) -> HardwareResult<()> {
        let thread = lock(&self.tx)
            .take()
            .ok_or(HardwareError::NotStreaming("transmit"))?;
        thread.join("transmit");
        info!("Simulated transmit stream stopped");
        Ok(())
    }

    fn set_frequency(&self, freq: Freq) -> HardwareResult<()> {
        lock(&self.shared.state).frequency = freq;
        debug!("Tuned to {}", freq);
        Ok(())
    }

    fn set_sample_rate(&self, hz: u32) -> HardwareResult<()> {
        if hz == 0 {
            return Err(invalid("sample rate", hz));
        }
        lock(&self.shared.state).sample_rate = hz;
        Ok(())
    }

    fn set_bandwidth(&self, hz: u32) -> HardwareResult<()> {
        lock(&self.shared.state).bandwidth = hz;
        Ok(())
    }

    fn set_amp_enable(&self, enabled: bool) -> HardwareResult<()> {
        lock(&self.shared.state).amp_enabled = enabled;
        Ok(())
    }

    fn set_if_gain(&self, db: u32) -> HardwareResult<()> {
        let db = quantize_gain(db, IF_GAIN_STEP_DB, IF_GAIN_MAX_DB)
            .ok_or_else(|| invalid("IF gain", db))?;
        lock(&self.shared.state).if_gain_db = db;
        Ok(())
    }

    fn set_baseband_gain(&self, db: u32) -> HardwareResult<()> {
        let db = quantize_gain(db, BASEBAND_GAIN_STEP_DB, BASEBAND_GAIN_MAX_DB)
            .ok_or_else(|| invalid("baseband gain", db))?;
        lock(&self.shared.state).baseband_gain_db = db;
        Ok(())
    }

    fn set_tx_if_gain(&self, db: u32) -> HardwareResult<()> {
        let db = quantize_gain(db, 1, TX_IF_GAIN_MAX_DB).ok_or_else(|| invalid("TX IF gain", db))?;
        lock(&self.shared.state).tx_if_gain_db = db;
        Ok(())
    }
}

impl Drop for SimTransceiver {
    fn drop(&mut self) {
        if let Some(thread) = lock(&self.tx).take() {
            thread.join("transmit");
        }
        if let Some(thread) = lock(&self.rx).take() {
            thread.join("receive");
        }
    }
}

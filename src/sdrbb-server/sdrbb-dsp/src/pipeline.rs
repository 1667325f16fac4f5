// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Transmit streaming pipeline.
//!
//! A background producer thread moves PCM blocks from a [`PcmSource`] into
//! the [`PcmRing`]. The hardware transmit callback pulls one block per
//! transfer, runs the active [`Modulator`] and returns the I/Q bytes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use sdrbb_core::hardware::{HardwareError, StreamControl, Transceiver, PCM_BLOCK_LEN};
use sdrbb_core::{ModulationMode, ParamResult};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::modulate::{Modulator, ModulatorSettings};
use crate::ring::{PcmBlock, PcmRing, RingStats};
use crate::source::{PcmRead, PcmSource};

/// Upper bound on one producer poll, so `stop` is observed promptly.
pub const PRODUCER_POLL_TIMEOUT: Duration = Duration::from_millis(5);
/// Back-off after a source read error.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transmit pipeline already running")]
    AlreadyRunning,
    #[error("failed to start transmit stream: {0}")]
    Hardware(#[from] HardwareError),
    #[error("failed to spawn producer thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub state: StreamState,
    pub mode: ModulationMode,
    pub source_exhausted: bool,
    #[serde(flatten)]
    pub ring: RingStats,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Consumer-side working set, only locked by the transfer callback and by
/// control calls that swap the modulator.
struct ModulatorSlot {
    modulator: Option<Modulator>,
    pcm: PcmBlock,
}

/// State shared between the control handle, the producer and the callback.
struct Shared {
    ring: PcmRing,
    running: AtomicBool,
    stop_producer: AtomicBool,
    exhausted: AtomicBool,
    slot: Mutex<ModulatorSlot>,
    settings: Mutex<ModulatorSettings>,
}

impl Shared {
    /// Fill one transfer buffer. Runs on the driver's streaming thread.
    fn fill_transfer(&self, out: &mut [u8]) {
        let mut guard = lock(&self.slot);
        let slot = &mut *guard;

        if !self.running.load(Ordering::Acquire) {
            slot.pcm.fill(0);
        } else if self.exhausted.load(Ordering::Acquire) {
            if !self.ring.pull_remaining(&mut slot.pcm) {
                slot.pcm.fill(0);
            }
        } else {
            self.ring.pull(&mut slot.pcm);
        }

        let written = match slot.modulator.as_mut() {
            Some(m) => m.accept_data(&slot.pcm, out),
            None => 0,
        };
        out[written..].fill(0);
    }
}

fn producer_loop(shared: Arc<Shared>, mut source: Box<dyn PcmSource>) {
    let mut block = [0i16; PCM_BLOCK_LEN];
    while !shared.stop_producer.load(Ordering::Acquire) {
        match source.read_block(&mut block, PRODUCER_POLL_TIMEOUT) {
            Ok(PcmRead::Filled(n)) => shared.ring.push(&block[..n]),
            Ok(PcmRead::Timeout) => {}
            Ok(PcmRead::EndOfStream) => {
                info!("PCM source exhausted");
                shared.exhausted.store(true, Ordering::Release);
                break;
            }
            Err(e) => {
                warn!("PCM source read error: {}; retrying", e);
                std::thread::sleep(READ_ERROR_BACKOFF);
            }
        }
    }
    debug!("PCM producer exiting");
}

/// Handle to the transmit pipeline.
///
/// The transmit stream is opened by the first [`TxPipeline::start`] and stays
/// open across `stop`/`start` cycles, carrying silence while idle, until
/// [`TxPipeline::shutdown`].
pub struct TxPipeline {
    hardware: Arc<dyn Transceiver>,
    shared: Arc<Shared>,
    producer: Mutex<Option<JoinHandle<()>>>,
    streaming: AtomicBool,
    mode: Mutex<ModulationMode>,
}

impl TxPipeline {
    /// Settings outside their valid range fall back to the defaults.
    pub fn new(
        hardware: Arc<dyn Transceiver>,
        mode: ModulationMode,
        settings: ModulatorSettings,
    ) -> Self {
        let settings = match settings.validate() {
            Ok(()) => settings,
            Err(e) => {
                warn!("Transmit: {}; using defaults", e);
                ModulatorSettings::default()
            }
        };
        let shared = Arc::new(Shared {
            ring: PcmRing::new(),
            running: AtomicBool::new(false),
            stop_producer: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            slot: Mutex::new(ModulatorSlot {
                modulator: Modulator::for_mode(mode, &settings),
                pcm: [0; PCM_BLOCK_LEN],
            }),
            settings: Mutex::new(settings),
        });
        Self {
            hardware,
            shared,
            producer: Mutex::new(None),
            streaming: AtomicBool::new(false),
            mode: Mutex::new(mode),
        }
    }

    pub fn state(&self) -> StreamState {
        if self.shared.running.load(Ordering::Acquire) {
            StreamState::Running
        } else {
            StreamState::Idle
        }
    }

    /// Start streaming from `source`. Idle -> Running.
    ///
    /// On error the pipeline stays Idle and the producer is not left behind.
    pub fn start(&self, source: Box<dyn PcmSource>) -> Result<(), PipelineError> {
        let mut producer = lock(&self.producer);
        if producer.is_some() {
            return Err(PipelineError::AlreadyRunning);
        }

        self.shared.ring.reset();
        self.shared.stop_producer.store(false, Ordering::Release);
        self.shared.exhausted.store(false, Ordering::Release);
        if let Some(m) = lock(&self.shared.slot).modulator.as_mut() {
            m.reset();
        }

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("pcm-producer".to_string())
            .spawn(move || producer_loop(shared, source))
            .map_err(PipelineError::Spawn)?;

        if let Err(e) = self.open_stream() {
            self.shared.stop_producer.store(true, Ordering::Release);
            if handle.join().is_err() {
                error!("PCM producer panicked");
            }
            return Err(e.into());
        }

        *producer = Some(handle);
        self.shared.running.store(true, Ordering::Release);
        info!("Transmit pipeline running ({})", self.mode());
        Ok(())
    }

    fn open_stream(&self) -> Result<(), HardwareError> {
        if self.streaming.load(Ordering::Acquire) {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        self.hardware.start_transmit(Box::new(move |buf: &mut [u8]| {
            shared.fill_transfer(buf);
            StreamControl::Continue
        }))?;
        self.streaming.store(true, Ordering::Release);
        Ok(())
    }

    /// Running -> Idle. Blocks until the producer thread has exited.
    ///
    /// Returns `false` if the pipeline was already idle.
    pub fn stop(&self) -> bool {
        let handle = lock(&self.producer).take();
        let Some(handle) = handle else {
            return false;
        };
        self.shared.running.store(false, Ordering::Release);
        self.shared.stop_producer.store(true, Ordering::Release);
        if handle.join().is_err() {
            error!("PCM producer panicked");
        }
        info!("Transmit pipeline idle");
        true
    }

    /// Stop streaming and close the transmit stream.
    pub fn shutdown(&self) {
        self.stop();
        if self.streaming.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.hardware.stop_transmit() {
                warn!("Failed to stop transmit stream: {}", e);
            }
        }
    }

    /// Fill one transfer buffer exactly as the hardware callback does.
    pub fn fill_transfer(&self, out: &mut [u8]) {
        self.shared.fill_transfer(out);
    }

    pub fn mode(&self) -> ModulationMode {
        *lock(&self.mode)
    }

    /// Switch modulator. The new modulator starts from a clean state.
    pub fn set_mode(&self, mode: ModulationMode) {
        let settings = *lock(&self.shared.settings);
        let modulator = Modulator::for_mode(mode, &settings);
        lock(&self.shared.slot).modulator = modulator;
        *lock(&self.mode) = mode;
        info!("Transmit mode set to {}", mode);
    }

    pub fn settings(&self) -> ModulatorSettings {
        *lock(&self.shared.settings)
    }

    /// Validate and apply one settings change. A rejected change leaves
    /// both the stored settings and the active modulator untouched.
    fn update_settings(&self, edit: impl FnOnce(&mut ModulatorSettings)) -> ParamResult {
        let mut settings = self.settings();
        edit(&mut settings);
        settings
            .validate()
            .inspect_err(|e| warn!("Transmit: {}", e))?;
        let mut slot = lock(&self.shared.slot);
        if let Some(m) = slot.modulator.as_mut() {
            m.apply_settings(&settings)?;
        }
        *lock(&self.shared.settings) = settings;
        Ok(())
    }

    pub fn set_am_modulation_index(&self, index: f32) -> ParamResult {
        self.update_settings(|s| s.am_modulation_index = index)
    }

    pub fn set_fm_deviation(&self, hz: f32) -> ParamResult {
        self.update_settings(|s| s.fm_deviation_hz = hz)
    }

    pub fn set_wbfm_deviation(&self, hz: f32) -> ParamResult {
        self.update_settings(|s| s.wbfm_deviation_hz = hz)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            state: self.state(),
            mode: self.mode(),
            source_exhausted: self.shared.exhausted.load(Ordering::Acquire),
            ring: self.shared.ring.stats(),
        }
    }
}

impl Drop for TxPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

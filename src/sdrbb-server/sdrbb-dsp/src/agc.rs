// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Receive automatic gain control.
//!
//! Each receive block yields a magnitude in raw 8-bit units. The loop maps it
//! to dBFS through a lookup table, corrects the baseband gain towards the
//! operating point and smooths the command with a single-pole IIR before
//! handing it to the transceiver. The RF amplifier follows a fixed
//! frequency plan outside the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use sdrbb_core::hardware::{
    HardwareResult, Transceiver, AMP_GAIN_DB, BASEBAND_GAIN_MAX_DB, IF_GAIN_MAX_DB,
};
use sdrbb_core::{Freq, ParamError, ParamResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::rx::MagnitudeTap;

pub const DEFAULT_OPERATING_POINT_DBFS: f32 = -30.0;
pub const MIN_OPERATING_POINT_DBFS: f32 = -60.0;
pub const MAX_OPERATING_POINT_DBFS: f32 = 0.0;
pub const DEFAULT_FILTER_COEFFICIENT: f32 = 0.9;
pub const DEFAULT_IF_GAIN_DB: u32 = 32;
/// Smoothed baseband gain before the first update.
pub const INITIAL_BASEBAND_GAIN_DB: f32 = 40.0;
/// The RF amplifier is switched on at and above this frequency.
pub const AMP_THRESHOLD_HZ: u64 = 200_000_000;

/// Magnitude that maps to 0 dBFS.
const FULL_SCALE_MAGNITUDE: f32 = 128.0;
const DB_TABLE_LEN: usize = 257;

fn db_table() -> &'static [f32; DB_TABLE_LEN] {
    static TABLE: OnceLock<[f32; DB_TABLE_LEN]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let reference = 20.0 * FULL_SCALE_MAGNITUDE.log10();
        let mut table = [0.0f32; DB_TABLE_LEN];
        for (i, entry) in table.iter_mut().enumerate().skip(1) {
            *entry = 20.0 * (i as f32).log10() - reference;
        }
        table[0] = table[1];
        table
    })
}

/// Magnitude in `[0, 256]` to dBFS. Out-of-range input is clamped.
pub fn magnitude_to_dbfs(magnitude: f32) -> f32 {
    let idx = if magnitude.is_nan() {
        0
    } else {
        magnitude.clamp(0.0, (DB_TABLE_LEN - 1) as f32) as usize
    };
    db_table()[idx]
}

fn check_operating_point(dbfs: f32) -> ParamResult {
    if (MIN_OPERATING_POINT_DBFS..=MAX_OPERATING_POINT_DBFS).contains(&dbfs) {
        Ok(())
    } else {
        Err(ParamError::out_of_range(
            "operating_point_dbfs",
            dbfs as f64,
            "-60 <= x <= 0",
        ))
    }
}

fn check_filter_coefficient(alpha: f32) -> ParamResult {
    if alpha > 0.001 && alpha < 0.999 {
        Ok(())
    } else {
        Err(ParamError::out_of_range(
            "filter_coefficient",
            alpha as f64,
            "0.001 < x < 0.999",
        ))
    }
}

fn check_if_gain(db: u32) -> ParamResult {
    if db <= IF_GAIN_MAX_DB {
        Ok(())
    } else {
        Err(ParamError::out_of_range("if_gain_db", db as f64, "0 <= x <= 40"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgcSettings {
    pub operating_point_dbfs: f32,
    pub filter_coefficient: f32,
    pub if_gain_db: u32,
}

impl Default for AgcSettings {
    fn default() -> Self {
        Self {
            operating_point_dbfs: DEFAULT_OPERATING_POINT_DBFS,
            filter_coefficient: DEFAULT_FILTER_COEFFICIENT,
            if_gain_db: DEFAULT_IF_GAIN_DB,
        }
    }
}

impl AgcSettings {
    pub fn validate(&self) -> ParamResult {
        check_operating_point(self.operating_point_dbfs)?;
        check_filter_coefficient(self.filter_coefficient)?;
        check_if_gain(self.if_gain_db)
    }
}

/// Snapshot of the loop for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AgcStatus {
    pub enabled: bool,
    pub operating_point_dbfs: f32,
    pub filter_coefficient: f32,
    pub amp_enabled: bool,
    pub if_gain_db: u32,
    pub baseband_gain_db: u32,
    pub filtered_baseband_db: f32,
    pub last_level_dbfs: Option<f32>,
    pub total_gain_db: u32,
    pub updates: u64,
}

struct LoopState {
    operating_point: f32,
    alpha: f32,
    rf_gain_db: u32,
    if_gain_db: u32,
    baseband_gain_db: u32,
    filtered: f32,
    last_dbfs: Option<f32>,
    updates: u64,
}

pub struct AutomaticGainControl {
    hardware: Arc<dyn Transceiver>,
    enabled: AtomicBool,
    state: Mutex<LoopState>,
    tap: Mutex<Option<MagnitudeTap>>,
}

impl AutomaticGainControl {
    /// Build a disabled loop. Settings outside their range fall back to
    /// the defaults.
    pub fn new(hardware: Arc<dyn Transceiver>, settings: AgcSettings) -> Self {
        let settings = match settings.validate() {
            Ok(()) => settings,
            Err(e) => {
                warn!("AGC: {}; using defaults", e);
                AgcSettings::default()
            }
        };
        Self {
            hardware,
            enabled: AtomicBool::new(false),
            state: Mutex::new(LoopState {
                operating_point: settings.operating_point_dbfs,
                alpha: settings.filter_coefficient,
                rf_gain_db: 0,
                if_gain_db: settings.if_gain_db,
                baseband_gain_db: INITIAL_BASEBAND_GAIN_DB as u32,
                filtered: INITIAL_BASEBAND_GAIN_DB,
                last_dbfs: None,
                updates: 0,
            }),
            tap: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, LoopState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Push the fixed IF gain and the starting baseband gain.
    pub fn apply_initial_gains(&self) -> HardwareResult<()> {
        let (if_gain, baseband) = {
            let st = self.state();
            (st.if_gain_db, st.baseband_gain_db)
        };
        self.hardware.set_if_gain(if_gain)?;
        self.hardware.set_baseband_gain(baseband)
    }

    /// Register on the receive chain's magnitude tap.
    ///
    /// The listener holds a weak reference, so dropping the last handle to
    /// the loop ends the subscription.
    pub fn attach(self: &Arc<Self>, tap: &MagnitudeTap) {
        let agc: Weak<Self> = Arc::downgrade(self);
        tap.attach(Box::new(move |magnitude| {
            if let Some(agc) = agc.upgrade() {
                if agc.is_enabled() {
                    agc.run(magnitude);
                }
            }
        }));
        if let Ok(mut slot) = self.tap.lock() {
            *slot = Some(tap.clone());
        }
    }

    /// Returns `false` if already enabled.
    pub fn enable(&self) -> bool {
        let changed = !self.enabled.swap(true, Ordering::AcqRel);
        if changed {
            info!("AGC enabled");
        }
        changed
    }

    /// Returns `false` if already disabled.
    pub fn disable(&self) -> bool {
        let changed = self.enabled.swap(false, Ordering::AcqRel);
        if changed {
            info!("AGC disabled");
        }
        changed
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_operating_point(&self, dbfs: f32) -> ParamResult {
        check_operating_point(dbfs).inspect_err(|e| warn!("AGC: {}", e))?;
        self.state().operating_point = dbfs;
        Ok(())
    }

    pub fn set_agc_filter_coefficient(&self, alpha: f32) -> ParamResult {
        check_filter_coefficient(alpha).inspect_err(|e| warn!("AGC: {}", e))?;
        self.state().alpha = alpha;
        Ok(())
    }

    /// Apply the frequency gain plan. Returns the amplifier state.
    pub fn set_receive_frequency(&self, freq: Freq) -> HardwareResult<bool> {
        let amp = freq.hz >= AMP_THRESHOLD_HZ;
        self.hardware.set_amp_enable(amp)?;
        self.state().rf_gain_db = if amp { AMP_GAIN_DB } else { 0 };
        debug!("AGC: amplifier {} at {}", if amp { "on" } else { "off" }, freq);
        Ok(amp)
    }

    /// One loop update. Returns the baseband gain command.
    pub fn run(&self, magnitude: f32) -> u32 {
        let dbfs = magnitude_to_dbfs(magnitude);
        let (command, changed) = {
            let mut st = self.state();
            let adjusted = (st.baseband_gain_db as f32 + st.operating_point - dbfs)
                .clamp(0.0, BASEBAND_GAIN_MAX_DB as f32);
            st.filtered = st.alpha * adjusted + (1.0 - st.alpha) * st.filtered;
            let command = st.filtered.round().clamp(0.0, BASEBAND_GAIN_MAX_DB as f32) as u32;
            let changed = command != st.baseband_gain_db;
            st.baseband_gain_db = command;
            st.last_dbfs = Some(dbfs);
            st.updates += 1;
            (command, changed)
        };
        if changed {
            if let Err(e) = self.hardware.set_baseband_gain(command) {
                warn!("AGC: failed to set baseband gain {} dB: {}", command, e);
            }
        }
        command
    }

    /// Smoothed baseband gain before quantization.
    pub fn filtered_gain(&self) -> f32 {
        self.state().filtered
    }

    pub fn status(&self) -> AgcStatus {
        let st = self.state();
        AgcStatus {
            enabled: self.is_enabled(),
            operating_point_dbfs: st.operating_point,
            filter_coefficient: st.alpha,
            amp_enabled: st.rf_gain_db > 0,
            if_gain_db: st.if_gain_db,
            baseband_gain_db: st.baseband_gain_db,
            filtered_baseband_db: st.filtered,
            last_level_dbfs: st.last_dbfs,
            total_gain_db: st.rf_gain_db + st.if_gain_db + st.baseband_gain_db,
            updates: st.updates,
        }
    }
}

impl Drop for AutomaticGainControl {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.tap.lock() {
            if let Some(tap) = slot.take() {
                tap.detach();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use sdrbb_core::hardware::{RxCallback, TxCallback};

    use crate::rx::ReceiveChain;

    #[derive(Default)]
    struct GainRecorder {
        baseband: StdMutex<Vec<u32>>,
        if_gain: StdMutex<Vec<u32>>,
        amp: StdMutex<Vec<bool>>,
        /// Parks the first baseband update until released.
        gate: StdMutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl Transceiver for GainRecorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn start_receive(&self, _callback: RxCallback) -> HardwareResult<()> {
            Ok(())
        }
        fn stop_receive(&self) -> HardwareResult<()> {
            Ok(())
        }
        fn start_transmit(&self, _callback: TxCallback) -> HardwareResult<()> {
            Ok(())
        }
        fn stop_transmit(&self) -> HardwareResult<()> {
            Ok(())
        }
        fn set_frequency(&self, _freq: Freq) -> HardwareResult<()> {
            Ok(())
        }
        fn set_sample_rate(&self, _hz: u32) -> HardwareResult<()> {
            Ok(())
        }
        fn set_bandwidth(&self, _hz: u32) -> HardwareResult<()> {
            Ok(())
        }
        fn set_amp_enable(&self, enabled: bool) -> HardwareResult<()> {
            self.amp.lock().unwrap().push(enabled);
            Ok(())
        }
        fn set_if_gain(&self, db: u32) -> HardwareResult<()> {
            self.if_gain.lock().unwrap().push(db);
            Ok(())
        }
        fn set_baseband_gain(&self, db: u32) -> HardwareResult<()> {
            let gate = self.gate.lock().unwrap().take();
            if let Some((entered, release)) = gate {
                let _ = entered.send(());
                let _ = release.recv_timeout(Duration::from_secs(3));
            }
            self.baseband.lock().unwrap().push(db);
            Ok(())
        }
        fn set_tx_if_gain(&self, _db: u32) -> HardwareResult<()> {
            Ok(())
        }
    }

    fn agc() -> (Arc<GainRecorder>, Arc<AutomaticGainControl>) {
        let hw = Arc::new(GainRecorder::default());
        let agc = AutomaticGainControl::new(
            Arc::clone(&hw) as Arc<dyn Transceiver>,
            AgcSettings::default(),
        );
        (hw, Arc::new(agc))
    }

    fn assert_approx_eq(a: f32, b: f32, tol: f32) {
        assert!((a - b).abs() <= tol, "{} != {} (tol {})", a, b, tol);
    }

    #[test]
    fn db_table_reference_points() {
        assert_approx_eq(magnitude_to_dbfs(128.0), 0.0, 1e-5);
        assert_approx_eq(magnitude_to_dbfs(64.0), -6.0206, 1e-3);
        assert_approx_eq(magnitude_to_dbfs(256.0), 6.0206, 1e-3);
        assert_eq!(magnitude_to_dbfs(0.0), magnitude_to_dbfs(1.0));
        assert_eq!(magnitude_to_dbfs(1_000.0), magnitude_to_dbfs(256.0));
        assert_eq!(magnitude_to_dbfs(-3.0), magnitude_to_dbfs(1.0));
    }

    #[test]
    fn first_update_from_full_scale() {
        let (hw, agc) = agc();
        assert_eq!(agc.run(128.0), 13);
        assert_approx_eq(agc.filtered_gain(), 13.0, 1e-4);
        assert_eq!(*hw.baseband.lock().unwrap(), vec![13]);
        assert_eq!(agc.status().last_level_dbfs, Some(0.0));
    }

    #[test]
    fn unchanged_command_is_not_resent() {
        let (hw, agc) = agc();
        agc.set_operating_point(0.0).unwrap();
        // 0 dBFS at the operating point keeps 40 dB.
        assert_eq!(agc.run(128.0), 40);
        assert!(hw.baseband.lock().unwrap().is_empty());
    }

    #[test]
    fn command_stays_in_range() {
        let (_, agc) = agc();
        for _ in 0..100 {
            assert!(agc.run(256.0) <= BASEBAND_GAIN_MAX_DB);
        }
        assert_eq!(agc.status().baseband_gain_db, 0);
        for _ in 0..100 {
            agc.run(0.0);
        }
        assert_eq!(agc.status().baseband_gain_db, BASEBAND_GAIN_MAX_DB);
    }

    #[test]
    fn settled_gain_is_monotonic_in_level() {
        let mut previous = u32::MAX;
        for magnitude in [1.0f32, 2.0, 3.0, 4.0, 5.0, 8.0, 16.0, 64.0, 128.0, 256.0] {
            let (_, agc) = agc();
            let mut command = 0;
            for _ in 0..200 {
                command = agc.run(magnitude);
            }
            assert!(command <= previous, "{} > {} at {}", command, previous, magnitude);
            previous = command;
        }
    }

    #[test]
    fn closed_loop_reaches_operating_point() {
        // Plant: measured level = signal level + baseband gain.
        for (signal_dbfs, expected) in [(-60.0f32, 30i32), (-45.0, 15), (-75.0, 45), (-20.0, 0)] {
            let (_, agc) = agc();
            let mut gain = INITIAL_BASEBAND_GAIN_DB as u32;
            for _ in 0..60 {
                let magnitude = 128.0 * 10f32.powf((signal_dbfs + gain as f32) / 20.0);
                gain = agc.run(magnitude);
            }
            assert!(
                (gain as i32 - expected).abs() <= 2,
                "signal {} settled at {}",
                signal_dbfs,
                gain
            );
        }
    }

    #[test]
    fn parameter_rejection_keeps_previous_value() {
        let (_, agc) = agc();
        assert!(agc.set_agc_filter_coefficient(0.001).is_err());
        assert!(agc.set_agc_filter_coefficient(0.999).is_err());
        assert!(agc.set_agc_filter_coefficient(0.5).is_ok());
        assert!(agc.set_operating_point(-61.0).is_err());
        assert!(agc.set_operating_point(5.0).is_err());
        let status = agc.status();
        assert_eq!(status.filter_coefficient, 0.5);
        assert_eq!(status.operating_point_dbfs, DEFAULT_OPERATING_POINT_DBFS);
    }

    #[test]
    fn invalid_settings_fall_back_to_defaults() {
        let hw = Arc::new(GainRecorder::default());
        let agc = AutomaticGainControl::new(
            hw,
            AgcSettings {
                filter_coefficient: 1.5,
                ..AgcSettings::default()
            },
        );
        assert_eq!(agc.status().filter_coefficient, DEFAULT_FILTER_COEFFICIENT);
    }

    #[test]
    fn enable_and_disable_are_idempotent() {
        let (_, agc) = agc();
        assert!(!agc.disable());
        assert!(agc.enable());
        assert!(!agc.enable());
        assert!(agc.disable());
    }

    #[test]
    fn amplifier_follows_frequency_plan() {
        let (hw, agc) = agc();
        assert!(!agc.set_receive_frequency(Freq::new(199_999_999)).unwrap());
        assert!(agc.set_receive_frequency(Freq::new(200_000_000)).unwrap());
        assert_eq!(*hw.amp.lock().unwrap(), vec![false, true]);
        agc.apply_initial_gains().unwrap();
        assert_eq!(*hw.if_gain.lock().unwrap(), vec![32]);
        assert_eq!(agc.status().total_gain_db, 14 + 32 + 40);
    }

    #[test]
    fn receive_chain_drives_loop_only_while_enabled() {
        let (_, agc) = agc();
        let mut chain = ReceiveChain::new(2);
        let tap = chain.magnitude_tap();
        agc.attach(&tap);
        let buf = [64u8, 0].repeat(4096);

        chain.process(&buf);
        assert_eq!(agc.status().updates, 0);
        agc.enable();
        chain.process(&buf);
        chain.process(&buf);
        assert_eq!(agc.status().updates, 2);

        drop(agc);
        assert!(!tap.is_attached());
    }

    #[test]
    fn dropping_loop_during_update_does_not_block_receive() {
        let (hw, agc) = agc();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *hw.gate.lock().unwrap() = Some((entered_tx, release_rx));

        let mut chain = ReceiveChain::new(2);
        let tap = chain.magnitude_tap();
        agc.attach(&tap);
        agc.enable();

        let (done_tx, done_rx) = mpsc::channel();
        let rx_thread = std::thread::spawn(move || {
            let magnitude = chain.process(&[127u8, 0].repeat(4096));
            let _ = done_tx.send(magnitude);
        });

        entered_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("update reached the device");
        drop(agc);
        release_tx.send(()).unwrap();

        done_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("receive callback returned");
        rx_thread.join().unwrap();
        assert!(!tap.is_attached());
        assert_eq!(hw.baseband.lock().unwrap().len(), 1);
    }
}

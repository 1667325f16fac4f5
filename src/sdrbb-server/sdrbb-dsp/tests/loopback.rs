// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! End-to-end runs against the simulated transceiver.

use std::sync::Arc;
use std::time::Duration;

use sdrbb_backend::SimTransceiver;
use sdrbb_core::hardware::{HardwareError, Transceiver};
use sdrbb_core::{Freq, ModulationMode};
use sdrbb_dsp::{
    AgcSettings, AutomaticGainControl, ModulatorSettings, ReceiveChain, SilenceSource,
    StreamState, ToneSource, TxPipeline,
};

fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..2_000 {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {}", what);
}

#[test]
fn am_carrier_loopback_pulls_agc_down() {
    let sim = Arc::new(SimTransceiver::new(true, 4.0));
    let hardware: Arc<dyn Transceiver> = sim.clone();

    let pipeline = TxPipeline::new(
        Arc::clone(&hardware),
        ModulationMode::Am,
        ModulatorSettings::default(),
    );
    pipeline.start(Box::new(SilenceSource::paced())).unwrap();
    wait_for("first transmit transfer", || sim.settings().tx_transfers > 0);

    let chain = ReceiveChain::default();
    let agc = Arc::new(AutomaticGainControl::new(
        Arc::clone(&hardware),
        AgcSettings::default(),
    ));
    agc.apply_initial_gains().unwrap();
    agc.attach(&chain.magnitude_tap());
    assert!(agc.enable());
    hardware.start_receive(chain.into_rx_callback()).unwrap();

    // The unmodulated carrier sits near -3 dBFS, far above the -30 dBFS
    // operating point, so the loop backs the baseband gain off completely.
    wait_for("AGC to settle", || agc.status().baseband_gain_db == 0);
    let status = agc.status();
    assert!(status.updates >= 2);
    let level = status.last_level_dbfs.unwrap();
    assert!((level + 3.0).abs() < 1.0, "level {}", level);
    assert_eq!(sim.settings().baseband_gain_db, 0);
    assert_eq!(sim.settings().if_gain_db, 32);

    hardware.stop_receive().unwrap();
    pipeline.shutdown();
}

#[test]
fn pipeline_survives_mode_changes_and_restarts() {
    let sim = Arc::new(SimTransceiver::new(false, 8.0));
    let pipeline = TxPipeline::new(
        sim.clone(),
        ModulationMode::Fm,
        ModulatorSettings::default(),
    );
    pipeline
        .start(Box::new(ToneSource::new(1_000.0, 12_000.0)))
        .unwrap();
    wait_for("tone to stream", || pipeline.stats().ring.consumed >= 3);

    for mode in [ModulationMode::Usb, ModulationMode::Wbfm, ModulationMode::Lsb] {
        pipeline.set_mode(mode);
        let seen = sim.settings().tx_transfers;
        wait_for("transfers in new mode", || sim.settings().tx_transfers >= seen + 2);
        assert_eq!(pipeline.stats().mode, mode);
    }

    assert!(pipeline.stop());
    assert_eq!(pipeline.state(), StreamState::Idle);
    let idle_from = sim.settings().tx_transfers;
    wait_for("idle carrier", || sim.settings().tx_transfers > idle_from);

    pipeline
        .start(Box::new(SilenceSource::paced()))
        .unwrap();
    assert_eq!(pipeline.state(), StreamState::Running);
    pipeline.shutdown();
    assert!(matches!(
        sim.stop_transmit(),
        Err(HardwareError::NotStreaming(_))
    ));
}

#[test]
fn amplifier_plan_reaches_device() {
    let sim = Arc::new(SimTransceiver::new(false, 1.0));
    let agc = AutomaticGainControl::new(sim.clone(), AgcSettings::default());
    agc.set_receive_frequency(Freq::new(433_920_000)).unwrap();
    assert!(sim.settings().amp_enabled);
    agc.set_receive_frequency(Freq::new(144_800_000)).unwrap();
    assert!(!sim.settings().amp_enabled);
}

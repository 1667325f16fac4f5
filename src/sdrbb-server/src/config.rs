// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for sdrbb-server.
//!
//! Config is loaded from the `[sdrbb-server]` section of `sdrbb.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./sdrbb.toml`
//! 3. `~/.config/sdrbb/sdrbb.toml`
//! 4. `/etc/sdrbb/sdrbb.toml`

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use sdrbb_app::ConfigFile;
use sdrbb_core::hardware::{PCM_SAMPLE_RATE, TX_IF_GAIN_MAX_DB};
use sdrbb_core::ModulationMode;
use sdrbb_dsp::agc::AgcSettings;
use sdrbb_dsp::modulate::ModulatorSettings;

/// Largest accepted crystal correction.
const MAX_FREQ_CORRECTION_PPM: f64 = 500.0;
/// Half-band stages available between the device rate and the PCM rate.
const MAX_DECIMATION_STAGES: usize = 8;

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub general: GeneralConfig,
    pub device: DeviceConfig,
    pub transmit: TransmitConfig,
    pub receive: ReceiveConfig,
    pub agc: AgcConfig,
    pub stats: StatsConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

/// Transceiver selection and tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Backend name (e.g. "sim")
    pub backend: String,
    /// Centre frequency in Hz, before correction
    pub frequency_hz: u64,
    /// Reference oscillator correction applied to frequency and sample rate
    pub freq_correction_ppm: f64,
    /// Analog baseband filter bandwidth in Hz
    pub bandwidth_hz: u32,
    /// Transmit IF gain in dB
    pub tx_if_gain_db: u32,
    /// Front-end amplifier; overridden by the AGC frequency plan when enabled
    pub amp_enabled: bool,
    /// Feed transmitted samples back into the receive path (sim backend)
    pub loopback: bool,
    /// Streaming cadence multiplier (sim backend)
    pub speed: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: "sim".to_string(),
            frequency_hz: 433_920_000,
            freq_correction_ppm: 0.0,
            bandwidth_hz: 1_750_000,
            tx_if_gain_db: 0,
            amp_enabled: false,
            loopback: true,
            speed: 1.0,
        }
    }
}

/// Where transmit PCM comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PcmInput {
    Silence,
    Tone,
    Stdin,
    File(PathBuf),
}

impl PcmInput {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "" | "silence" => PcmInput::Silence,
            "tone" => PcmInput::Tone,
            "-" | "stdin" => PcmInput::Stdin,
            path => PcmInput::File(PathBuf::from(path)),
        }
    }
}

/// Transmit pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmitConfig {
    pub enabled: bool,
    pub mode: ModulationMode,
    /// "silence", "tone", "-"/"stdin", or a path to raw 16-bit LE PCM
    pub input: String,
    /// Test tone frequency in Hz when `input = "tone"`
    pub tone_hz: f64,
    /// Test tone amplitude in PCM units
    pub tone_amplitude: f64,
    pub am_modulation_index: f32,
    pub fm_deviation_hz: f32,
    pub wbfm_deviation_hz: f32,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        let modulator = ModulatorSettings::default();
        Self {
            enabled: true,
            mode: ModulationMode::Fm,
            input: "tone".to_string(),
            tone_hz: 1_000.0,
            tone_amplitude: 16_000.0,
            am_modulation_index: modulator.am_modulation_index,
            fm_deviation_hz: modulator.fm_deviation_hz,
            wbfm_deviation_hz: modulator.wbfm_deviation_hz,
        }
    }
}

impl TransmitConfig {
    pub fn pcm_input(&self) -> PcmInput {
        PcmInput::parse(&self.input)
    }

    pub fn modulator_settings(&self) -> ModulatorSettings {
        ModulatorSettings {
            am_modulation_index: self.am_modulation_index,
            fm_deviation_hz: self.fm_deviation_hz,
            wbfm_deviation_hz: self.wbfm_deviation_hz,
        }
    }
}

/// Receive decimation chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveConfig {
    pub enabled: bool,
    /// Half-band 2x stages after the device rate
    pub decimation_stages: usize,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decimation_stages: MAX_DECIMATION_STAGES,
        }
    }
}

/// Receive AGC configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgcConfig {
    pub enabled: bool,
    pub operating_point_dbfs: f32,
    pub filter_coefficient: f32,
    pub if_gain_db: u32,
}

impl Default for AgcConfig {
    fn default() -> Self {
        let settings = AgcSettings::default();
        Self {
            enabled: true,
            operating_point_dbfs: settings.operating_point_dbfs,
            filter_coefficient: settings.filter_coefficient,
            if_gain_db: settings.if_gain_db,
        }
    }
}

impl AgcConfig {
    pub fn settings(&self) -> AgcSettings {
        AgcSettings {
            operating_point_dbfs: self.operating_point_dbfs,
            filter_coefficient: self.filter_coefficient,
            if_gain_db: self.if_gain_db,
        }
    }
}

/// Periodic statistics logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { interval_ms: 5_000 }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.device.backend.trim().is_empty() {
            return Err("[device].backend must not be empty".to_string());
        }
        if self.device.frequency_hz == 0 {
            return Err("[device].frequency_hz must be > 0".to_string());
        }
        if !self.device.freq_correction_ppm.is_finite()
            || self.device.freq_correction_ppm.abs() > MAX_FREQ_CORRECTION_PPM
        {
            return Err(format!(
                "[device].freq_correction_ppm must be within +/-{}",
                MAX_FREQ_CORRECTION_PPM
            ));
        }
        if self.device.bandwidth_hz == 0 {
            return Err("[device].bandwidth_hz must be > 0".to_string());
        }
        if self.device.tx_if_gain_db > TX_IF_GAIN_MAX_DB {
            return Err(format!(
                "[device].tx_if_gain_db must be in range 0..={}",
                TX_IF_GAIN_MAX_DB
            ));
        }
        if !(self.device.speed.is_finite() && self.device.speed > 0.0) {
            return Err("[device].speed must be > 0".to_string());
        }

        self.transmit
            .modulator_settings()
            .validate()
            .map_err(|e| format!("[transmit].{}", e))?;
        if self.transmit.pcm_input() == PcmInput::Tone {
            let nyquist = PCM_SAMPLE_RATE as f64 / 2.0;
            if !(self.transmit.tone_hz > 0.0 && self.transmit.tone_hz < nyquist) {
                return Err(format!("[transmit].tone_hz must be in range (0, {})", nyquist));
            }
            if !(0.0..=i16::MAX as f64).contains(&self.transmit.tone_amplitude) {
                return Err("[transmit].tone_amplitude must be in range 0..=32767".to_string());
            }
        }

        if self.receive.decimation_stages > MAX_DECIMATION_STAGES {
            return Err(format!(
                "[receive].decimation_stages must be in range 0..={}",
                MAX_DECIMATION_STAGES
            ));
        }

        self.agc
            .settings()
            .validate()
            .map_err(|e| format!("[agc].{}", e))?;

        if self.stats.interval_ms == 0 {
            return Err("[stats].interval_ms must be > 0".to_string());
        }
        Ok(())
    }

    /// Example configuration as a complete `sdrbb.toml` document.
    pub fn example_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "sdrbb-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            ..ServerConfig::default()
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "sdrbb-server"
    }
}

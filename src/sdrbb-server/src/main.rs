// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use num_complex::Complex;
use serde::Serialize;
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use sdrbb_app::{init_logging, normalize_name, ConfigFile};
use sdrbb_backend::{register_builtin_backends_on, BackendOptions, RegistrationContext};
use sdrbb_core::hardware::DEVICE_SAMPLE_RATE;
use sdrbb_core::radio::freq::warp_hz;
use sdrbb_core::{DynResult, Freq, ModulationMode, Transceiver};
use sdrbb_dsp::{
    AgcStatus, AutomaticGainControl, PcmSource, PipelineStats, ReaderPcmSource, ReceiveChain,
    SilenceSource, ToneSource, TxPipeline,
};

use config::{PcmInput, ServerConfig};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - baseband modulation daemon");

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Transmit modulation (none, am, fm, wbfm, lsb, usb or 0..=5)
    #[arg(short = 'm', long = "mode")]
    mode: Option<ModulationMode>,
    /// PCM input: "silence", "tone", "-" for stdin, or a file of 16-bit LE samples
    #[arg(short = 'i', long = "input")]
    input: Option<String>,
    /// Test tone frequency in Hz (implies --input tone)
    #[arg(short = 't', long = "tone")]
    tone: Option<f64>,
    /// Centre frequency in Hz
    #[arg(short = 'f', long = "frequency")]
    frequency: Option<u64>,
    /// Transceiver backend (e.g. sim)
    #[arg(short = 'b', long = "backend")]
    backend: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, cfg: &mut ServerConfig) {
        if let Some(mode) = self.mode {
            cfg.transmit.mode = mode;
        }
        if let Some(ref input) = self.input {
            cfg.transmit.input = input.clone();
        }
        if let Some(tone) = self.tone {
            cfg.transmit.tone_hz = tone;
            cfg.transmit.input = "tone".to_string();
        }
        if let Some(hz) = self.frequency {
            cfg.device.frequency_hz = hz;
        }
        if let Some(ref backend) = self.backend {
            cfg.device.backend = normalize_name(backend);
        }
    }
}

/// Snapshot written to the log on shutdown.
#[derive(Debug, Serialize)]
struct StatsReport {
    transmit: Option<PipelineStats>,
    agc: Option<AgcStatus>,
    receive_blocks: u64,
}

fn open_source(cfg: &ServerConfig) -> DynResult<Box<dyn PcmSource>> {
    let source: Box<dyn PcmSource> = match cfg.transmit.pcm_input() {
        PcmInput::Silence => Box::new(SilenceSource::paced()),
        PcmInput::Tone => Box::new(ToneSource::new(
            cfg.transmit.tone_hz,
            cfg.transmit.tone_amplitude,
        )),
        PcmInput::Stdin => Box::new(ReaderPcmSource::spawn(std::io::stdin(), true)?),
        PcmInput::File(path) => {
            let file = std::fs::File::open(&path)
                .map_err(|e| format!("Failed to open PCM input {}: {}", path.display(), e))?;
            Box::new(ReaderPcmSource::spawn(std::io::BufReader::new(file), true)?)
        }
    };
    Ok(source)
}

/// Tune the device, applying the crystal correction to both the centre
/// frequency and the sample rate.
fn configure_device(hardware: &dyn Transceiver, cfg: &ServerConfig) -> DynResult<Freq> {
    let ppm = cfg.device.freq_correction_ppm;
    let freq = Freq::new(cfg.device.frequency_hz).warped(ppm);
    let sample_rate = u32::try_from(warp_hz(DEVICE_SAMPLE_RATE as u64, ppm))
        .map_err(|_| "Corrected sample rate out of range")?;

    hardware.set_sample_rate(sample_rate)?;
    hardware.set_frequency(freq)?;
    hardware.set_bandwidth(cfg.device.bandwidth_hz)?;
    hardware.set_tx_if_gain(cfg.device.tx_if_gain_db)?;
    hardware.set_amp_enable(cfg.device.amp_enabled)?;
    info!(
        "Tuned {} to {} ({} S/s, {:+} ppm)",
        hardware.name(),
        freq,
        sample_rate,
        ppm
    );
    Ok(freq)
}

fn mean_power(block: &[Complex<f32>]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    block.iter().map(|s| s.norm_sqr()).sum::<f32>() / block.len() as f32
}

/// Stand-in demodulator subscriber: counts decimated blocks and traces their power.
async fn monitor_receive(
    mut iq_rx: broadcast::Receiver<Vec<Complex<f32>>>,
    shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    let mut blocks = 0u64;
    loop {
        tokio::select! {
            _ = wait_for_shutdown(shutdown_rx.clone()) => break,
            msg = iq_rx.recv() => match msg {
                Ok(block) => {
                    blocks += 1;
                    tracing::trace!("RX block {}: {} samples, power {:.2}", blocks, block.len(), mean_power(&block));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receive monitor lagged, dropped {} blocks", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    blocks
}

async fn report_stats(
    pipeline: Option<Arc<TxPipeline>>,
    agc: Option<Arc<AutomaticGainControl>>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut last_exhausted = false;
    loop {
        tokio::select! {
            _ = wait_for_shutdown(shutdown_rx.clone()) => break,
            _ = ticker.tick() => {
                if let Some(ref pipeline) = pipeline {
                    let s = pipeline.stats();
                    info!(
                        "TX {:?} {}: produced {}, consumed {}, dropped {}, duplicated {}, resyncs {}, lag {}",
                        s.state, s.mode, s.ring.produced, s.ring.consumed,
                        s.ring.dropped, s.ring.duplicated, s.ring.resyncs, s.ring.lag
                    );
                    if s.source_exhausted && !last_exhausted {
                        info!("PCM input finished; transmitting carrier only");
                    }
                    last_exhausted = s.source_exhausted;
                }
                if let Some(ref agc) = agc {
                    let a = agc.status();
                    debug!(
                        "AGC: level {:?} dBFS, baseband {} dB (filtered {:.1}), total {} dB",
                        a.last_level_dbfs, a.baseband_gain_db, a.filtered_baseband_db, a.total_gain_db
                    );
                }
            }
        }
    }
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    if *shutdown_rx.borrow() {
        return;
    }
    while shutdown_rx.changed().await.is_ok() {
        if *shutdown_rx.borrow() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let mut registry = RegistrationContext::new();
    register_builtin_backends_on(&mut registry);

    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = ServerConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };
    cli.apply_overrides(&mut cfg);
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let options = BackendOptions {
        loopback: cfg.device.loopback,
        speed: cfg.device.speed,
    };
    let hardware = registry.build(&cfg.device.backend, &options)?;
    info!("Starting sdrbb-server (backend: {})", hardware.name());

    let freq = configure_device(hardware.as_ref(), &cfg)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut agc = None;
    let mut monitor: Option<JoinHandle<u64>> = None;

    if cfg.receive.enabled {
        let chain = ReceiveChain::new(cfg.receive.decimation_stages);
        info!(
            "Receive chain: {}x decimation to {} S/s",
            chain.decimation(),
            chain.output_rate()
        );
        if cfg.agc.enabled {
            let gain_loop = Arc::new(AutomaticGainControl::new(
                Arc::clone(&hardware),
                cfg.agc.settings(),
            ));
            gain_loop.apply_initial_gains()?;
            gain_loop.set_receive_frequency(freq)?;
            gain_loop.attach(&chain.magnitude_tap());
            gain_loop.enable();
            agc = Some(gain_loop);
        }
        monitor = Some(tokio::spawn(monitor_receive(
            chain.subscribe(),
            shutdown_rx.clone(),
        )));
        hardware.start_receive(chain.into_rx_callback())?;
    }

    let pipeline = if cfg.transmit.enabled {
        let pipeline = Arc::new(TxPipeline::new(
            Arc::clone(&hardware),
            cfg.transmit.mode,
            cfg.transmit.modulator_settings(),
        ));
        pipeline.start(open_source(&cfg)?)?;
        Some(pipeline)
    } else {
        None
    };

    let stats_task = tokio::spawn(report_stats(
        pipeline.clone(),
        agc.clone(),
        Duration::from_millis(cfg.stats.interval_ms),
        shutdown_rx.clone(),
    ));

    signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");
    let _ = shutdown_tx.send(true);

    if let Err(e) = stats_task.await {
        error!("Statistics task failed: {:?}", e);
    }

    if let Some(ref pipeline) = pipeline {
        pipeline.shutdown();
    }
    if cfg.receive.enabled {
        if let Err(e) = hardware.stop_receive() {
            warn!("Failed to stop receive stream: {}", e);
        }
    }
    let receive_blocks = match monitor {
        Some(handle) => handle.await.unwrap_or_default(),
        None => 0,
    };

    let report = StatsReport {
        transmit: pipeline.as_ref().map(|p| p.stats()),
        agc: agc.as_ref().map(|a| a.status()),
        receive_blocks,
    };
    info!("Final statistics: {}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

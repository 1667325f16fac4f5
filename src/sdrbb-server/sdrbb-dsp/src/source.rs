// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! PCM sources feeding the transmit producer thread.

use std::f64::consts::TAU;
use std::io::{ErrorKind, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use sdrbb_core::hardware::{PCM_BLOCK_LEN, PCM_SAMPLE_RATE};

/// Result of one poll of a [`PcmSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmRead {
    /// `n` samples were written to the front of the buffer.
    Filled(usize),
    /// Nothing arrived within the timeout.
    Timeout,
    /// The source is exhausted; no further data will arrive.
    EndOfStream,
}

/// Abstraction over any PCM sample source (file, pipe, generator).
pub trait PcmSource: Send + 'static {
    /// Wait at most `timeout` for the next block.
    fn read_block(&mut self, buf: &mut [i16], timeout: Duration) -> Result<PcmRead, String>;
}

/// Duration of one PCM block at the PCM rate.
pub fn block_period() -> Duration {
    Duration::from_secs_f64(PCM_BLOCK_LEN as f64 / PCM_SAMPLE_RATE as f64)
}

/// Real-time pacing for generated or file-backed sources.
#[derive(Debug)]
struct BlockClock {
    next: Instant,
    period: Duration,
}

impl BlockClock {
    fn new(period: Duration) -> Self {
        Self {
            next: Instant::now(),
            period,
        }
    }

    /// Sleep until the next block is due, but never longer than `timeout`.
    /// Returns `true` when the block is due.
    fn wait(&mut self, timeout: Duration) -> bool {
        let now = Instant::now();
        if self.next > now {
            let remaining = self.next - now;
            if remaining > timeout {
                std::thread::sleep(timeout);
                return false;
            }
            std::thread::sleep(remaining);
        }
        self.next += self.period;
        true
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Source producing silence (all zeros) at the PCM rate.
pub struct SilenceSource {
    clock: Option<BlockClock>,
}

impl SilenceSource {
    pub fn paced() -> Self {
        Self {
            clock: Some(BlockClock::new(block_period())),
        }
    }

    pub fn unpaced() -> Self {
        Self { clock: None }
    }
}

impl PcmSource for SilenceSource {
    fn read_block(&mut self, buf: &mut [i16], timeout: Duration) -> Result<PcmRead, String> {
        if let Some(clock) = self.clock.as_mut() {
            if !clock.wait(timeout) {
                return Ok(PcmRead::Timeout);
            }
        }
        buf.fill(0);
        Ok(PcmRead::Filled(buf.len()))
    }
}

/// Sine generator at the PCM rate.
pub struct ToneSource {
    step: f64,
    phase: f64,
    amplitude: f64,
    clock: Option<BlockClock>,
}

impl ToneSource {
    /// `amplitude` is in PCM units (full scale 32767).
    pub fn new(freq_hz: f64, amplitude: f64) -> Self {
        Self {
            step: TAU * freq_hz / PCM_SAMPLE_RATE as f64,
            phase: 0.0,
            amplitude: amplitude.clamp(0.0, i16::MAX as f64),
            clock: Some(BlockClock::new(block_period())),
        }
    }

    pub fn unpaced(mut self) -> Self {
        self.clock = None;
        self
    }
}

impl PcmSource for ToneSource {
    fn read_block(&mut self, buf: &mut [i16], timeout: Duration) -> Result<PcmRead, String> {
        if let Some(clock) = self.clock.as_mut() {
            if !clock.wait(timeout) {
                return Ok(PcmRead::Timeout);
            }
        }
        for s in buf.iter_mut() {
            *s = (self.amplitude * self.phase.sin()).round() as i16;
            self.phase = (self.phase + self.step) % TAU;
        }
        Ok(PcmRead::Filled(buf.len()))
    }
}

// ---------------------------------------------------------------------------
// Byte stream source
// ---------------------------------------------------------------------------

/// Blocks buffered between the reader thread and the producer.
const READER_QUEUE_BLOCKS: usize = 16;

/// Little-endian 16-bit PCM read from any byte stream (file, pipe, stdin).
///
/// A dedicated thread performs the blocking reads so that
/// [`PcmSource::read_block`] can honour its timeout.
pub struct ReaderPcmSource {
    rx: Receiver<Vec<i16>>,
    clock: Option<BlockClock>,
}

impl ReaderPcmSource {
    /// Spawn the reader thread. With `paced`, blocks are released at the PCM
    /// rate instead of as fast as the stream delivers them.
    pub fn spawn<R: Read + Send + 'static>(reader: R, paced: bool) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(READER_QUEUE_BLOCKS);
        std::thread::Builder::new()
            .name("pcm-reader".to_string())
            .spawn(move || read_loop(reader, tx))?;
        Ok(Self {
            rx,
            clock: paced.then(|| BlockClock::new(block_period())),
        })
    }
}

fn read_loop<R: Read>(mut reader: R, tx: mpsc::SyncSender<Vec<i16>>) {
    let mut bytes = vec![0u8; PCM_BLOCK_LEN * 2];
    loop {
        let mut filled = 0;
        while filled < bytes.len() {
            match reader.read(&mut bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("PCM input read error: {}", e);
                    break;
                }
            }
        }
        let samples: Vec<i16> = bytes[..filled - filled % 2]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let last = filled < bytes.len();
        if !samples.is_empty() && tx.send(samples).is_err() {
            return;
        }
        if last {
            tracing::debug!("PCM input reached end of stream");
            return;
        }
    }
}

impl PcmSource for ReaderPcmSource {
    fn read_block(&mut self, buf: &mut [i16], timeout: Duration) -> Result<PcmRead, String> {
        let deadline = Instant::now() + timeout;
        if let Some(clock) = self.clock.as_mut() {
            if !clock.wait(timeout) {
                return Ok(PcmRead::Timeout);
            }
        }
        let wait = deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(wait) {
            Ok(samples) => {
                let n = samples.len().min(buf.len());
                buf[..n].copy_from_slice(&samples[..n]);
                Ok(PcmRead::Filled(n))
            }
            Err(RecvTimeoutError::Timeout) => {
                // The block slot was consumed by the clock; give it back.
                if let Some(clock) = self.clock.as_mut() {
                    clock.next -= clock.period;
                }
                Ok(PcmRead::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Ok(PcmRead::EndOfStream),
        }
    }
}

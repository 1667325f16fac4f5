// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Single-producer/single-consumer ring of PCM blocks with rate-mismatch
//! compensation.
//!
//! The writer index is only stored by the producer and the reader index only
//! by the consumer. Block payloads sit behind per-slot mutexes so a pull
//! never observes a half-written block. The consumer never waits on a slot:
//! if the producer holds it, the previous block is repeated.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, TryLockError};

use sdrbb_core::hardware::PCM_BLOCK_LEN;
use serde::Serialize;

pub const RING_CAPACITY: usize = 16;
/// Reader distance behind the writer established on the first pull.
pub const RESYNC_LAG: usize = 8;
/// A lag above this skips one block.
pub const DROP_ABOVE_LAG: usize = 10;
/// A lag below this repeats the previous block.
pub const DUPLICATE_BELOW_LAG: usize = 6;

pub type PcmBlock = [i16; PCM_BLOCK_LEN];

/// What a consumer pull did besides delivering a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullKind {
    Normal,
    /// First pull after (re)start, reader placed `RESYNC_LAG` behind.
    Resync,
    /// Producer ahead: one block skipped.
    Dropped,
    /// Consumer ahead, or the slot was busy: previous block delivered again.
    Duplicated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RingStats {
    pub produced: u64,
    pub consumed: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub resyncs: u64,
    pub lag: usize,
}

pub struct PcmRing {
    slots: Vec<Mutex<PcmBlock>>,
    writer: AtomicUsize,
    reader: AtomicUsize,
    resync: AtomicBool,
    produced: AtomicU64,
    consumed: AtomicU64,
    dropped: AtomicU64,
    duplicated: AtomicU64,
    resyncs: AtomicU64,
}

#[inline]
fn lag_between(writer: usize, reader: usize) -> usize {
    (writer + RING_CAPACITY - reader) % RING_CAPACITY
}

impl PcmRing {
    pub fn new() -> Self {
        Self {
            slots: (0..RING_CAPACITY)
                .map(|_| Mutex::new([0; PCM_BLOCK_LEN]))
                .collect(),
            writer: AtomicUsize::new(0),
            reader: AtomicUsize::new(0),
            resync: AtomicBool::new(true),
            produced: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            duplicated: AtomicU64::new(0),
            resyncs: AtomicU64::new(0),
        }
    }

    fn copy_from_slot(&self, idx: usize, out: &mut [i16]) {
        let n = out.len().min(PCM_BLOCK_LEN);
        match self.slots[idx].lock() {
            Ok(slot) => out[..n].copy_from_slice(&slot[..n]),
            Err(poisoned) => out[..n].copy_from_slice(&poisoned.into_inner()[..n]),
        }
        out[n..].fill(0);
    }

    /// Like `copy_from_slot`, but gives up if the producer holds the slot.
    fn try_copy_from_slot(&self, idx: usize, out: &mut [i16]) -> bool {
        let n = out.len().min(PCM_BLOCK_LEN);
        match self.slots[idx].try_lock() {
            Ok(slot) => out[..n].copy_from_slice(&slot[..n]),
            Err(TryLockError::Poisoned(poisoned)) => {
                out[..n].copy_from_slice(&poisoned.into_inner()[..n])
            }
            Err(TryLockError::WouldBlock) => return false,
        }
        out[n..].fill(0);
        true
    }

    /// Producer side: store one block and advance the writer.
    ///
    /// Short blocks are zero padded.
    pub fn push(&self, block: &[i16]) {
        let w = self.writer.load(Ordering::Relaxed);
        let n = block.len().min(PCM_BLOCK_LEN);
        {
            let mut slot = match self.slots[w].lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot[..n].copy_from_slice(&block[..n]);
            slot[n..].fill(0);
        }
        self.writer.store((w + 1) % RING_CAPACITY, Ordering::Release);
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    /// Consumer side: deliver the next block into `out`, compensating for
    /// rate mismatch.
    ///
    /// `out` is expected to hold the previously delivered block; it is left
    /// as is when the slot to read is still being written.
    pub fn pull(&self, out: &mut [i16]) -> PullKind {
        let w = self.writer.load(Ordering::Acquire);
        let mut r = self.reader.load(Ordering::Relaxed);

        let kind = if self.resync.swap(false, Ordering::AcqRel) {
            r = (w + RING_CAPACITY - RESYNC_LAG) % RING_CAPACITY;
            self.resyncs.fetch_add(1, Ordering::Relaxed);
            PullKind::Resync
        } else {
            let lag = lag_between(w, r);
            if lag > DROP_ABOVE_LAG {
                r = (r + 1) % RING_CAPACITY;
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PullKind::Dropped
            } else if lag < DUPLICATE_BELOW_LAG {
                r = (r + RING_CAPACITY - 1) % RING_CAPACITY;
                self.duplicated.fetch_add(1, Ordering::Relaxed);
                PullKind::Duplicated
            } else {
                PullKind::Normal
            }
        };

        if !self.try_copy_from_slot(r, out) {
            // Read slot r on the next pull instead.
            self.reader.store(r, Ordering::Release);
            self.duplicated.fetch_add(1, Ordering::Relaxed);
            self.consumed.fetch_add(1, Ordering::Relaxed);
            return PullKind::Duplicated;
        }
        self.reader.store((r + 1) % RING_CAPACITY, Ordering::Release);
        self.consumed.fetch_add(1, Ordering::Relaxed);
        kind
    }

    /// Deliver the next unread block in order, without compensation.
    ///
    /// Returns `false` once the reader has caught up with the writer.
    pub fn pull_remaining(&self, out: &mut [i16]) -> bool {
        let w = self.writer.load(Ordering::Acquire);
        let r = self.reader.load(Ordering::Relaxed);
        if r == w {
            return false;
        }
        self.copy_from_slot(r, out);
        self.reader.store((r + 1) % RING_CAPACITY, Ordering::Release);
        self.consumed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Make the next [`PcmRing::pull`] re-establish the pipeline depth.
    pub fn request_resync(&self) {
        self.resync.store(true, Ordering::Release);
    }

    /// Zero storage and counters. Only call while neither side is active.
    pub fn reset(&self) {
        for slot in &self.slots {
            match slot.lock() {
                Ok(mut s) => s.fill(0),
                Err(poisoned) => poisoned.into_inner().fill(0),
            }
        }
        self.writer.store(0, Ordering::Release);
        self.reader.store(0, Ordering::Release);
        self.resync.store(true, Ordering::Release);
        for counter in [
            &self.produced,
            &self.consumed,
            &self.dropped,
            &self.duplicated,
            &self.resyncs,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn writer_index(&self) -> usize {
        self.writer.load(Ordering::Acquire)
    }

    pub fn reader_index(&self) -> usize {
        self.reader.load(Ordering::Acquire)
    }

    pub fn lag(&self) -> usize {
        lag_between(self.writer_index(), self.reader_index())
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            produced: self.produced.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            duplicated: self.duplicated.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            lag: self.lag(),
        }
    }

    /// Place both indices directly and disarm the resync.
    #[cfg(test)]
    pub(crate) fn set_indices(&self, writer: usize, reader: usize) {
        self.writer.store(writer % RING_CAPACITY, Ordering::Release);
        self.reader.store(reader % RING_CAPACITY, Ordering::Release);
        self.resync.store(false, Ordering::Release);
    }
}

impl Default for PcmRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Block whose every sample carries `tag`.
    fn block(tag: i16) -> PcmBlock {
        [tag; PCM_BLOCK_LEN]
    }

    fn filled_ring() -> PcmRing {
        let ring = PcmRing::new();
        for tag in 0..RING_CAPACITY as i16 {
            ring.push(&block(tag));
        }
        ring
    }

    #[test]
    fn lag_wraps() {
        assert_eq!(lag_between(10, 15), 11);
        assert_eq!(lag_between(3, 0), 3);
        assert_eq!(lag_between(0, 0), 0);
        assert_eq!(lag_between(8, 0), 8);
    }

    #[test]
    fn overflow_skips_one_block() {
        let ring = filled_ring();
        ring.set_indices(10, 15);
        let mut out = [0i16; PCM_BLOCK_LEN];
        assert_eq!(ring.pull(&mut out), PullKind::Dropped);
        // Block 15 is skipped; the reader moves to 0 and delivers it.
        assert_eq!(out[0], 0);
        assert_eq!(ring.stats().dropped, 1);
        assert_eq!(ring.reader_index(), 1);
    }

    #[test]
    fn underflow_repeats_previous_block() {
        let ring = filled_ring();
        ring.set_indices(3, 0);
        let mut out = [0i16; PCM_BLOCK_LEN];
        assert_eq!(ring.pull(&mut out), PullKind::Duplicated);
        assert_eq!(out, block(15));
        assert_eq!(ring.stats().duplicated, 1);
        assert_eq!(ring.reader_index(), 0);
    }

    #[test]
    fn first_pull_resyncs_behind_writer() {
        let ring = PcmRing::new();
        for tag in 0..12 {
            ring.push(&block(tag));
        }
        let mut out = [0i16; PCM_BLOCK_LEN];
        assert_eq!(ring.pull(&mut out), PullKind::Resync);
        assert_eq!(out[0], 4);
        assert_eq!(ring.reader_index(), 5);
        assert_eq!(ring.lag(), 7);
        assert_eq!(ring.pull(&mut out), PullKind::Normal);
        assert_eq!(ring.stats().resyncs, 1);
    }

    #[test]
    fn busy_slot_repeats_previous_block() {
        let ring = filled_ring();
        ring.set_indices(8, 0);
        let mut out = block(99);
        let held = ring.slots[0].lock().unwrap();
        assert_eq!(ring.pull(&mut out), PullKind::Duplicated);
        assert_eq!(out, block(99));
        assert_eq!(ring.reader_index(), 0);
        drop(held);

        assert_eq!(ring.pull(&mut out), PullKind::Normal);
        assert_eq!(out, block(0));
        let stats = ring.stats();
        assert_eq!((stats.duplicated, stats.consumed), (1, 2));
    }

    #[test]
    fn busy_slot_during_resync_keeps_new_position() {
        let ring = PcmRing::new();
        for tag in 0..12 {
            ring.push(&block(tag));
        }
        let mut out = [0i16; PCM_BLOCK_LEN];
        let held = ring.slots[4].lock().unwrap();
        assert_eq!(ring.pull(&mut out), PullKind::Duplicated);
        drop(held);
        assert_eq!(ring.pull(&mut out), PullKind::Normal);
        assert_eq!(out, block(4));
        assert_eq!(ring.stats().resyncs, 1);
    }

    #[test]
    fn steady_state_delivers_in_order() {
        let ring = PcmRing::new();
        let mut next_tag = 0i16;
        for _ in 0..RESYNC_LAG {
            ring.push(&block(next_tag));
            next_tag += 1;
        }
        let mut out = [0i16; PCM_BLOCK_LEN];
        let mut delivered = Vec::new();
        ring.pull(&mut out);
        delivered.push(out[0]);
        for _ in 0..200 {
            ring.push(&block(next_tag));
            next_tag += 1;
            assert_eq!(ring.pull(&mut out), PullKind::Normal);
            delivered.push(out[0]);
        }
        let expected: Vec<i16> = (0..delivered.len() as i16).collect();
        assert_eq!(delivered, expected);
        let stats = ring.stats();
        assert_eq!((stats.dropped, stats.duplicated), (0, 0));
        assert_eq!(stats.consumed, 201);
    }

    #[test]
    fn drain_stops_at_writer() {
        let ring = PcmRing::new();
        ring.push(&block(1));
        ring.push(&block(2));
        let mut out = [0i16; PCM_BLOCK_LEN];
        assert!(ring.pull_remaining(&mut out));
        assert_eq!(out[0], 1);
        assert!(ring.pull_remaining(&mut out));
        assert_eq!(out[0], 2);
        assert!(!ring.pull_remaining(&mut out));
    }

    #[test]
    fn short_blocks_are_zero_padded() {
        let ring = PcmRing::new();
        ring.push(&block(9));
        ring.push(&[5, 5, 5]);
        ring.set_indices(2, 1);
        let mut out = [7i16; PCM_BLOCK_LEN];
        assert!(ring.pull_remaining(&mut out));
        assert_eq!(&out[..3], &[5, 5, 5]);
        assert!(out[3..].iter().all(|&s| s == 0));
    }

    #[test]
    fn concurrent_blocks_are_never_torn() {
        let ring = Arc::new(PcmRing::new());
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for tag in 0..2_000 {
                    ring.push(&block((tag % 1000) as i16));
                }
            })
        };
        let mut out = [0i16; PCM_BLOCK_LEN];
        for _ in 0..2_000 {
            ring.pull(&mut out);
            assert!(out.iter().all(|&s| s == out[0]), "torn block");
        }
        producer.join().unwrap();
        assert_eq!(ring.stats().produced, 2_000);
    }

    #[test]
    fn reset_rearms_resync() {
        let ring = filled_ring();
        let mut out = [0i16; PCM_BLOCK_LEN];
        ring.pull(&mut out);
        ring.reset();
        assert_eq!(ring.stats(), RingStats::default());
        assert_eq!(ring.pull(&mut out), PullKind::Resync);
        assert_eq!(out, [0; PCM_BLOCK_LEN]);
    }
}

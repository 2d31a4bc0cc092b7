//! Playback scheduling for streamed model audio
//!
//! A single cursor marks where the next buffer starts on the output clock.
//! Buffers are laid end to end; when the network falls behind and the cursor
//! slips into the past it snaps forward to "now" instead of accumulating lag.

use crate::pcm;
use std::collections::VecDeque;
use tracing::debug;

/// A buffer handed to the speaker, with its slot on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: u64,
    /// Start time in seconds on the output clock.
    pub start: f64,
    /// End time in seconds on the output clock.
    pub end: f64,
}

impl ScheduledBuffer {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Ordered set of scheduled-but-unfinished output buffers.
#[derive(Debug)]
pub struct PlaybackQueue {
    sample_rate: u32,
    cursor: f64,
    next_id: u64,
    pending: VecDeque<ScheduledBuffer>,
    underruns: u64,
    /// A turn is streaming; falling behind now is an underrun.
    in_turn: bool,
}

impl PlaybackQueue {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            cursor: 0.0,
            next_id: 0,
            pending: VecDeque::new(),
            underruns: 0,
            in_turn: false,
        }
    }

    /// Queue sized for the Live API's output rate.
    pub fn for_output() -> Self {
        Self::new(pcm::OUTPUT_SAMPLE_RATE)
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of times the cursor had to snap forward to the clock.
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Forget everything and park the cursor at `now`.
    pub fn reset(&mut self, now: f64) {
        self.pending.clear();
        self.cursor = now;
        self.in_turn = false;
    }

    /// The model finished speaking; silence until its next turn is expected.
    pub fn end_turn(&mut self) {
        self.in_turn = false;
    }

    /// Reserve the next slot for a buffer of `samples` samples.
    pub fn schedule(&mut self, samples: usize, now: f64) -> ScheduledBuffer {
        if self.cursor < now {
            if self.in_turn {
                self.underruns += 1;
                debug!(
                    "Playback underrun: cursor {:.3}s behind clock {:.3}s",
                    now - self.cursor,
                    now
                );
            }
            self.cursor = now;
        }

        let start = self.cursor;
        let end = start + pcm::chunk_duration(samples, self.sample_rate);
        let buffer = ScheduledBuffer {
            id: self.next_id,
            start,
            end,
        };
        self.next_id += 1;
        self.cursor = end;
        self.in_turn = true;
        self.pending.push_back(buffer);
        buffer
    }

    /// Drop buffers that have finished playing by `now`. Returns how many.
    pub fn reap(&mut self, now: f64) -> usize {
        let mut finished = 0;
        while self.pending.front().is_some_and(|b| b.end <= now) {
            self.pending.pop_front();
            finished += 1;
        }
        finished
    }

    /// Barge-in: hand back every unfinished buffer and move the cursor to `now`.
    pub fn interrupt(&mut self, now: f64) -> Vec<ScheduledBuffer> {
        self.reap(now);
        let cut: Vec<ScheduledBuffer> = self.pending.drain(..).collect();
        self.cursor = now;
        self.in_turn = false;
        cut
    }
}

//! Output audio context
//!
//! A speaker owns a clock and accepts buffers stamped with a start time on that
//! clock. The PulseAudio implementation runs a playback thread that waits for
//! each buffer's start time and writes it out in short slices. Written buffers
//! are remembered until they have finished sounding, so stopping one that is
//! already in the server's buffer flushes it.

use crate::capture::{classify_pa_error, join_audio_thread, pa_detail};
use crate::error::DeviceError;
use crate::events::{Epoch, EventSender, SessionEvent};
use crate::pcm;
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::collections::VecDeque;
use std::sync::mpsc::{self, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 20ms at the output rate.
const WRITE_SLICE_SAMPLES: usize = 480;
const MAX_IDLE_WAIT: Duration = Duration::from_millis(5);

pub trait Speaker: Send {
    /// Seconds since this output context was created.
    fn current_time(&self) -> f64;

    /// Play `samples` starting at `start_at` on this speaker's clock.
    fn play(&mut self, id: u64, samples: Vec<f32>, start_at: f64);

    /// Stop buffer `id` now, whether it started or not.
    fn stop(&mut self, id: u64);

    /// Release the output device. Safe to call more than once.
    fn close(&mut self);
}

/// Opens one output context per session.
pub trait SpeakerSource: Send {
    /// Losing the device after this returns is posted as `DeviceLost`
    /// tagged with `epoch`.
    fn open(&self, epoch: Epoch, events: EventSender) -> Result<Box<dyn Speaker>, DeviceError>;
}

#[derive(Debug, Clone)]
pub struct PulseSpeakerSource {
    app_name: String,
}

impl PulseSpeakerSource {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
        }
    }
}

impl SpeakerSource for PulseSpeakerSource {
    fn open(&self, epoch: Epoch, events: EventSender) -> Result<Box<dyn Speaker>, DeviceError> {
        let origin = Instant::now();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (command_tx, command_rx) = mpsc::channel();
        let app_name = self.app_name.clone();
        let lost = DeviceLostNotice { epoch, events };

        let handle = std::thread::Builder::new()
            .name("bankedge-playback".to_string())
            .spawn(move || run_playback(app_name, origin, ready_tx, command_rx, lost))
            .map_err(|e| DeviceError::Other(format!("failed to spawn playback thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Playback context opened at {} Hz", pcm::OUTPUT_SAMPLE_RATE);
                Ok(Box::new(PulseSpeaker {
                    origin,
                    command_tx: Some(command_tx),
                    handle: Some(handle),
                }))
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(DeviceError::Other("playback thread exited during open".to_string()))
            }
        }
    }
}

struct DeviceLostNotice {
    epoch: Epoch,
    events: EventSender,
}

#[derive(Debug)]
enum PlaybackCommand {
    Play {
        id: u64,
        samples: Vec<f32>,
        start_at: f64,
    },
    Stop(u64),
    Close,
}

#[derive(Debug)]
struct QueuedBuffer {
    id: u64,
    samples: Vec<f32>,
    start_at: f64,
    offset: usize,
    started_at: f64,
}

/// A buffer fully handed to the server that may still be audible.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Sounding {
    id: u64,
    end: f64,
}

#[derive(Debug, PartialEq)]
enum Step {
    Idle,
    Wait(Duration),
    Write(Vec<f32>),
}

/// What the playback thread has queued, and what it has already written.
#[derive(Debug)]
struct OutputTimeline {
    sample_rate: u32,
    queue: VecDeque<QueuedBuffer>,
    sounding: VecDeque<Sounding>,
}

impl OutputTimeline {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            queue: VecDeque::new(),
            sounding: VecDeque::new(),
        }
    }

    fn push(&mut self, id: u64, samples: Vec<f32>, start_at: f64) {
        self.queue.push_back(QueuedBuffer {
            id,
            samples,
            start_at,
            offset: 0,
            started_at: start_at,
        });
    }

    /// Nothing left to write.
    fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    fn reap(&mut self, now: f64) {
        while self.sounding.front().is_some_and(|s| s.end <= now) {
            self.sounding.pop_front();
        }
    }

    /// Drop buffer `id`. Returns true when written audio must be flushed.
    fn stop(&mut self, id: u64, now: f64) -> bool {
        self.reap(now);
        if let Some(pos) = self.queue.iter().position(|b| b.id == id) {
            let started = self.queue[pos].offset > 0;
            self.queue.remove(pos);
            if started {
                self.sounding.clear();
            }
            return started;
        }
        if let Some(pos) = self.sounding.iter().position(|s| s.id == id) {
            self.sounding.remove(pos);
            // A flush drops everything the server holds.
            self.sounding.clear();
            return true;
        }
        false
    }

    /// Decide what the playback thread does next at `now`.
    fn next(&mut self, now: f64) -> Step {
        self.reap(now);
        let last_end = self.sounding.back().map(|s| s.end);
        let Some(front) = self.queue.front_mut() else {
            return Step::Idle;
        };

        if front.offset == 0 {
            let wait = front.start_at - now;
            if wait > 0.0 {
                return Step::Wait(Duration::from_secs_f64(wait).min(MAX_IDLE_WAIT));
            }
            // The server plays written audio in order, so a late buffer starts
            // after whatever is still sounding.
            front.started_at = last_end.map_or(now, |end| end.max(now));
        }

        let end = (front.offset + WRITE_SLICE_SAMPLES).min(front.samples.len());
        let slice = front.samples[front.offset..end].to_vec();
        front.offset = end;

        if front.offset >= front.samples.len() {
            if let Some(done) = self.queue.pop_front() {
                let duration = pcm::chunk_duration(done.samples.len(), self.sample_rate);
                self.sounding.push_back(Sounding {
                    id: done.id,
                    end: done.started_at + duration,
                });
            }
        }
        Step::Write(slice)
    }
}

fn run_playback(
    app_name: String,
    origin: Instant,
    ready: mpsc::SyncSender<Result<(), DeviceError>>,
    commands: mpsc::Receiver<PlaybackCommand>,
    lost: DeviceLostNotice,
) {
    let spec = Spec {
        format: Format::F32le,
        channels: 1,
        rate: pcm::OUTPUT_SAMPLE_RATE,
    };

    let simple = match Simple::new(
        None,
        &app_name,
        Direction::Playback,
        None,
        "interviewer",
        &spec,
        None,
        None,
    ) {
        Ok(simple) => simple,
        Err(e) => {
            warn!("Failed to open playback stream: {:?}", e);
            let _ = ready.send(Err(classify_pa_error(e)));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let now = || origin.elapsed().as_secs_f64();
    let mut timeline = OutputTimeline::new(pcm::OUTPUT_SAMPLE_RATE);
    loop {
        let command = if timeline.is_drained() {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        } else {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        };

        if let Some(command) = command {
            match command {
                PlaybackCommand::Play {
                    id,
                    samples,
                    start_at,
                } => timeline.push(id, samples, start_at),
                PlaybackCommand::Stop(id) => {
                    if timeline.stop(id, now()) {
                        debug!("Flushing playback for buffer {}", id);
                        if let Err(e) = simple.flush() {
                            warn!("Playback flush failed: {:?}", e);
                        }
                    }
                }
                PlaybackCommand::Close => break,
            }
            continue;
        }

        match timeline.next(now()) {
            Step::Idle => {}
            Step::Wait(wait) => std::thread::sleep(wait),
            Step::Write(samples) => {
                let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                if let Err(e) = simple.write(&bytes) {
                    error!("Playback write failed: {:?}", e);
                    let _ = lost.events.send(SessionEvent::DeviceLost {
                        epoch: lost.epoch,
                        error: DeviceError::Disconnected(pa_detail(e)),
                    });
                    return;
                }
            }
        }
    }

    let _ = simple.flush();
    debug!("Playback thread exiting");
}

/// Handle on the playback thread.
pub struct PulseSpeaker {
    origin: Instant,
    command_tx: Option<mpsc::Sender<PlaybackCommand>>,
    handle: Option<JoinHandle<()>>,
}

impl PulseSpeaker {
    fn command(&self, command: PlaybackCommand) {
        if let Some(tx) = &self.command_tx {
            if tx.send(command).is_err() {
                warn!("Playback thread is gone");
            }
        }
    }
}

impl Speaker for PulseSpeaker {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn play(&mut self, id: u64, samples: Vec<f32>, start_at: f64) {
        self.command(PlaybackCommand::Play {
            id,
            samples,
            start_at,
        });
    }

    fn stop(&mut self, id: u64) {
        self.command(PlaybackCommand::Stop(id));
    }

    fn close(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(PlaybackCommand::Close);
        }
        if let Some(handle) = self.handle.take() {
            join_audio_thread(handle, "Playback");
        }
    }
}

impl Drop for PulseSpeaker {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Write everything that is due at `now`.
    fn write_all(timeline: &mut OutputTimeline, now: f64) -> usize {
        let mut written = 0;
        while let Step::Write(slice) = timeline.next(now) {
            written += slice.len();
        }
        written
    }

    #[test]
    fn waits_for_start_time() {
        let mut timeline = OutputTimeline::new(24_000);
        timeline.push(0, vec![0.0; 2400], 1.0);

        assert_eq!(timeline.next(0.5), Step::Wait(MAX_IDLE_WAIT));
        match timeline.next(1.0) {
            Step::Write(slice) => assert_eq!(slice.len(), WRITE_SLICE_SAMPLES),
            other => panic!("expected a write, got {other:?}"),
        }
    }

    #[test]
    fn written_buffer_is_flushed_when_stopped_mid_play() {
        let mut timeline = OutputTimeline::new(24_000);
        timeline.push(0, vec![0.1; 12_000], 0.0);

        assert_eq!(write_all(&mut timeline, 0.0), 12_000);
        assert!(timeline.is_drained());
        assert_eq!(timeline.next(0.0), Step::Idle);

        // Still sounding at 0.1s of 0.5s.
        assert!(timeline.stop(0, 0.1));
        assert!(!timeline.stop(0, 0.1));
    }

    #[test]
    fn finished_buffer_needs_no_flush() {
        let mut timeline = OutputTimeline::new(24_000);
        timeline.push(0, vec![0.1; 12_000], 0.0);
        write_all(&mut timeline, 0.0);

        assert!(!timeline.stop(0, 0.6));
    }

    #[test]
    fn unstarted_buffer_is_dropped_without_flush() {
        let mut timeline = OutputTimeline::new(24_000);
        timeline.push(0, vec![0.1; 2400], 0.0);
        timeline.push(1, vec![0.1; 2400], 0.1);

        assert!(!timeline.stop(1, 0.0));
        assert_eq!(write_all(&mut timeline, 0.0), 2400);
        assert_eq!(write_all(&mut timeline, 5.0), 0);
    }

    #[test]
    fn partially_written_buffer_is_flushed() {
        let mut timeline = OutputTimeline::new(24_000);
        timeline.push(0, vec![0.1; 2400], 0.0);
        assert!(matches!(timeline.next(0.0), Step::Write(_)));

        assert!(timeline.stop(0, 0.01));
        assert!(timeline.is_drained());
    }

    #[test]
    fn late_buffer_sounds_after_the_previous_one() {
        let mut timeline = OutputTimeline::new(24_000);
        timeline.push(0, vec![0.0; 24_000], 0.0);
        timeline.push(1, vec![0.0; 24_000], 0.5);
        write_all(&mut timeline, 0.0);
        write_all(&mut timeline, 0.6);

        let ends: Vec<f64> = timeline.sounding.iter().map(|s| s.end).collect();
        assert_abs_diff_eq!(ends[0], 1.0);
        assert_abs_diff_eq!(ends[1], 2.0);

        // At 1.5s only the second is audible, and stopping it flushes.
        assert!(timeline.stop(1, 1.5));
    }
}

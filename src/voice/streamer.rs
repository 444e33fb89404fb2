// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use ringbuf::traits::{Observer, Producer};
use ringbuf::HeapProd;
use tracing::{debug, warn};

use super::VoiceShared;
use crate::audio::sample_source::{SampleSource, SampleSourceError};

/// Largest chunk decoded in one go.
const CHUNK_FRAMES: usize = 4096;

/// Don't bother decoding until at least this much of the ring is free.
const MIN_WRITE_FRAMES: usize = 1024;

/// Wait between polls while the renderer is expected to flush the ring.
const HANDSHAKE_WAIT: Duration = Duration::from_millis(1);

/// Wait between polls while the ring is full or nothing is loaded.
const IDLE_WAIT: Duration = Duration::from_millis(5);

pub(super) enum StreamCommand {
    Load {
        source: Box<dyn SampleSource>,
        generation: u64,
    },
    Shutdown,
}

/// What a single step of streaming accomplished.
enum Step {
    Busy,
    Waiting,
    Idle,
}

/// Decodes a voice's source into its look-ahead ring. Runs on the voice's
/// own thread and is the only writer of the ring.
pub(super) struct Streamer {
    index: usize,
    shared: Arc<VoiceShared>,
    producer: HeapProd<[f32; 2]>,
    commands: Receiver<StreamCommand>,
    done: Sender<()>,
    source: Option<Box<dyn SampleSource>>,
    generation: u64,
    /// Epoch stamped on the frames being written.
    epoch: u64,
    /// Set when a new source arrived and the ring must be flushed.
    resync: bool,
    finished: bool,
    frames_since_rewind: usize,
    planar: Vec<Vec<f32>>,
    frames: Vec<[f32; 2]>,
}

impl Streamer {
    pub(super) fn new(
        index: usize,
        shared: Arc<VoiceShared>,
        producer: HeapProd<[f32; 2]>,
        commands: Receiver<StreamCommand>,
        done: Sender<()>,
    ) -> Streamer {
        Streamer {
            index,
            shared,
            producer,
            commands,
            done,
            source: None,
            generation: 0,
            epoch: 0,
            resync: false,
            finished: true,
            frames_since_rewind: 0,
            planar: Vec::new(),
            frames: Vec::with_capacity(CHUNK_FRAMES),
        }
    }

    pub(super) fn run(mut self) {
        debug!(voice = self.index, "Streaming thread started");

        'stream: loop {
            loop {
                match self.commands.try_recv() {
                    Ok(command) => {
                        if !self.handle(command) {
                            break 'stream;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'stream,
                }
            }

            let wait = match self.step() {
                Step::Busy => continue,
                Step::Waiting => HANDSHAKE_WAIT,
                Step::Idle => IDLE_WAIT,
            };

            // Restarts and commands unpark the thread.
            thread::park_timeout(wait);
        }

        // Detach the source before signalling so that it's released by the
        // time shutdown returns.
        self.source = None;
        debug!(voice = self.index, "Streaming thread stopped");
        let _ = self.done.send(());
    }

    /// Returns false if the thread should exit.
    fn handle(&mut self, command: StreamCommand) -> bool {
        match command {
            StreamCommand::Load { source, generation } => {
                let channels = source.channel_count().max(1) as usize;
                self.planar = vec![Vec::with_capacity(CHUNK_FRAMES); channels];
                self.source = Some(source);
                self.generation = generation;
                self.resync = true;
                true
            }
            StreamCommand::Shutdown => false,
        }
    }

    fn step(&mut self) -> Step {
        let target = self.shared.requested_epoch.load(Ordering::Acquire);
        if self.resync || target != self.epoch {
            return self.resync_to(target);
        }
        if self.finished {
            return Step::Idle;
        }

        match self.fill() {
            Ok(step) => step,
            Err(e) => {
                warn!(voice = self.index, error = %e, "Error reading sample, stopping voice");
                self.finish();
                Step::Idle
            }
        }
    }

    /// Flushes the ring and restarts the source for a new epoch.
    fn resync_to(&mut self, target: u64) -> Step {
        // A restart can be requested before the source it's meant for has
        // arrived. Wait for it rather than replaying the old one.
        if self.generation != self.shared.generation.load(Ordering::Acquire) {
            return Step::Waiting;
        }

        if self.shared.flush_epoch.load(Ordering::Relaxed) != target {
            self.shared.flush_epoch.store(target, Ordering::Release);
        }
        if self.shared.acked_epoch.load(Ordering::Acquire) != target {
            return Step::Waiting;
        }

        let rewound = match self.source.as_mut() {
            Some(source) => {
                self.shared
                    .source_rate
                    .store(source.sample_rate(), Ordering::Relaxed);
                match source.rewind() {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(voice = self.index, error = %e, "Unable to rewind sample");
                        false
                    }
                }
            }
            None => false,
        };

        self.finished = !rewound;
        self.frames_since_rewind = 0;
        self.shared.finished.store(!rewound, Ordering::Release);
        self.shared.ring_epoch.store(target, Ordering::Release);
        self.epoch = target;
        self.resync = false;
        Step::Busy
    }

    fn fill(&mut self) -> Result<Step, SampleSourceError> {
        let Some(source) = self.source.as_mut() else {
            return Ok(Step::Idle);
        };

        let space = self.producer.vacant_len();
        if space < MIN_WRITE_FRAMES {
            return Ok(Step::Idle);
        }

        let read = source.next_chunk(&mut self.planar, space.min(CHUNK_FRAMES))?;
        if read == 0 {
            if self.shared.looping.load(Ordering::Relaxed) && self.frames_since_rewind > 0 {
                source.rewind()?;
                self.frames_since_rewind = 0;
                return Ok(Step::Busy);
            }
            self.finish();
            return Ok(Step::Idle);
        }
        self.frames_since_rewind += read;

        self.frames.clear();
        match self.planar.as_slice() {
            [mono] => self.frames.extend(mono[..read].iter().map(|s| [*s, *s])),
            [left, right, ..] => self
                .frames
                .extend(left[..read].iter().zip(&right[..read]).map(|(l, r)| [*l, *r])),
            [] => return Ok(Step::Idle),
        }

        let written = self.producer.push_slice(&self.frames);
        debug_assert_eq!(written, read);
        Ok(Step::Busy)
    }

    fn finish(&mut self) {
        self.finished = true;
        self.shared.finished.store(true, Ordering::Release);
    }
}

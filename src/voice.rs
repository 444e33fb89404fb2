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

//! Streaming sample voices.
//!
//! A voice is split three ways:
//! - [`Voice`], the control handle used from non-real-time threads.
//! - A streaming thread that decodes the loaded source into a look-ahead ring.
//! - [`VoiceRenderer`], owned by the audio callback, which resamples from the
//!   ring into the mix.
//!
//! They share a block of atomics ([`VoiceShared`]). Restarting or reloading
//! bumps the requested epoch; the streaming thread then asks the renderer to
//! flush the ring, waits for the acknowledgement, rewinds and stamps the new
//! epoch before writing. The renderer only plays frames once the ring's epoch
//! matches the requested one, so frames from a previous start or a previous
//! source are never heard.

mod pool;
mod renderer;
mod streamer;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use ringbuf::traits::Split;
use ringbuf::HeapRb;
use tracing::{debug, error, info, warn};

use crate::audio::sample_source::{create_sample_source_from_file, SampleSource};
use crate::error::EngineError;

pub use pool::VoicePool;
pub(crate) use pool::PoolTrigger;
pub use renderer::VoiceRenderer;
use streamer::{StreamCommand, Streamer};

/// Number of voices in the pool.
pub const NUM_VOICES: usize = 32;

/// Frames each voice decodes ahead of playback.
pub const LOOKAHEAD_FRAMES: usize = 32768;

/// Default budget for joining a voice's streaming thread.
pub const DEFAULT_JOIN_BUDGET: Duration = Duration::from_millis(100);

/// State shared by a voice's control handle, streaming thread and renderer.
pub(crate) struct VoiceShared {
    playing: AtomicBool,
    loaded: AtomicBool,
    looping: AtomicBool,
    gain: AtomicU32,
    rate: AtomicU64,
    /// Bumped on every restart and reload.
    requested_epoch: AtomicU64,
    /// Epoch the streaming thread wants the ring flushed for.
    flush_epoch: AtomicU64,
    /// Last flush the renderer performed.
    acked_epoch: AtomicU64,
    /// Epoch of the frames currently being written to the ring.
    ring_epoch: AtomicU64,
    /// Epoch whose source ran out during playback.
    ended_epoch: AtomicU64,
    /// Bumped before each new source is handed to the streaming thread.
    generation: AtomicU64,
    /// The current ring epoch has no more frames coming.
    finished: AtomicBool,
    source_rate: AtomicU32,
    position: AtomicU64,
    /// Unparked when there's work for the streaming thread.
    streamer: OnceLock<Thread>,
}

impl VoiceShared {
    fn new() -> VoiceShared {
        VoiceShared {
            playing: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            gain: AtomicU32::new(1.0f32.to_bits()),
            rate: AtomicU64::new(1.0f64.to_bits()),
            requested_epoch: AtomicU64::new(0),
            flush_epoch: AtomicU64::new(0),
            acked_epoch: AtomicU64::new(0),
            ring_epoch: AtomicU64::new(0),
            ended_epoch: AtomicU64::new(u64::MAX),
            generation: AtomicU64::new(0),
            finished: AtomicBool::new(true),
            source_rate: AtomicU32::new(0),
            position: AtomicU64::new(0),
            streamer: OnceLock::new(),
        }
    }

    pub(crate) fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub(crate) fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Relaxed))
    }

    pub(crate) fn set_rate(&self, rate: f64) {
        self.rate.store(rate.to_bits(), Ordering::Relaxed);
    }

    /// Plays from the first frame, cutting off anything already playing.
    /// Safe to call from the audio callback.
    pub(crate) fn restart(&self) {
        if !self.loaded.load(Ordering::Acquire) {
            return;
        }
        self.requested_epoch.fetch_add(1, Ordering::AcqRel);
        self.playing.store(true, Ordering::Release);
        self.wake();
    }

    /// Wakes the streaming thread without blocking.
    fn wake(&self) {
        if let Some(thread) = self.streamer.get() {
            thread.unpark();
        }
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
            && self.ended_epoch.load(Ordering::Acquire)
                != self.requested_epoch.load(Ordering::Acquire)
    }
}

/// Details about the source loaded into a voice.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    /// The file the source was opened from, if any.
    pub path: Option<PathBuf>,
    pub channels: u16,
    pub sample_rate: u32,
    pub duration: Option<Duration>,
}

/// Control handle for one voice.
pub struct Voice {
    index: usize,
    shared: Arc<VoiceShared>,
    commands: Sender<StreamCommand>,
    done: Receiver<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
    /// Also serializes loads.
    source: Mutex<Option<SourceInfo>>,
    join_budget: Duration,
}

impl Voice {
    /// Creates a voice and starts its streaming thread. The renderer must be
    /// handed to whatever drives the audio callback.
    pub(crate) fn spawn(
        index: usize,
        join_budget: Duration,
    ) -> Result<(Voice, VoiceRenderer), EngineError> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let (producer, consumer) = HeapRb::<[f32; 2]>::new(LOOKAHEAD_FRAMES).split();

        let shared = Arc::new(VoiceShared::new());
        let renderer = VoiceRenderer::new(shared.clone(), consumer)?;
        let streamer = Streamer::new(index, shared.clone(), producer, command_rx, done_tx);

        let thread = thread::Builder::new()
            .name(format!("voice-{}", index))
            .spawn(move || streamer.run())?;
        let _ = shared.streamer.set(thread.thread().clone());

        Ok((
            Voice {
                index,
                shared,
                commands: command_tx,
                done: done_rx,
                thread: Mutex::new(Some(thread)),
                source: Mutex::new(None),
                join_budget,
            },
            renderer,
        ))
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Stops playback and replaces the voice's source with the given file.
    ///
    /// If the file can't be opened the previous source stays loaded (stopped)
    /// and [`EngineError::FileLoad`] is returned.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<(), EngineError> {
        let path = path.as_ref();
        let mut info = self.source.lock();
        self.set_playing(false);

        let source = create_sample_source_from_file(path).map_err(|e| {
            warn!(voice = self.index, path = ?path, error = %e, "Failed to load sample");
            EngineError::FileLoad {
                path: path.to_path_buf(),
                source: e,
            }
        })?;

        self.install(&mut info, source, Some(path.to_path_buf()))
    }

    /// Stops playback and replaces the voice's source with one that is
    /// already open.
    pub fn load_source(&self, source: Box<dyn SampleSource>) -> Result<(), EngineError> {
        let mut info = self.source.lock();
        self.set_playing(false);
        self.install(&mut info, source, None)
    }

    fn install(
        &self,
        info: &mut Option<SourceInfo>,
        source: Box<dyn SampleSource>,
        path: Option<PathBuf>,
    ) -> Result<(), EngineError> {
        let loaded = SourceInfo {
            path,
            channels: source.channel_count(),
            sample_rate: source.sample_rate(),
            duration: source.duration(),
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.commands
            .send(StreamCommand::Load { source, generation })
            .map_err(|_| EngineError::Precondition("voice streaming thread is not running"))?;
        self.shared.requested_epoch.fetch_add(1, Ordering::AcqRel);

        self.shared.looping.store(false, Ordering::Relaxed);
        self.shared.loaded.store(true, Ordering::Release);
        self.shared.wake();

        info!(
            voice = self.index,
            path = ?loaded.path,
            channels = loaded.channels,
            sample_rate = loaded.sample_rate,
            "Loaded sample"
        );
        *info = Some(loaded);
        Ok(())
    }

    /// Starting always plays from the first frame, even if the voice is
    /// already playing. Starting a voice with nothing loaded does nothing.
    /// Stopping keeps the position until the next start.
    pub fn set_playing(&self, playing: bool) {
        if playing {
            self.shared.restart();
        } else {
            self.shared.playing.store(false, Ordering::Release);
        }
    }

    /// False once stopped or once a non-looping source has played out.
    pub fn is_playing(&self) -> bool {
        self.shared.is_playing()
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.loaded.load(Ordering::Acquire)
    }

    pub fn set_looping(&self, looping: bool) -> Result<(), EngineError> {
        if !self.is_loaded() {
            return Err(EngineError::Precondition("no source loaded"));
        }
        self.shared.looping.store(looping, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_looping(&self) -> Result<bool, EngineError> {
        if !self.is_loaded() {
            return Err(EngineError::Precondition("no source loaded"));
        }
        Ok(self.shared.looping.load(Ordering::Relaxed))
    }

    /// Sets the output gain, clamped to [0, 1]. Applies from the next block.
    pub fn set_gain(&self, gain: f32) {
        let gain = if gain.is_nan() { 0.0 } else { gain.clamp(0.0, 1.0) };
        self.shared.set_gain(gain);
    }

    pub fn gain(&self) -> f32 {
        self.shared.gain()
    }

    /// Sets the playback rate relative to the reference pitch.
    pub fn set_playback_rate(&self, rate: f64) -> Result<(), EngineError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(EngineError::Precondition("playback rate must be positive"));
        }
        self.shared.set_rate(rate);
        Ok(())
    }

    pub fn playback_rate(&self) -> f64 {
        self.shared.rate()
    }

    /// Source frames played since the last start.
    pub fn position(&self) -> u64 {
        self.shared.position.load(Ordering::Relaxed)
    }

    pub fn source_info(&self) -> Option<SourceInfo> {
        self.source.lock().clone()
    }

    /// Stops playback, detaches the source and joins the streaming thread
    /// within the voice's join budget.
    pub(crate) fn shutdown(&self) -> Result<(), EngineError> {
        self.shared.playing.store(false, Ordering::Release);

        let Some(thread) = self.thread.lock().take() else {
            return Ok(());
        };

        if self.commands.send(StreamCommand::Shutdown).is_err() {
            debug!(voice = self.index, "Streaming thread already gone");
        }
        self.shared.wake();

        match self.done.recv_timeout(self.join_budget) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    error!(voice = self.index, "Streaming thread panicked");
                }
                self.shared.loaded.store(false, Ordering::Release);
                *self.source.lock() = None;
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    voice = self.index,
                    budget = ?self.join_budget,
                    "Streaming thread did not stop in time"
                );
                Err(EngineError::ShutdownTimeout {
                    thread: "voice streaming",
                    budget: self.join_budget,
                })
            }
        }
    }
}

impl Drop for Voice {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

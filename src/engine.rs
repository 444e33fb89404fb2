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

//! The engine ties the pattern, scheduler, voices and clock together.
//!
//! [`Engine::new`] returns the control surface and an [`EngineProcessor`].
//! The processor is the audio callback; hand it to a device and keep the
//! [`Engine`] for everything else.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::Split;
use ringbuf::HeapRb;
use tracing::{debug, info, span, Level};

use crate::audio::mixer::Mixer;
use crate::audio::AudioCallback;
use crate::clock::UiClock;
use crate::config;
use crate::error::EngineError;
use crate::pattern::{Event, PatternGrid};
use crate::scheduler::{Scheduler, Tempo};
use crate::voice::{PoolTrigger, Voice, VoicePool, NUM_VOICES};

/// Row notifications buffered between the scheduler and the clock.
const ROW_QUEUE: usize = 64;

/// The engine's control surface. Everything here is safe to call from any
/// non-real-time thread.
pub struct Engine {
    tempo: Arc<Tempo>,
    grid: Arc<PatternGrid>,
    voices: VoicePool,
    clock: UiClock,
    invalid_events: Arc<AtomicU64>,
}

/// The real-time half of the engine.
pub struct EngineProcessor {
    scheduler: Scheduler,
    trigger: PoolTrigger,
    mixer: Mixer,
    sample_rate: u32,
}

impl Engine {
    /// Creates the engine: the voice pool, the clock thread and the
    /// configured voice assignments. The engine starts stopped.
    pub fn new(config: &config::Engine) -> Result<(Engine, EngineProcessor), EngineError> {
        let span = span!(Level::INFO, "engine");
        let _enter = span.enter();

        let tempo = Arc::new(Tempo::default());
        tempo.set_bpm(config.bpm())?;
        let grid = Arc::new(PatternGrid::new());

        let (voices, renderers) = VoicePool::new(NUM_VOICES, config.voice_join_budget()?)?;
        let (row_producer, row_consumer) = HeapRb::<usize>::new(ROW_QUEUE).split();
        let clock = UiClock::start(row_consumer, config.clock_join_budget()?)?;

        let scheduler =
            Scheduler::new(tempo.clone(), grid.clone()).with_row_notifications(row_producer);
        let invalid_events = scheduler.invalid_events();

        for assignment in config.voices() {
            let voice = voices.get(assignment.index())?;
            voice.load_file(assignment.file())?;
            voice.set_looping(assignment.looping())?;
        }

        let processor = EngineProcessor {
            scheduler,
            trigger: voices.trigger(),
            mixer: Mixer::new(renderers),
            sample_rate: config
                .audio()
                .and_then(|audio| audio.sample_rate())
                .unwrap_or(config::DEFAULT_SAMPLE_RATE),
        };

        info!(
            bpm = config.bpm(),
            voices = voices.len(),
            loaded = config.voices().len(),
            "Engine created"
        );

        Ok((
            Engine {
                tempo,
                grid,
                voices,
                clock,
                invalid_events,
            },
            processor,
        ))
    }

    /// Gets a voice. Indices outside [0, 32) are rejected.
    pub fn voice(&self, index: i32) -> Result<&Voice, EngineError> {
        self.voices.get(index)
    }

    pub fn voices(&self) -> &VoicePool {
        &self.voices
    }

    pub fn grid(&self) -> &PatternGrid {
        &self.grid
    }

    pub fn set_event(&self, row: usize, column: usize, event: Event) -> Result<(), EngineError> {
        self.grid.set(row, column, event)
    }

    pub fn get_event(&self, row: usize, column: usize) -> Result<Event, EngineError> {
        self.grid.get(row, column)
    }

    /// Sets the tempo. A non-positive tempo is rejected and the current one
    /// is kept.
    pub fn set_bpm(&self, bpm: i32) -> Result<(), EngineError> {
        self.tempo.set_bpm(bpm)?;
        debug!(bpm, ms_per_row = self.tempo.ms_per_row(), "Tempo changed");
        Ok(())
    }

    pub fn ms_per_row(&self) -> u32 {
        self.tempo.ms_per_row()
    }

    /// Starts or stops the transport. Starting always begins at row 0.
    pub fn set_run_state(&self, running: bool) {
        if running {
            self.clock.set_enabled(true);
            self.tempo.set_running(true);
        } else {
            self.tempo.set_running(false);
            self.clock.set_enabled(false);
        }
        info!(running, "Run state changed");
    }

    pub fn is_running(&self) -> bool {
        self.tempo.is_running()
    }

    /// Malformed cells the scheduler has skipped.
    pub fn invalid_event_count(&self) -> u64 {
        self.invalid_events.load(Ordering::Relaxed)
    }

    /// Registers the closure that receives each played row, replacing any
    /// previous one. Called on the clock thread.
    pub fn set_row_listener<F>(&self, listener: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.clock.set_listener(listener);
    }

    pub fn clear_row_listener(&self) {
        self.clock.clear_listener();
    }

    /// The last row relayed by the clock.
    pub fn current_row(&self) -> usize {
        self.clock.row()
    }

    /// Stops the transport, then the voices and the clock. Every part is
    /// attempted; the first failure is returned.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.set_run_state(false);
        let voices = self.voices.shutdown();
        let clock = self.clock.shutdown();
        info!("Engine shut down");
        voices.and(clock)
    }
}

impl EngineProcessor {
    /// Processes `num_frames` frames into an interleaved buffer with
    /// `channels` channels.
    pub fn process_frames(&mut self, output: &mut [f32], channels: usize, num_frames: usize) {
        let sample_rate = self.sample_rate;
        let Self {
            scheduler,
            trigger,
            mixer,
            ..
        } = self;

        scheduler.process_block(sample_rate, num_frames, trigger, |frames| {
            mixer.process_into_output(sample_rate, output, channels, frames)
        });
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioCallback for EngineProcessor {
    fn about_to_start(&mut self, sample_rate: u32, block_size: usize) {
        info!(sample_rate, block_size, "Engine processor starting");
        self.sample_rate = sample_rate;
    }

    fn process(&mut self, _input: &[f32], output: &mut [f32], num_frames: usize) {
        if num_frames == 0 {
            return;
        }
        let channels = output.len() / num_frames;
        self.process_frames(output, channels, num_frames);
    }

    fn stopped(&mut self) {
        info!("Engine processor stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::audio::sample_source::MemorySampleSource;
    use crate::audio::Device as _;
    use crate::testutil::{eventually, write_wav};

    const RATE: u32 = 44100;

    fn engine() -> (Engine, EngineProcessor) {
        let (engine, mut processor) = Engine::new(&config::Engine::default()).unwrap();
        processor.about_to_start(RATE, 512);
        (engine, processor)
    }

    fn constant(voice: &Voice, value: f32, frames: usize) {
        voice
            .load_source(Box::new(MemorySampleSource::new(vec![value; frames], 1, RATE)))
            .unwrap();
    }

    fn process(processor: &mut EngineProcessor, frames: usize) -> Vec<f32> {
        let mut output = vec![0.0f32; frames * 2];
        let mut offset = 0;
        while offset < frames {
            let count = (frames - offset).min(512);
            processor.process(&[], &mut output[offset * 2..(offset + count) * 2], count);
            offset += count;
        }
        output
    }

    #[test]
    fn test_starts_stopped_at_default_tempo() {
        let (engine, mut processor) = engine();
        assert!(!engine.is_running());
        assert_eq!(engine.ms_per_row(), 125);

        let output = process(&mut processor, 44100);
        assert!(output.iter().all(|s| *s == 0.0));
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_voice_bounds() {
        let (engine, _processor) = engine();
        assert!(engine.voice(0).is_ok());
        assert!(engine.voice(31).is_ok());
        assert!(matches!(engine.voice(32), Err(EngineError::InvalidVoiceIndex(32))));
        assert!(matches!(engine.voice(-1), Err(EngineError::InvalidVoiceIndex(-1))));
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_invalid_bpm_rejected() {
        let (engine, _processor) = engine();
        assert!(matches!(engine.set_bpm(0), Err(EngineError::InvalidTempo(0))));
        assert_eq!(engine.ms_per_row(), 125);
        engine.set_bpm(60).unwrap();
        assert_eq!(engine.ms_per_row(), 250);
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_row_triggers_voice() {
        let (engine, mut processor) = engine();
        let voice = engine.voice(3).unwrap();
        constant(voice, 0.5, RATE as usize);
        engine.set_event(0, 0, Event::new(1.5, 3, 0.8)).unwrap();
        engine.set_event(0, 1, Event::default()).unwrap();
        engine.set_run_state(true);

        process(&mut processor, 5511);
        assert!(!voice.is_playing());
        process(&mut processor, 1);
        assert!(voice.is_playing());
        assert_eq!(voice.playback_rate(), 1.5);
        assert_eq!(voice.gain(), 0.8);
        assert_eq!(engine.invalid_event_count(), 0);

        eventually(
            || process(&mut processor, 256).iter().any(|s| *s != 0.0),
            "Triggered voice was never heard",
        );
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_invalid_cells_counted() {
        let (engine, mut processor) = engine();
        engine.set_event(0, 0, Event::new(1.0, 40, 1.0)).unwrap();
        engine.set_event(0, 1, Event::new(-2.0, 1, 1.0)).unwrap();
        engine.set_run_state(true);

        process(&mut processor, 5512);
        assert_eq!(engine.invalid_event_count(), 2);
        assert!(!engine.voice(1).unwrap().is_playing());
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_row_listener() {
        let (engine, mut processor) = engine();
        let rows = Arc::new(Mutex::new(Vec::new()));
        {
            let rows = rows.clone();
            engine.set_row_listener(move |row| rows.lock().push(row));
        }
        engine.set_run_state(true);

        process(&mut processor, 5512 * 3);
        eventually(|| rows.lock().len() == 3, "Rows were not relayed");
        assert_eq!(*rows.lock(), vec![0, 1, 2]);
        assert_eq!(engine.current_row(), 2);

        // Stopping resets the scheduler; starting again begins at row 0.
        engine.set_run_state(false);
        process(&mut processor, 1);
        engine.set_run_state(true);
        assert_eq!(engine.current_row(), 0);
        process(&mut processor, 5512);
        eventually(|| rows.lock().len() == 4, "Row after restart was not relayed");
        assert_eq!(rows.lock()[3], 0);

        engine.shutdown().unwrap();
    }

    #[test]
    fn test_loads_configured_voices() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("kick.wav");
        write_wav(&file, &[vec![0.5; 4410]], RATE).unwrap();

        let path = dir.path().join("engine.yaml");
        std::fs::write(
            &path,
            "bpm: 140\nvoices:\n  - index: 2\n    file: kick.wav\n    looping: true\n",
        )
        .unwrap();
        let config = config::Engine::deserialize(&path).unwrap();

        let (engine, _processor) = Engine::new(&config).unwrap();
        let voice = engine.voice(2).unwrap();
        assert!(voice.is_loaded());
        assert!(voice.is_looping().unwrap());
        assert!(!voice.is_playing());
        assert_eq!(voice.source_info().unwrap().path, Some(file));
        assert!(!engine.voice(1).unwrap().is_loaded());
        assert_eq!(engine.ms_per_row(), (60000 / 140) / 4);
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_missing_configured_voice() {
        let config = config::Engine::default().with_voice(config::Voice::new(
            0,
            "/nonexistent/steptrack/kick.wav".into(),
        ));
        assert!(matches!(
            Engine::new(&config),
            Err(EngineError::FileLoad { .. })
        ));
    }

    #[test]
    fn test_plays_through_mock_device() {
        let audio = config::Audio::new("mock-device");
        let device = crate::audio::mock::Device::get(&audio);
        let (engine, processor) = Engine::new(&config::Engine::new(Some(audio))).unwrap();
        constant(engine.voice(0).unwrap(), 0.5, RATE as usize);
        engine.set_event(0, 0, Event::new(1.0, 0, 1.0)).unwrap();

        let stream = device.start(Box::new(processor)).unwrap();
        engine.set_run_state(true);
        eventually(|| device.peak() > 0.4, "Mock device never heard the voice");
        stream.stop();

        assert!(device.frames_processed() > 0);
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_within_budget() {
        let (engine, _processor) = engine();
        constant(engine.voice(0).unwrap(), 0.1, 1024);
        engine.set_run_state(true);
        let start = std::time::Instant::now();
        engine.shutdown().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!engine.is_running());
        assert!(!engine.voice(0).unwrap().is_loaded());
    }
}

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

//! Sample-accurate row scheduling.
//!
//! The scheduler runs inside the audio callback. It counts processed samples,
//! and whenever a row's worth of samples has elapsed it reads that row of the
//! pattern grid and triggers voices. Tempo and run state are written from
//! control threads through [`Tempo`]; the counters belong to the audio thread.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::Producer;
use ringbuf::HeapProd;

use crate::error::EngineError;
use crate::pattern::{PatternGrid, NO_SAMPLE, ROWS};

/// Tempo the engine starts at.
pub const DEFAULT_BPM: i32 = 120;

/// Rows are sixteenth notes.
const ROWS_PER_BEAT: u32 = 4;

/// Milliseconds per row for the given tempo: `floor(floor(60000 / bpm) / 4)`.
/// Tempos too fast for a whole millisecond per row are rejected.
pub fn ms_per_row(bpm: i32) -> Result<u32, EngineError> {
    if bpm <= 0 {
        return Err(EngineError::InvalidTempo(bpm));
    }
    match (60_000 / bpm as u32) / ROWS_PER_BEAT {
        0 => Err(EngineError::InvalidTempo(bpm)),
        ms => Ok(ms),
    }
}

/// Samples that make up one row: `floor(sample_rate / 1000 * ms_per_row)`,
/// never less than one.
pub fn samples_per_row(sample_rate: u32, ms_per_row: u32) -> u64 {
    ((sample_rate as f64 / 1000.0 * ms_per_row as f64).floor() as u64).max(1)
}

/// Tempo and transport state shared between control threads and the audio
/// callback.
#[derive(Debug)]
pub struct Tempo {
    ms_per_row: AtomicU32,
    running: AtomicBool,
}

impl Default for Tempo {
    fn default() -> Self {
        Tempo {
            ms_per_row: AtomicU32::new((60_000 / DEFAULT_BPM as u32) / ROWS_PER_BEAT),
            running: AtomicBool::new(false),
        }
    }
}

impl Tempo {
    /// Sets the tempo. Non-positive tempos are rejected and leave the current
    /// tempo untouched.
    pub fn set_bpm(&self, bpm: i32) -> Result<(), EngineError> {
        self.ms_per_row.store(ms_per_row(bpm)?, Ordering::Relaxed);
        Ok(())
    }

    pub fn ms_per_row(&self) -> u32 {
        self.ms_per_row.load(Ordering::Relaxed)
    }

    /// Starts or stops row advancement. Stopping takes effect on the next
    /// processed sample and always rewinds to row 0.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// Something that can start voices. Implemented by the voice pool for the
/// audio callback and by recorders in tests.
pub trait VoiceTrigger {
    /// Number of voices that can be triggered.
    fn voice_count(&self) -> usize;

    /// Restarts the voice from its first frame with the given rate and gain.
    /// Must not block or allocate.
    fn trigger(&mut self, voice: usize, pitch_ratio: f64, gain: f32);
}

/// The real-time row scheduler.
pub struct Scheduler {
    tempo: Arc<Tempo>,
    grid: Arc<PatternGrid>,
    sample_counter: u64,
    row_counter: usize,
    invalid_events: Arc<AtomicU64>,
    row_notifications: Option<HeapProd<usize>>,
}

impl Scheduler {
    pub fn new(tempo: Arc<Tempo>, grid: Arc<PatternGrid>) -> Scheduler {
        Scheduler {
            tempo,
            grid,
            sample_counter: 0,
            row_counter: 0,
            invalid_events: Arc::new(AtomicU64::new(0)),
            row_notifications: None,
        }
    }

    /// Pushes the index of every triggered row into the given queue. Pushes
    /// never block: if the reader falls behind, notifications are dropped.
    pub fn with_row_notifications(mut self, rows: HeapProd<usize>) -> Scheduler {
        self.row_notifications = Some(rows);
        self
    }

    /// Counter of malformed cells skipped at trigger time.
    pub fn invalid_events(&self) -> Arc<AtomicU64> {
        self.invalid_events.clone()
    }

    pub fn sample_counter(&self) -> u64 {
        self.sample_counter
    }

    pub fn row_counter(&self) -> usize {
        self.row_counter
    }

    /// Processes one block of `num_frames` samples.
    ///
    /// `render` is called with consecutive, non-overlapping frame ranges that
    /// together cover the block. A row triggered on sample slot `i` takes
    /// effect from slot `i`, so the range before it is rendered first.
    pub fn process_block<T, R>(
        &mut self,
        sample_rate: u32,
        num_frames: usize,
        voices: &mut T,
        mut render: R,
    ) where
        T: VoiceTrigger + ?Sized,
        R: FnMut(Range<usize>),
    {
        let mut ms_per_row = self.tempo.ms_per_row();
        let mut row_length = samples_per_row(sample_rate, ms_per_row);
        let mut segment_start = 0;

        for slot in 0..num_frames {
            if !self.tempo.is_running() {
                self.sample_counter = 0;
                self.row_counter = 0;
                continue;
            }

            let current = self.tempo.ms_per_row();
            if current != ms_per_row {
                ms_per_row = current;
                row_length = samples_per_row(sample_rate, ms_per_row);
            }

            self.sample_counter += 1;
            if self.sample_counter >= row_length {
                if slot > segment_start {
                    render(segment_start..slot);
                    segment_start = slot;
                }
                self.trigger_row(self.row_counter, voices);
                self.sample_counter = 0;
                self.row_counter = (self.row_counter + 1) % ROWS;
            }
        }

        if segment_start < num_frames {
            render(segment_start..num_frames);
        }
    }

    fn trigger_row<T: VoiceTrigger + ?Sized>(&mut self, row: usize, voices: &mut T) {
        for column in 0..self.grid.columns() {
            let Some(event) = self.grid.read_for_trigger(row, column) else {
                continue;
            };
            if event.sample_index == NO_SAMPLE {
                continue;
            }

            let valid_index =
                event.sample_index >= 0 && (event.sample_index as usize) < voices.voice_count();
            let valid_pitch = event.pitch_ratio.is_finite() && event.pitch_ratio > 0.0;
            if !valid_index || !valid_pitch {
                self.invalid_events.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let gain = if event.gain.is_nan() {
                0.0
            } else {
                event.gain.clamp(0.0, 1.0)
            };
            voices.trigger(event.sample_index as usize, event.pitch_ratio, gain);
        }

        if let Some(rows) = self.row_notifications.as_mut() {
            let _ = rows.try_push(row);
        }
    }
}

#[cfg(test)]
mod tests {
    use ringbuf::traits::{Consumer, Split};
    use ringbuf::HeapRb;

    use super::*;
    use crate::pattern::Event;

    /// Records every trigger instead of starting voices.
    #[derive(Default)]
    struct RecordingTrigger {
        triggers: Vec<(usize, f64, f32)>,
    }

    impl VoiceTrigger for RecordingTrigger {
        fn voice_count(&self) -> usize {
            crate::voice::NUM_VOICES
        }

        fn trigger(&mut self, voice: usize, pitch_ratio: f64, gain: f32) {
            self.triggers.push((voice, pitch_ratio, gain));
        }
    }

    fn scheduler() -> (Scheduler, Arc<Tempo>, Arc<PatternGrid>) {
        let tempo = Arc::new(Tempo::default());
        let grid = Arc::new(PatternGrid::new());
        (Scheduler::new(tempo.clone(), grid.clone()), tempo, grid)
    }

    fn run(
        scheduler: &mut Scheduler,
        voices: &mut RecordingTrigger,
        sample_rate: u32,
        frames: usize,
    ) {
        scheduler.process_block(sample_rate, frames, voices, |_| {});
    }

    #[test]
    fn test_ms_per_row() {
        assert_eq!(ms_per_row(120).unwrap(), 125);
        assert_eq!(ms_per_row(1).unwrap(), 15000);
        assert_eq!(ms_per_row(999).unwrap(), 15);
        assert_eq!(ms_per_row(7).unwrap(), (60000 / 7) / 4);
        for bpm in 1..=999 {
            assert_eq!(ms_per_row(bpm).unwrap(), (60000 / bpm as u32) / 4);
        }
        assert!(matches!(ms_per_row(0), Err(EngineError::InvalidTempo(0))));
        assert!(matches!(ms_per_row(-3), Err(EngineError::InvalidTempo(-3))));
    }

    #[test]
    fn test_invalid_bpm_keeps_tempo() {
        let tempo = Tempo::default();
        assert_eq!(tempo.ms_per_row(), 125);
        assert!(tempo.set_bpm(0).is_err());
        assert_eq!(tempo.ms_per_row(), 125);
        tempo.set_bpm(60).unwrap();
        assert_eq!(tempo.ms_per_row(), 250);
    }

    #[test]
    fn test_samples_per_row() {
        assert_eq!(samples_per_row(44100, 125), 5512);
        assert_eq!(samples_per_row(48000, 125), 6000);
        assert_eq!(samples_per_row(500, 1), 1);
    }

    #[test]
    fn test_rejects_sub_millisecond_rows() {
        assert_eq!(ms_per_row(15000).unwrap(), 1);
        assert!(matches!(ms_per_row(15001), Err(EngineError::InvalidTempo(15001))));

        let tempo = Tempo::default();
        assert!(tempo.set_bpm(60000).is_err());
        assert_eq!(tempo.ms_per_row(), 125);
    }

    #[test]
    fn test_tempo_change_applies_within_block() {
        let (mut scheduler, tempo, grid) = scheduler();
        grid.set(0, 0, Event::new(1.0, 0, 1.0)).unwrap();
        grid.set(1, 0, Event::new(1.0, 1, 1.0)).unwrap();
        tempo.set_running(true);

        let mut voices = RecordingTrigger::default();
        let mut changed = false;
        scheduler.process_block(44100, 10000, &mut voices, |_| {
            // Runs just before row 0 triggers at slot 5511.
            if !changed {
                tempo.set_bpm(240).unwrap();
                changed = true;
            }
        });

        // 62 ms rows: row 1 lands at 5511 + 2734 rather than the next block.
        assert_eq!(voices.triggers.len(), 2);
        assert_eq!(scheduler.row_counter(), 2);
        assert_eq!(scheduler.sample_counter(), 10000 - 5512 - 2734);
    }

    #[test]
    fn test_first_row_after_exact_sample_count() {
        let (mut scheduler, tempo, grid) = scheduler();
        grid.set(0, 0, Event::new(1.0, 0, 1.0)).unwrap();
        tempo.set_running(true);

        let mut voices = RecordingTrigger::default();
        run(&mut scheduler, &mut voices, 44100, 5511);
        assert!(voices.triggers.is_empty());
        assert_eq!(scheduler.sample_counter(), 5511);

        run(&mut scheduler, &mut voices, 44100, 1);
        assert_eq!(voices.triggers.len(), 1);
        assert_eq!(scheduler.row_counter(), 1);
        assert_eq!(scheduler.sample_counter(), 0);
    }

    #[test]
    fn test_block_boundaries_do_not_matter() {
        let (mut one, tempo, grid) = scheduler();
        let mut two = Scheduler::new(tempo.clone(), grid.clone());
        grid.set(3, 1, Event::new(1.0, 5, 1.0)).unwrap();
        tempo.set_running(true);

        let mut a = RecordingTrigger::default();
        let mut b = RecordingTrigger::default();
        run(&mut one, &mut a, 44100, 5512 * 10);
        for _ in 0..(5512 * 10 / 128) {
            run(&mut two, &mut b, 44100, 128);
        }
        run(&mut two, &mut b, 44100, 5512 * 10 % 128);

        assert_eq!(a.triggers, b.triggers);
        assert_eq!(one.row_counter(), two.row_counter());
        assert_eq!(one.sample_counter(), two.sample_counter());
    }

    #[test]
    fn test_unset_grid_never_triggers() {
        let (mut scheduler, tempo, _grid) = scheduler();
        tempo.set_running(true);
        let mut voices = RecordingTrigger::default();
        for _ in 0..200 {
            run(&mut scheduler, &mut voices, 44100, 4096);
        }
        assert!(voices.triggers.is_empty());
        assert_eq!(scheduler.invalid_events().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_rows_wrap_in_order() {
        let (scheduler, tempo, _grid) = scheduler();
        let (producer, mut consumer) = HeapRb::<usize>::new(256).split();
        let mut scheduler = scheduler.with_row_notifications(producer);
        // 1 ms rows at 1 kHz: one row per sample.
        tempo.set_bpm(15000).unwrap();
        assert_eq!(tempo.ms_per_row(), 1);
        tempo.set_running(true);

        let mut voices = RecordingTrigger::default();
        run(&mut scheduler, &mut voices, 1000, 130);

        let mut rows = Vec::new();
        while let Some(row) = consumer.try_pop() {
            rows.push(row);
        }
        let expected: Vec<usize> = (0..130).map(|i| i % 64).collect();
        assert_eq!(rows, expected);
        assert_eq!(scheduler.row_counter(), 130 % 64);
    }

    #[test]
    fn test_stop_resets_counters() {
        let (mut scheduler, tempo, grid) = scheduler();
        grid.set(0, 2, Event::new(1.0, 1, 1.0)).unwrap();
        tempo.set_running(true);

        let mut voices = RecordingTrigger::default();
        run(&mut scheduler, &mut voices, 44100, 5512 * 3 + 100);
        assert_eq!(scheduler.row_counter(), 3);

        tempo.set_running(false);
        run(&mut scheduler, &mut voices, 44100, 1);
        assert_eq!(scheduler.row_counter(), 0);
        assert_eq!(scheduler.sample_counter(), 0);

        voices.triggers.clear();
        tempo.set_running(true);
        run(&mut scheduler, &mut voices, 44100, 5512);
        // Restarting always begins at row 0.
        assert_eq!(voices.triggers, vec![(1, 1.0, 1.0)]);
    }

    #[test]
    fn test_trigger_row_commands() {
        let (mut scheduler, tempo, grid) = scheduler();
        grid.set(0, 0, Event::new(1.5, 3, 0.8)).unwrap();
        grid.set(0, 1, Event::new(2.0, NO_SAMPLE, 1.0)).unwrap();
        tempo.set_running(true);

        let mut voices = RecordingTrigger::default();
        run(&mut scheduler, &mut voices, 44100, 5512);
        assert_eq!(voices.triggers, vec![(3, 1.5, 0.8)]);
    }

    #[test]
    fn test_invalid_events_are_counted() {
        let (mut scheduler, tempo, grid) = scheduler();
        grid.set(0, 0, Event::new(1.0, 32, 1.0)).unwrap();
        grid.set(0, 1, Event::new(1.0, -7, 1.0)).unwrap();
        grid.set(0, 2, Event::new(-1.0, 2, 1.0)).unwrap();
        grid.set(0, 3, Event::new(1.0, 4, 3.0)).unwrap();
        tempo.set_running(true);

        let mut voices = RecordingTrigger::default();
        run(&mut scheduler, &mut voices, 44100, 5512);
        assert_eq!(voices.triggers, vec![(4, 1.0, 1.0)]);
        assert_eq!(scheduler.invalid_events().load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_render_ranges_split_at_trigger() {
        let (mut scheduler, tempo, _grid) = scheduler();
        tempo.set_running(true);
        let mut voices = RecordingTrigger::default();

        let mut ranges = Vec::new();
        scheduler.process_block(44100, 5000, &mut voices, |r| ranges.push(r));
        assert_eq!(ranges, vec![0..5000]);

        ranges.clear();
        scheduler.process_block(44100, 1000, &mut voices, |r| ranges.push(r));
        // Sample 5512 is slot 511 of this block.
        assert_eq!(ranges, vec![0..511, 511..1000]);
    }

    #[test]
    fn test_sample_rate_reread_each_block() {
        let (mut scheduler, tempo, grid) = scheduler();
        grid.set(0, 0, Event::new(1.0, 0, 1.0)).unwrap();
        grid.set(1, 0, Event::new(1.0, 1, 1.0)).unwrap();
        tempo.set_running(true);

        let mut voices = RecordingTrigger::default();
        run(&mut scheduler, &mut voices, 48000, 6000);
        assert_eq!(voices.triggers.len(), 1);
        run(&mut scheduler, &mut voices, 44100, 5512);
        assert_eq!(voices.triggers.len(), 2);
    }
}

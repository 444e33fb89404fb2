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

//! The pattern grid: a fixed 64 × 4 table of events.
//!
//! Cells are edited from a control thread while the audio callback reads
//! them. Each cell is a small seqlock over atomic fields: readers never block
//! and retry if they race an edit, so a row trigger never sees half of an
//! edit.

use std::hint;
use std::sync::atomic::{fence, AtomicI32, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::EngineError;
use crate::pitch;
use crate::voice::NUM_VOICES;

/// Rows in a pattern.
pub const ROWS: usize = 64;

/// Columns (tracks) in a pattern.
pub const COLUMNS: usize = 4;

/// Sample index meaning "no event".
pub const NO_SAMPLE: i32 = -1;

/// Attempts a real-time reader makes before giving up on a cell that is
/// being rewritten continuously.
const READ_ATTEMPTS: usize = 8;

/// One cell of the pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    /// Resampling factor relative to the reference pitch.
    pub pitch_ratio: f64,
    /// Voice to trigger, or [`NO_SAMPLE`].
    pub sample_index: i32,
    /// Linear gain in [0, 1].
    pub gain: f32,
}

impl Default for Event {
    fn default() -> Self {
        Event {
            pitch_ratio: 1.0,
            sample_index: NO_SAMPLE,
            gain: 1.0,
        }
    }
}

impl Event {
    pub fn new(pitch_ratio: f64, sample_index: i32, gain: f32) -> Event {
        Event {
            pitch_ratio,
            sample_index,
            gain,
        }
    }

    /// Builds an event the way note entry does: values that can't be used
    /// are replaced rather than rejected. Non-positive pitch plays at the
    /// reference pitch, an out-of-range sample becomes [`NO_SAMPLE`] and an
    /// out-of-range gain becomes silence.
    pub fn sanitized(pitch_ratio: f64, sample_index: i32, gain: f32) -> Event {
        let pitch_ratio = if pitch_ratio.is_finite() && pitch_ratio > 0.0 {
            pitch_ratio
        } else {
            1.0
        };
        let sample_index = if (0..NUM_VOICES as i32).contains(&sample_index) {
            sample_index
        } else {
            NO_SAMPLE
        };
        let gain = if (0.0..=1.0).contains(&gain) { gain } else { 0.0 };

        Event {
            pitch_ratio,
            sample_index,
            gain,
        }
    }

    /// Builds a sanitized event from a note name such as `C#4`.
    pub fn from_note(note: &str, sample_index: i32, gain: f32) -> Event {
        Event::sanitized(
            pitch::parse_ratio(note).unwrap_or(1.0),
            sample_index,
            gain,
        )
    }

    /// True when the cell holds no event.
    pub fn is_unset(&self) -> bool {
        self.sample_index == NO_SAMPLE
    }
}

/// Seqlocked storage for one event. The sequence number is odd while a
/// write is in progress.
struct Cell {
    sequence: AtomicU32,
    pitch_ratio: AtomicU64,
    sample_index: AtomicI32,
    gain: AtomicU32,
}

impl Cell {
    fn new(event: Event) -> Cell {
        Cell {
            sequence: AtomicU32::new(0),
            pitch_ratio: AtomicU64::new(event.pitch_ratio.to_bits()),
            sample_index: AtomicI32::new(event.sample_index),
            gain: AtomicU32::new(event.gain.to_bits()),
        }
    }

    /// Callers must hold the grid's writer lock.
    fn store(&self, event: Event) {
        let sequence = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(sequence.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.pitch_ratio
            .store(event.pitch_ratio.to_bits(), Ordering::Relaxed);
        self.sample_index
            .store(event.sample_index, Ordering::Relaxed);
        self.gain.store(event.gain.to_bits(), Ordering::Relaxed);

        self.sequence
            .store(sequence.wrapping_add(2), Ordering::Release);
    }

    /// Lock-free read. Returns None only if every attempt raced a writer.
    fn load(&self) -> Option<Event> {
        for _ in 0..READ_ATTEMPTS {
            let before = self.sequence.load(Ordering::Acquire);
            if before & 1 == 1 {
                hint::spin_loop();
                continue;
            }

            let event = Event {
                pitch_ratio: f64::from_bits(self.pitch_ratio.load(Ordering::Relaxed)),
                sample_index: self.sample_index.load(Ordering::Relaxed),
                gain: f32::from_bits(self.gain.load(Ordering::Relaxed)),
            };

            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == before {
                return Some(event);
            }
            hint::spin_loop();
        }
        None
    }
}

/// The fixed-size pattern grid shared between the editor and the scheduler.
pub struct PatternGrid {
    cells: Box<[Cell]>,
    /// Serializes writers. Never taken by the audio callback.
    write_lock: Mutex<()>,
}

impl Default for PatternGrid {
    fn default() -> Self {
        PatternGrid::new()
    }
}

impl PatternGrid {
    /// Creates a grid where every cell holds the default (unset) event.
    pub fn new() -> PatternGrid {
        PatternGrid {
            cells: (0..ROWS * COLUMNS)
                .map(|_| Cell::new(Event::default()))
                .collect(),
            write_lock: Mutex::new(()),
        }
    }

    pub const fn rows(&self) -> usize {
        ROWS
    }

    pub const fn columns(&self) -> usize {
        COLUMNS
    }

    fn index(row: usize, column: usize) -> Result<usize, EngineError> {
        if row >= ROWS || column >= COLUMNS {
            return Err(EngineError::InvalidCell { row, column });
        }
        Ok(row * COLUMNS + column)
    }

    /// Gets the event at the given cell.
    pub fn get(&self, row: usize, column: usize) -> Result<Event, EngineError> {
        let cell = &self.cells[Self::index(row, column)?];
        // Readers only lose to a writer that keeps rewriting the same cell;
        // taking the writer lock settles it outside the audio thread.
        match cell.load() {
            Some(event) => Ok(event),
            None => {
                let _guard = self.write_lock.lock();
                Ok(cell.load().unwrap_or_default())
            }
        }
    }

    /// Replaces the event at the given cell.
    pub fn set(&self, row: usize, column: usize, event: Event) -> Result<(), EngineError> {
        let index = Self::index(row, column)?;
        let _guard = self.write_lock.lock();
        self.cells[index].store(event);
        Ok(())
    }

    /// Resets every cell to the unset event.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        for cell in self.cells.iter() {
            cell.store(Event::default());
        }
    }

    /// Real-time read used by the scheduler. The row wraps modulo [`ROWS`];
    /// a column out of range or a cell lost to a concurrent edit reads as
    /// None.
    #[inline]
    pub(crate) fn read_for_trigger(&self, row: usize, column: usize) -> Option<Event> {
        if column >= COLUMNS {
            return None;
        }
        self.cells[(row % ROWS) * COLUMNS + column].load()
    }
}

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
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::sample_source::error::SampleSourceError;
use crate::config::ConfigError;

/// Errors surfaced by the engine's non-real-time control surface.
///
/// The real-time path never produces these; malformed pattern cells are
/// skipped there and only counted.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Voice index {0} is out of range")]
    InvalidVoiceIndex(i32),

    #[error("Tempo of {0} bpm is not positive")]
    InvalidTempo(i32),

    #[error("Unable to load {}: {source}", path.display())]
    FileLoad {
        path: PathBuf,
        #[source]
        source: SampleSourceError,
    },

    #[error("Precondition failed: {0}")]
    Precondition(&'static str),

    #[error("Pattern cell ({row}, {column}) is out of range")]
    InvalidCell { row: usize, column: usize },

    #[error("{thread} thread did not stop within {budget:?}")]
    ShutdownTimeout {
        thread: &'static str,
        budget: Duration,
    },

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Unable to create resampler: {0}")]
    Resampler(#[from] rubato::ResamplerConstructionError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Unable to start thread: {0}")]
    Thread(#[from] std::io::Error),
}

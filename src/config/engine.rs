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
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::audio::Audio;
use super::error::ConfigError;
use crate::scheduler::DEFAULT_BPM;

/// Prefix for environment overrides, e.g. `STEPTRACK_BPM=140` or
/// `STEPTRACK_AUDIO__DEVICE=mock`.
const ENV_PREFIX: &str = "STEPTRACK";

const DEFAULT_VOICE_JOIN_BUDGET: Duration = crate::voice::DEFAULT_JOIN_BUDGET;
const DEFAULT_CLOCK_JOIN_BUDGET: Duration = crate::clock::DEFAULT_JOIN_BUDGET;

/// A sample file assigned to a voice at startup.
#[derive(Deserialize, Clone, Debug)]
pub struct Voice {
    /// Index of the voice in the pool.
    index: i32,

    /// The file to load. Relative paths are relative to the configuration
    /// file.
    file: PathBuf,

    /// Whether the voice loops (default: false).
    looping: Option<bool>,
}

impl Voice {
    pub fn new(index: i32, file: PathBuf) -> Voice {
        Voice {
            index,
            file,
            looping: None,
        }
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn looping(&self) -> bool {
        self.looping.unwrap_or(false)
    }
}

/// The top level engine configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Engine {
    /// The audio output. Optional so that an engine can be driven directly.
    audio: Option<Audio>,

    /// Starting tempo (default: 120).
    bpm: Option<i32>,

    /// Voice assignments.
    #[serde(default)]
    voices: Vec<Voice>,

    /// How long to wait for each voice's streaming thread on shutdown
    /// (default: 100ms).
    voice_join_budget: Option<String>,

    /// How long to wait for the UI clock thread on shutdown (default: 10ms).
    clock_join_budget: Option<String>,
}

fn parse_duration(
    field: &'static str,
    value: &Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => Ok(DurationString::from_string(value.clone())
            .map_err(|_| ConfigError::InvalidDuration {
                field,
                value: value.clone(),
            })?
            .into()),
        None => Ok(default),
    }
}

impl Engine {
    /// Parse the engine configuration from a YAML file, applying any
    /// `STEPTRACK_` environment overrides. Relative voice paths are resolved
    /// against the file's directory.
    pub fn deserialize(path: &Path) -> Result<Engine, ConfigError> {
        let mut engine = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Engine>()?;

        if let Some(base) = path.parent() {
            engine.resolve_paths(base);
        }
        engine.validate()?;
        Ok(engine)
    }

    /// Creates an engine configuration for the given audio output.
    pub fn new(audio: Option<Audio>) -> Engine {
        Engine {
            audio,
            ..Default::default()
        }
    }

    /// Adds a voice assignment.
    pub fn with_voice(mut self, voice: Voice) -> Engine {
        self.voices.push(voice);
        self
    }

    fn resolve_paths(&mut self, base: &Path) {
        for voice in self.voices.iter_mut() {
            if voice.file.is_relative() {
                voice.file = base.join(&voice.file);
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bpm) = self.bpm {
            if bpm <= 0 {
                return Err(ConfigError::InvalidValue {
                    field: "bpm",
                    reason: format!("{} is not positive", bpm),
                });
            }
        }
        self.voice_join_budget()?;
        self.clock_join_budget()?;
        Ok(())
    }

    pub fn audio(&self) -> Option<&Audio> {
        self.audio.as_ref()
    }

    pub fn bpm(&self) -> i32 {
        self.bpm.unwrap_or(DEFAULT_BPM)
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voice_join_budget(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            "voice_join_budget",
            &self.voice_join_budget,
            DEFAULT_VOICE_JOIN_BUDGET,
        )
    }

    pub fn clock_join_budget(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            "clock_join_budget",
            &self.clock_join_budget,
            DEFAULT_CLOCK_JOIN_BUDGET,
        )
    }
}

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
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{Voice, VoiceRenderer, VoiceShared};
use crate::error::EngineError;
use crate::scheduler::VoiceTrigger;

/// The fixed set of voices, all created up front.
pub struct VoicePool {
    voices: Vec<Voice>,
}

impl VoicePool {
    /// Creates `count` voices and starts their streaming threads.
    pub fn new(
        count: usize,
        join_budget: Duration,
    ) -> Result<(VoicePool, Vec<VoiceRenderer>), EngineError> {
        let mut voices = Vec::with_capacity(count);
        let mut renderers = Vec::with_capacity(count);
        for index in 0..count {
            let (voice, renderer) = Voice::spawn(index, join_budget)?;
            voices.push(voice);
            renderers.push(renderer);
        }
        info!(voices = count, "Voice pool started");
        Ok((VoicePool { voices }, renderers))
    }

    /// Gets a voice by index. Anything outside the pool is
    /// [`EngineError::InvalidVoiceIndex`].
    pub fn get(&self, index: i32) -> Result<&Voice, EngineError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.voices.get(i))
            .ok_or(EngineError::InvalidVoiceIndex(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// The handle the scheduler uses to start voices from the audio callback.
    pub(crate) fn trigger(&self) -> PoolTrigger {
        PoolTrigger {
            voices: self.voices.iter().map(|v| v.shared.clone()).collect(),
        }
    }

    /// Shuts down every voice. All voices are attempted; the first failure is
    /// returned.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        let mut result = Ok(());
        for voice in &self.voices {
            if let Err(e) = voice.shutdown() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// Starts pool voices from the audio callback.
pub(crate) struct PoolTrigger {
    voices: Vec<Arc<VoiceShared>>,
}

impl VoiceTrigger for PoolTrigger {
    fn voice_count(&self) -> usize {
        self.voices.len()
    }

    fn trigger(&mut self, voice: usize, pitch_ratio: f64, gain: f32) {
        if let Some(shared) = self.voices.get(voice) {
            shared.set_rate(pitch_ratio);
            shared.set_gain(gain);
            shared.restart();
        }
    }
}

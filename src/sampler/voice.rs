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

//! Per-track sample playback.
//!
//! A voice is a single playback cursor over one asset. Retriggering restarts the cursor,
//! so each track has at most one sounding instance.

use std::fmt;
use std::sync::Arc;

use super::asset::SampleAsset;

/// Whether a voice is currently producing samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Not sounding. Renders silence.
    Idle,
    /// Reading samples from the asset.
    Playing,
}

/// Playback state for one track's sample.
pub struct SampleVoice {
    /// The sample data. None until the asset has been loaded.
    asset: Option<Arc<SampleAsset>>,
    /// The next sample to read.
    cursor: usize,
    /// Gain set by the most recent trigger.
    velocity: f32,
    /// Fixed gain for this voice.
    volume: f32,
    /// One-pole smoothing ratio, if enabled.
    interpolation: Option<f32>,
    /// The last smoothed output.
    smoothed: f32,
    state: VoiceState,
}

impl SampleVoice {
    /// Creates a silent voice that has no asset yet.
    pub fn new(volume: f32, interpolation: Option<f32>) -> SampleVoice {
        SampleVoice {
            asset: None,
            cursor: 0,
            velocity: 1.0,
            volume,
            interpolation,
            smoothed: 0.0,
            state: VoiceState::Idle,
        }
    }

    /// Installs the loaded asset and returns the one it replaces. The voice stays idle
    /// until its next activation.
    pub fn install(&mut self, asset: Arc<SampleAsset>) -> Option<Arc<SampleAsset>> {
        self.cursor = 0;
        self.state = VoiceState::Idle;
        self.asset.replace(asset)
    }

    /// Restarts playback from the first sample with the given velocity.
    pub fn activate(&mut self, velocity: f32) {
        self.cursor = 0;
        self.velocity = velocity;
        self.state = VoiceState::Playing;
    }

    /// Produces the next output sample and advances the cursor.
    /// Must be called exactly once per output frame.
    #[inline]
    pub fn render_sample(&mut self) -> f32 {
        let value = match (&self.asset, self.state) {
            (Some(asset), VoiceState::Playing) => match asset.get(self.cursor) {
                Some(sample) => {
                    self.cursor += 1;
                    f32::from(sample) * self.volume * self.velocity
                }
                None => {
                    self.state = VoiceState::Idle;
                    0.0
                }
            },
            (None, VoiceState::Playing) => {
                self.state = VoiceState::Idle;
                0.0
            }
            (_, VoiceState::Idle) => 0.0,
        };

        self.smoothed = match self.interpolation {
            Some(ratio) => self.smoothed * (1.0 - ratio) + value * ratio,
            None => value,
        };
        self.smoothed
    }

    /// The current playback state.
    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// Returns true while the voice is reading samples.
    pub fn is_playing(&self) -> bool {
        self.state == VoiceState::Playing
    }

    /// Returns true once an asset has been installed.
    pub fn is_loaded(&self) -> bool {
        self.asset.is_some()
    }

    /// The position of the next sample to be read.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Gain from the most recent trigger.
    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    /// The fixed voice gain.
    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl fmt::Debug for SampleVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleVoice")
            .field("asset", &self.asset.as_ref().map(|asset| asset.name()))
            .field("cursor", &self.cursor)
            .field("velocity", &self.velocity)
            .field("state", &self.state)
            .finish()
    }
}

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

use serde::Deserialize;

use super::Interpolation;

const DEFAULT_TRACK_VOLUME: f32 = 1.0;

/// A sequencer track and the sample it plays.
#[derive(Deserialize, Clone, Debug)]
pub struct Track {
    /// The sample file, relative to the configuration file.
    sample: String,

    /// Gain applied to the sample (default: 1.0).
    volume: Option<f32>,

    /// Per-track smoothing.
    interpolation: Option<Interpolation>,

    /// Steps that start unmuted.
    steps: Option<Vec<i64>>,

    /// Display color, used by controllers with lights.
    color: Option<String>,
}

impl Track {
    /// The sample file as written in the configuration.
    pub fn sample(&self) -> &str {
        &self.sample
    }

    /// Resolves the sample file against the directory holding the configuration.
    pub fn sample_path(&self, base: &Path) -> PathBuf {
        base.join(&self.sample)
    }

    /// Returns the track volume (default: 1.0).
    pub fn volume(&self) -> f32 {
        self.volume.unwrap_or(DEFAULT_TRACK_VOLUME)
    }

    /// Returns the smoothing ratio for this track, if enabled.
    pub fn interpolation(&self) -> Option<f32> {
        self.interpolation.and_then(Interpolation::ratio)
    }

    /// Returns the steps that start unmuted, if configured.
    pub fn steps(&self) -> Option<&[i64]> {
        self.steps.as_deref()
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }
}

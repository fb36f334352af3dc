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
use crate::util::wrap;

/// Number of steps in a track unless configured otherwise.
pub const DEFAULT_STEPS: usize = 16;

/// Volume given to every new step.
pub const DEFAULT_STEP_VOLUME: f32 = 0.5;

/// A single beat within a track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    volume: f32,
    muted: bool,
}

impl Step {
    pub fn new(volume: f32, muted: bool) -> Step {
        let mut step = Step { volume: 0.0, muted };
        step.set_volume(volume);
        step
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Sets the volume, clamped to [0, 1]. NaN is treated as silence.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn toggle_mute(&mut self) {
        self.muted = !self.muted;
    }

    /// Returns true if the step should trigger its track's sample.
    pub fn is_audible(&self) -> bool {
        !self.muted && self.volume > 0.0
    }
}

impl Default for Step {
    fn default() -> Self {
        Step::new(DEFAULT_STEP_VOLUME, true)
    }
}

/// A fixed-length sequence of steps. Step indices wrap in both directions.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    steps: Box<[Step]>,
}

impl Track {
    /// Creates a track of default steps. A track always has at least one step.
    pub fn new(steps: usize) -> Track {
        Track {
            steps: vec![Step::default(); steps.max(1)].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: i64) -> &Step {
        &self.steps[wrap(index, self.steps.len())]
    }

    pub fn step_mut(&mut self, index: i64) -> &mut Step {
        let index = wrap(index, self.steps.len());
        &mut self.steps[index]
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

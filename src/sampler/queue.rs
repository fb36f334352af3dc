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

//! Time-ordered trigger mailbox between the clock and the render loop.
//!
//! Triggers arrive in wall-clock time and are stamped with the sample time at which
//! they should sound: the time since the sync epoch plus a fixed latency, converted
//! to frames. The render side pops events once their scheduled frame is reached.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::trace;

/// A voice activation waiting to be applied by the render side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerEvent {
    /// The voice to activate.
    pub voice: usize,
    /// Gain applied to the voice for this hit.
    pub velocity: f32,
    /// The sample frame, counted from the sync epoch, at which the event is due.
    pub scheduled: u64,
}

/// A bounded queue of trigger events ordered by scheduled time.
#[derive(Debug)]
pub struct TriggerQueue {
    events: VecDeque<TriggerEvent>,
    capacity: usize,
    /// The wall-clock instant matching sample time zero. None until the first sync.
    epoch: Option<Instant>,
    /// Bumped on every sync so the render side knows to reset its sample counter.
    generation: u64,
    latency: Duration,
    sample_rate: u32,
    /// Number of voices that can be triggered.
    voices: usize,
}

impl TriggerQueue {
    pub fn new(capacity: usize, voices: usize, latency: Duration, sample_rate: u32) -> TriggerQueue {
        TriggerQueue {
            events: VecDeque::with_capacity(capacity),
            capacity,
            epoch: None,
            generation: 0,
            latency,
            sample_rate,
            voices,
        }
    }

    /// Schedules a voice activation relative to the sync epoch. Returns false if the
    /// trigger was dropped: the queue isn't synced, the voice doesn't exist, or the queue
    /// is full.
    pub fn push(&mut self, voice: usize, velocity: f32, now: Instant) -> bool {
        let Some(epoch) = self.epoch else {
            trace!(voice, "Dropping trigger, queue has not been synced");
            return false;
        };
        if voice >= self.voices {
            trace!(voice, voices = self.voices, "Dropping trigger for unknown voice");
            return false;
        }
        if self.events.len() >= self.capacity {
            trace!(voice, capacity = self.capacity, "Dropping trigger, queue is full");
            return false;
        }

        let scheduled = self.schedule(now.saturating_duration_since(epoch));
        // Insert after every event due at or before this one so ties keep arrival order.
        let position = self.events.partition_point(|event| event.scheduled <= scheduled);
        self.events.insert(
            position,
            TriggerEvent {
                voice,
                velocity,
                scheduled,
            },
        );
        true
    }

    /// Converts time since the epoch into the frame at which a trigger should sound.
    fn schedule(&self, elapsed: Duration) -> u64 {
        let nanos = (elapsed + self.latency).as_nanos() * u128::from(self.sample_rate);
        nanos.div_ceil(1_000_000_000) as u64
    }

    /// Drops pending events and starts a new epoch at `now`.
    pub fn sync(&mut self, now: Instant) {
        self.events.clear();
        self.epoch = Some(now);
        self.generation = self.generation.wrapping_add(1);
    }

    /// Drops pending events. The epoch is unchanged.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Removes the earliest event if it is due at or before `time`.
    pub fn pop_due(&mut self, time: u64) -> Option<TriggerEvent> {
        match self.events.front() {
            Some(event) if event.scheduled <= time => self.events.pop_front(),
            _ => None,
        }
    }

    /// The sync generation. Changes every time the queue is synced.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true once the queue has been synced at least once.
    pub fn is_synced(&self) -> bool {
        self.epoch.is_some()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Changes the latency used for triggers pushed from now on.
    pub fn set_latency(&mut self, latency: Duration) {
        self.latency = latency;
    }
}

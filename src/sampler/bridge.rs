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
use tracing::trace;

use super::Sampler;
use crate::sequencer::{SequencerEvent, SequencerObserver};

/// Drives a sampler from sequencer events.
///
/// Starting playback unmutes and resyncs the sampler so sample time restarts with the
/// sequence. Pausing mutes it and drops pending triggers; hits already sounding ring out
/// silently.
#[derive(Debug, Clone)]
pub struct SamplerBridge {
    sampler: Sampler,
}

impl SamplerBridge {
    pub fn new(sampler: Sampler) -> SamplerBridge {
        SamplerBridge { sampler }
    }
}

impl SequencerObserver for SamplerBridge {
    fn on_event(&self, event: &SequencerEvent) {
        match *event {
            SequencerEvent::PrePlay => {
                self.sampler.set_muted(false);
                self.sampler.sync();
            }
            SequencerEvent::Paused => {
                self.sampler.set_muted(true);
                self.sampler.clear_queue();
            }
            SequencerEvent::Trigger { track, volume } => {
                trace!(track, volume, "Trigger");
                self.sampler.trigger(track, volume);
            }
            SequencerEvent::Played | SequencerEvent::Tick { .. } | SequencerEvent::Step { .. } => {}
        }
    }
}

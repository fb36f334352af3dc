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

//! Notifications published by the sequencer.
//!
//! Observers are called synchronously on the thread that caused the event, with no
//! sequencer lock held. They may call back into the sequencer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::RwLock;

/// Something that happened in the sequencer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SequencerEvent {
    /// Playback is about to start.
    PrePlay,
    /// Playback has started.
    Played,
    /// Playback has stopped.
    Paused,
    /// The clock ticked. Published while paused too.
    Tick { tick: usize },
    /// A step boundary was reached during playback.
    Step { step: usize },
    /// A track should sound at the given volume.
    Trigger { track: usize, volume: f32 },
}

/// Receives sequencer events.
pub trait SequencerObserver: Send + Sync {
    fn on_event(&self, event: &SequencerEvent);
}

impl<F> SequencerObserver for F
where
    F: Fn(&SequencerEvent) + Send + Sync,
{
    fn on_event(&self, event: &SequencerEvent) {
        self(event)
    }
}

/// Forwards events to a channel, for consumers on other threads.
pub struct ChannelObserver {
    sender: Sender<SequencerEvent>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<SequencerEvent>) -> ChannelObserver {
        ChannelObserver { sender }
    }
}

impl SequencerObserver for ChannelObserver {
    fn on_event(&self, event: &SequencerEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.sender.try_send(*event);
    }
}

/// Identifies a subscription so it can be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The set of subscribed observers.
#[derive(Default)]
pub(crate) struct Observers {
    next_id: AtomicU64,
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn SequencerObserver>)>>,
}

impl Observers {
    pub(crate) fn subscribe(&self, observer: Arc<dyn SequencerObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Delivers each event to every observer, in subscription order.
    pub(crate) fn publish(&self, events: &[SequencerEvent]) {
        if events.is_empty() {
            return;
        }
        // Snapshot so observers can subscribe or unsubscribe while handling an event.
        let observers: Vec<Arc<dyn SequencerObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for event in events {
            for observer in observers.iter() {
                observer.on_event(event);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_publish_in_order() {
        let observers = Observers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            observers.subscribe(Arc::new(move |event: &SequencerEvent| {
                seen.lock().push(("first", *event))
            }));
        }
        {
            let seen = seen.clone();
            observers.subscribe(Arc::new(move |event: &SequencerEvent| {
                seen.lock().push(("second", *event))
            }));
        }

        observers.publish(&[SequencerEvent::PrePlay, SequencerEvent::Played]);
        assert_eq!(
            vec![
                ("first", SequencerEvent::PrePlay),
                ("second", SequencerEvent::PrePlay),
                ("first", SequencerEvent::Played),
                ("second", SequencerEvent::Played),
            ],
            *seen.lock()
        );
    }

    #[test]
    fn test_unsubscribe() {
        let observers = Observers::default();
        let id = observers.subscribe(Arc::new(|_: &SequencerEvent| {}));
        assert_eq!(1, observers.len());
        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));
        assert_eq!(0, observers.len());
    }

    #[test]
    fn test_channel_observer() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let observers = Observers::default();
        observers.subscribe(Arc::new(ChannelObserver::new(tx)));
        observers.publish(&[SequencerEvent::Trigger {
            track: 2,
            volume: 0.5,
        }]);
        assert_eq!(
            Ok(SequencerEvent::Trigger {
                track: 2,
                volume: 0.5
            }),
            rx.try_recv()
        );

        drop(rx);
        observers.publish(&[SequencerEvent::Paused]);
    }
}

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

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{debug, info, warn};

/// Default priority for the audio callback thread when BEATSWITCH_THREAD_PRIORITY is unset.
const DEFAULT_CALLBACK_THREAD_PRIORITY: u8 = 70;

/// The clock runs just below the audio callback so it never starves it.
const CLOCK_THREAD_PRIORITY_OFFSET: u8 = 10;

/// Reads BEATSWITCH_THREAD_PRIORITY (0-99). Out of range or unparsable values fall back to the default.
fn callback_priority_level() -> u8 {
    std::env::var("BEATSWITCH_THREAD_PRIORITY")
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_CALLBACK_THREAD_PRIORITY)
}

/// Read once when building the callback so we don't touch env in the hot path.
pub fn callback_thread_priority() -> ThreadPriorityValue {
    priority_value(callback_priority_level())
}

/// Priority for the sequencer clock thread.
pub fn clock_thread_priority() -> ThreadPriorityValue {
    priority_value(callback_priority_level().saturating_sub(CLOCK_THREAD_PRIORITY_OFFSET))
}

fn priority_value(level: u8) -> ThreadPriorityValue {
    ThreadPriorityValue::try_from(level)
        .ok()
        .unwrap_or_else(|| ThreadPriorityValue::try_from(DEFAULT_CALLBACK_THREAD_PRIORITY).unwrap())
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Returns whether we should attempt RT (SCHED_FIFO) scheduling for the audio callback thread.
/// Default: enabled. Opt out with BEATSWITCH_DISABLE_RT_AUDIO=1.
pub fn rt_audio_enabled() -> bool {
    !env_flag("BEATSWITCH_DISABLE_RT_AUDIO")
}

/// Raises the priority of the sequencer clock thread. Failure only costs timing accuracy.
pub fn configure_clock_thread_priority() {
    let priority = clock_thread_priority();
    match set_current_thread_priority(ThreadPriority::Crossplatform(priority)) {
        Ok(()) => debug!(priority = ?priority, "Raised clock thread priority"),
        Err(e) => debug!(err = ?e, "Unable to raise clock thread priority"),
    }
}

/// Raises the priority of the audio callback thread, once.
pub fn configure_audio_thread_priority(
    priority: ThreadPriorityValue,
    rt_audio: bool,
    priority_set: &mut bool,
) {
    if *priority_set {
        return;
    }
    let tp = ThreadPriority::Crossplatform(priority);
    let _ = set_current_thread_priority(tp);

    #[cfg(unix)]
    if rt_audio {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        let tid = thread_native_id();
        match set_thread_priority_and_policy(
            tid,
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => {
                info!("Enabled RT SCHED_FIFO for audio callback thread");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to set RT SCHED_FIFO for audio callback thread"
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = rt_audio;

    *priority_set = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_below_callback() {
        let callback = callback_priority_level();
        assert!(callback < 100);
        assert_eq!(
            ThreadPriorityValue::try_from(callback.saturating_sub(CLOCK_THREAD_PRIORITY_OFFSET))
                .ok(),
            Some(clock_thread_priority())
        );
    }

    #[test]
    fn test_env_flag_unset() {
        assert!(!env_flag("BEATSWITCH_TEST_FLAG_THAT_IS_NEVER_SET"));
    }
}

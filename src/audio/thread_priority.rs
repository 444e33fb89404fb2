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
use tracing::{info, warn};

/// Default priority for the audio callback thread when STEPTRACK_THREAD_PRIORITY is unset.
const DEFAULT_CALLBACK_THREAD_PRIORITY: u8 = 70;

/// Reads STEPTRACK_THREAD_PRIORITY (0-99). Called while building a stream, never from the
/// callback itself.
pub fn callback_thread_priority() -> ThreadPriorityValue {
    std::env::var("STEPTRACK_THREAD_PRIORITY")
        .ok()
        .and_then(|v| parse_priority(&v))
        .unwrap_or_else(|| ThreadPriorityValue::try_from(DEFAULT_CALLBACK_THREAD_PRIORITY).unwrap())
}

fn parse_priority(value: &str) -> Option<ThreadPriorityValue> {
    let n = value.trim().parse::<u8>().ok()?;
    if n >= 100 {
        return None;
    }
    ThreadPriorityValue::try_from(n).ok()
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

/// Whether to attempt SCHED_FIFO for the audio thread. Opt out with
/// STEPTRACK_DISABLE_RT_AUDIO=1.
pub fn rt_audio_enabled() -> bool {
    !env_flag("STEPTRACK_DISABLE_RT_AUDIO")
}

/// Raises the priority of the calling thread the first time it's called.
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
            Ok(()) => info!("Enabled RT SCHED_FIFO for audio thread"),
            Err(e) => warn!(error = %e, "Failed to set RT SCHED_FIFO for audio thread"),
        }
    }
    #[cfg(not(unix))]
    let _ = rt_audio;

    *priority_set = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_priority() {
        assert_eq!(parse_priority("50"), ThreadPriorityValue::try_from(50u8).ok());
        assert_eq!(parse_priority(" 0 "), ThreadPriorityValue::try_from(0u8).ok());
        assert!(parse_priority("100").is_none());
        assert!(parse_priority("high").is_none());
    }

    #[test]
    #[serial]
    fn test_env_flag() {
        std::env::set_var("STEPTRACK_TEST_FLAG", "Yes");
        assert!(env_flag("STEPTRACK_TEST_FLAG"));
        std::env::set_var("STEPTRACK_TEST_FLAG", "0");
        assert!(!env_flag("STEPTRACK_TEST_FLAG"));
        std::env::remove_var("STEPTRACK_TEST_FLAG");
        assert!(!env_flag("STEPTRACK_TEST_FLAG"));
    }

    #[test]
    #[serial]
    fn test_rt_audio_opt_out() {
        std::env::remove_var("STEPTRACK_DISABLE_RT_AUDIO");
        assert!(rt_audio_enabled());
        std::env::set_var("STEPTRACK_DISABLE_RT_AUDIO", "1");
        assert!(!rt_audio_enabled());
        std::env::remove_var("STEPTRACK_DISABLE_RT_AUDIO");
    }
}

//! Single-slot mailbox between the end-of-frame callback and the control loop.
//!
//! The callback (producer, on a driver-owned thread) calls [`FrameEvent::signal`];
//! the control loop (consumer) calls [`FrameEvent::wait_or_timeout`]. Signals are not
//! queued: a second signal before the consumer wakes overwrites the first descriptor.
//! That is enough for stall detection, which only asks whether *any* frame arrived
//! within the deadline. Overwrites are counted so the report can show how many frames
//! were coalesced.
//!
//! This is the only state shared between the two threads. Flag, descriptor and
//! counters live under one mutex.

use serde::Serialize;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Metadata of the most recently signalled frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameDescriptor {
    /// Hardware frame number from the end-of-frame notification.
    pub sequence: i32,
    /// Driver timestamp of the frame.
    pub timestamp: i64,
    /// Byte offset of the frame inside the circular buffer, when the latest-frame
    /// fetch succeeded and returned an address inside the buffer.
    pub buffer_offset: Option<usize>,
    /// The latest-frame fetch failed inside the callback.
    pub degraded: bool,
}

/// Result of [`FrameEvent::wait_or_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A signal arrived; it has been consumed.
    Fired(FrameDescriptor),
    /// The deadline elapsed with no unconsumed signal.
    TimedOut,
}

/// Signal counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameEventStats {
    /// Total `signal` calls since the last reset.
    pub signals: u64,
    /// Signals that replaced a descriptor the consumer had not yet read.
    pub overwritten: u64,
    /// Signals handed to the consumer.
    pub consumed: u64,
}

#[derive(Debug, Default)]
struct EventState {
    fired: bool,
    descriptor: FrameDescriptor,
    stats: FrameEventStats,
}

/// Shared frame event: `Mutex`-protected flag + descriptor, with a `Condvar` to
/// wake the consumer.
#[derive(Debug, Default)]
pub struct FrameEvent {
    state: Mutex<EventState>,
    ready: Condvar,
}

impl FrameEvent {
    /// Create an event in the not-fired state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer side: record `descriptor`, mark fired and wake the consumer.
    ///
    /// Never blocks beyond the short critical section.
    pub fn signal(&self, descriptor: FrameDescriptor) {
        let mut state = self.lock();
        if state.fired {
            state.stats.overwritten += 1;
        }
        state.fired = true;
        state.descriptor = descriptor;
        state.stats.signals += 1;
        drop(state);
        self.ready.notify_all();
    }

    /// Consumer side: block until a signal is pending or `timeout` elapses.
    ///
    /// A fired result clears the flag under the same lock that observed it, so a
    /// signal is handed out at most once. Spurious wakeups are absorbed by the
    /// predicate re-check.
    pub fn wait_or_timeout(&self, timeout: Duration) -> WaitOutcome {
        let state = self.lock();
        let (mut state, _timeout) = self
            .ready
            .wait_timeout_while(state, timeout, |s| !s.fired)
            .unwrap_or_else(PoisonError::into_inner);

        // A signal that lands right at the deadline still counts.
        if state.fired {
            state.fired = false;
            state.stats.consumed += 1;
            WaitOutcome::Fired(state.descriptor)
        } else {
            WaitOutcome::TimedOut
        }
    }

    /// Clear flag, descriptor and counters. Called at the start of every run.
    pub fn reset(&self) {
        *self.lock() = EventState::default();
    }

    /// Whether a signal is pending.
    pub fn is_fired(&self) -> bool {
        self.lock().fired
    }

    /// Snapshot of the signal counters.
    pub fn stats(&self) -> FrameEventStats {
        self.lock().stats
    }

    // Poison only means another holder panicked mid-update; the state is plain data
    // and stays usable. Must not panic: the producer runs on the driver's thread.
    fn lock(&self) -> MutexGuard<'_, EventState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn descriptor(sequence: i32) -> FrameDescriptor {
        FrameDescriptor {
            sequence,
            timestamp: i64::from(sequence) * 100,
            buffer_offset: Some(0),
            degraded: false,
        }
    }

    #[test]
    fn times_out_without_signal() {
        let event = FrameEvent::new();
        let start = Instant::now();
        assert_eq!(
            event.wait_or_timeout(Duration::from_millis(30)),
            WaitOutcome::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn pending_signal_is_returned_immediately() {
        let event = FrameEvent::new();
        event.signal(descriptor(7));
        assert_eq!(
            event.wait_or_timeout(Duration::from_secs(5)),
            WaitOutcome::Fired(descriptor(7))
        );
        assert!(!event.is_fired());
    }

    #[test]
    fn consumed_signal_is_not_delivered_twice() {
        let event = FrameEvent::new();
        event.signal(descriptor(1));
        assert!(matches!(
            event.wait_or_timeout(Duration::from_millis(10)),
            WaitOutcome::Fired(_)
        ));
        assert_eq!(
            event.wait_or_timeout(Duration::from_millis(10)),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn back_to_back_signals_coalesce_to_latest() {
        let event = FrameEvent::new();
        event.signal(descriptor(1));
        event.signal(descriptor(2));
        assert_eq!(
            event.wait_or_timeout(Duration::from_millis(10)),
            WaitOutcome::Fired(descriptor(2))
        );
        assert_eq!(
            event.wait_or_timeout(Duration::from_millis(10)),
            WaitOutcome::TimedOut
        );

        let stats = event.stats();
        assert_eq!(stats.signals, 2);
        assert_eq!(stats.overwritten, 1);
        assert_eq!(stats.consumed, 1);
    }

    #[test]
    fn wakes_waiter_from_another_thread() {
        let event = Arc::new(FrameEvent::new());
        let producer = {
            let event = Arc::clone(&event);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                event.signal(descriptor(42));
            })
        };

        let outcome = event.wait_or_timeout(Duration::from_secs(5));
        producer.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Fired(descriptor(42)));
    }

    #[test]
    fn reset_discards_pending_signal_and_counters() {
        let event = FrameEvent::new();
        event.signal(descriptor(3));
        event.reset();
        assert!(!event.is_fired());
        assert_eq!(event.stats(), FrameEventStats::default());
        assert_eq!(
            event.wait_or_timeout(Duration::from_millis(5)),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn never_consumes_more_than_signalled() {
        let event = Arc::new(FrameEvent::new());
        let producer = {
            let event = Arc::clone(&event);
            thread::spawn(move || {
                for seq in 1..=500 {
                    event.signal(descriptor(seq));
                }
            })
        };

        let mut last_seen = 0;
        loop {
            match event.wait_or_timeout(Duration::from_millis(500)) {
                WaitOutcome::Fired(d) => {
                    assert!(d.sequence > last_seen, "descriptor re-delivered");
                    last_seen = d.sequence;
                }
                WaitOutcome::TimedOut => break,
            }
        }
        producer.join().unwrap();

        let stats = event.stats();
        assert_eq!(stats.signals, 500);
        assert_eq!(stats.consumed + stats.overwritten, stats.signals);
        assert_eq!(last_seen, 500);
    }
}

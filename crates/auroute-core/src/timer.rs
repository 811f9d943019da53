// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! One-shot timers with cancel, driven by the engine's own cooperative
//! loop rather than a background thread. Logical: the main loop decides
//! when "now" advances and which due timers fire, in order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Opaque handle returned by `create_timer`. Cancellation by handle is
/// idempotent; cancelling a timer that already fired is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

pub trait TimerService {
    fn create_timer(&mut self, delay: Duration) -> TimerHandle;
    fn cancel_timer(&mut self, handle: TimerHandle);
    /// Pops every timer due at or before `now`, in firing order.
    fn poll_due(&mut self, now: Instant) -> Vec<TimerHandle>;
    /// Time until the next still-live timer fires, if any.
    fn next_deadline(&self) -> Option<Instant>;
}

struct Entry {
    due: Instant,
    handle: TimerHandle,
}

/// A binary-heap timer wheel. Cancelled handles are tombstoned rather
/// than removed from the heap immediately, since `BinaryHeap` has no
/// O(log n) arbitrary removal; they're skipped when popped.
#[derive(Default)]
pub struct TimerWheel {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    entries: std::collections::HashMap<u64, Entry>,
    cancelled: std::collections::HashSet<u64>,
    next_id: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimerService for TimerWheel {
    fn create_timer(&mut self, delay: Duration) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        let due = Instant::now() + delay;
        let handle = TimerHandle(id);
        self.heap.push(Reverse((due, id)));
        self.entries.insert(id, Entry { due, handle });
        handle
    }

    fn cancel_timer(&mut self, handle: TimerHandle) {
        self.cancelled.insert(handle.0);
        self.entries.remove(&handle.0);
    }

    fn poll_due(&mut self, now: Instant) -> Vec<TimerHandle> {
        let mut fired = Vec::new();
        while let Some(&Reverse((due, id))) = self.heap.peek() {
            if due > now {
                break;
            }
            self.heap.pop();
            if self.cancelled.remove(&id) {
                continue;
            }
            if let Some(entry) = self.entries.remove(&id) {
                fired.push(entry.handle);
            }
        }
        fired
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.due).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_only_due_timers_in_order() {
        let mut tm = TimerWheel::new();
        let a = tm.create_timer(Duration::from_millis(0));
        let b = tm.create_timer(Duration::from_millis(1000));
        let due = tm.poll_due(Instant::now());
        assert_eq!(due, vec![a]);
        assert!(tm.next_deadline().is_some());
        let _ = b;
    }

    #[test]
    fn cancel_is_idempotent_and_skips_firing() {
        let mut tm = TimerWheel::new();
        let a = tm.create_timer(Duration::from_millis(0));
        tm.cancel_timer(a);
        tm.cancel_timer(a);
        let due = tm.poll_due(Instant::now());
        assert!(due.is_empty());
    }
}

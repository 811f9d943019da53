// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stream list: attached client streams kept in descending channel
//! count order (I6), with drain-then-destroy removal, grounded on
//! `stream_list.c`.

use crate::errors::RouterError;
use crate::types::{Direction, Stream};
use std::time::Duration;

/// Callbacks the stream list invokes on the router. Passed in by
/// reference rather than stored, since the router and the stream list
/// both live inside `Engine` and storing a callback here would create
/// a borrow cycle; this mirrors the C API's pattern of passing
/// function pointers at `stream_list_create` without literally holding
/// onto a circular reference in the Rust port.
pub trait StreamListCallbacks {
    fn on_stream_added(&mut self, stream: &Stream) -> Result<(), RouterError>;
    /// Returns the drain delay in milliseconds; 0 means fully drained.
    /// `remaining_non_pinned` is the count of other non-pinned streams of
    /// `stream`'s direction still in the list, for idle-deadline gating.
    fn on_stream_removed(&mut self, stream: &Stream, remaining_non_pinned: usize) -> u64;
    /// Invoked after every structural mutation (add, remove, drain
    /// completion) so the effect evaluator can recompute its blocked
    /// flag on every change, not only on add.
    fn on_list_changed(&mut self, streams: &[Stream]);
}

#[derive(Default)]
pub struct StreamList {
    streams: Vec<Stream>,
    to_delete: Vec<Stream>,
}

impl StreamList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn get(&self, id: u64) -> Option<&Stream> {
        self.streams.iter().find(|s| s.id == id)
    }

    /// Inserts in descending channel-count order; ties preserve
    /// insertion order (I6). If the router rejects the stream, it is
    /// removed and the router's error is returned.
    pub fn add(&mut self, stream: Stream, cb: &mut dyn StreamListCallbacks) -> Result<u64, RouterError> {
        let id = stream.id;
        let pos = self
            .streams
            .iter()
            .position(|s| s.format.num_channels <= stream.format.num_channels)
            .unwrap_or(self.streams.len());
        self.streams.insert(pos, stream);
        let added = &self.streams[pos];
        if let Err(e) = cb.on_stream_added(added) {
            self.streams.remove(pos);
            cb.on_list_changed(&self.streams);
            return Err(e);
        }
        cb.on_list_changed(&self.streams);
        Ok(id)
    }

    /// Removes eagerly from the visible list and queues on the
    /// internal to-delete list; the caller must follow up with
    /// `drive_drain` to run the first drain pass.
    pub fn remove(&mut self, id: u64) -> Result<(), RouterError> {
        let pos = self.streams.iter().position(|s| s.id == id).ok_or(RouterError::NoDevice)?;
        let stream = self.streams.remove(pos);
        self.to_delete.push(stream);
        Ok(())
    }

    /// Only valid for input streams: removes without draining.
    pub fn direct_remove(&mut self, id: u64, cb: &mut dyn StreamListCallbacks) -> Result<(), RouterError> {
        let pos = self.streams.iter().position(|s| s.id == id).ok_or(RouterError::NoDevice)?;
        if self.streams[pos].direction != Direction::Input {
            return Err(RouterError::Unsupported);
        }
        self.streams.remove(pos);
        cb.on_list_changed(&self.streams);
        Ok(())
    }

    pub fn remove_all_for_client(&mut self, ids: &[u64]) {
        for &id in ids {
            if let Some(pos) = self.streams.iter().position(|s| s.id == id) {
                let stream = self.streams.remove(pos);
                self.to_delete.push(stream);
            }
        }
    }

    /// One drain pass over the to-delete list. Streams reporting a
    /// zero delay are destroyed. Returns the rearm delay
    /// (`max(drain_delay, drain_min)`) if any stream still has frames
    /// left, or `None` if the to-delete list is now empty.
    pub fn drive_drain(&mut self, cb: &mut dyn StreamListCallbacks, drain_min: Duration) -> Option<Duration> {
        let mut max_delay_ms = 0u64;
        let mut remaining = Vec::new();
        let mut changed = false;
        // Collected up front so `num_non_pinned` below can borrow
        // `self.streams` freely instead of fighting a live borrow of
        // `self.to_delete` from an in-place drain iterator.
        let draining: Vec<Stream> = self.to_delete.drain(..).collect();
        for stream in draining {
            let remaining_non_pinned = self.num_non_pinned(stream.direction);
            let delay_ms = cb.on_stream_removed(&stream, remaining_non_pinned);
            if delay_ms == 0 {
                changed = true;
            } else {
                max_delay_ms = max_delay_ms.max(delay_ms);
                remaining.push(stream);
            }
        }
        self.to_delete = remaining;
        if changed {
            cb.on_list_changed(&self.streams);
        }
        if self.to_delete.is_empty() {
            None
        } else {
            Some(Duration::from_millis(max_delay_ms).max(drain_min))
        }
    }

    pub fn has_pinned(&self, dev_idx: u32) -> bool {
        self.streams
            .iter()
            .chain(self.to_delete.iter())
            .any(|s| s.is_pinned && s.pinned_dev_idx == Some(dev_idx))
    }

    pub fn num_output(&self) -> usize {
        self.streams.iter().filter(|s| s.direction == Direction::Output).count()
    }

    pub fn num_non_pinned(&self, direction: Direction) -> usize {
        self.streams
            .iter()
            .filter(|s| s.direction == direction && !s.is_pinned)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientType, Format, Stream, StreamEffects, StreamType};
    use std::time::Instant;

    fn stream(id: u64, channels: u32, direction: Direction) -> Stream {
        Stream {
            id,
            direction,
            format: Format { num_channels: channels, frame_rate: 48000 },
            effects: StreamEffects::default(),
            is_pinned: false,
            pinned_dev_idx: None,
            client_type: ClientType::Test,
            stream_type: StreamType::Default,
            is_hotword: false,
            is_server_only: false,
            cb_threshold: 480,
            start_ts: Instant::now(),
        }
    }

    struct AcceptAll;
    impl StreamListCallbacks for AcceptAll {
        fn on_stream_added(&mut self, _stream: &Stream) -> Result<(), RouterError> {
            Ok(())
        }
        fn on_stream_removed(&mut self, _stream: &Stream, _remaining_non_pinned: usize) -> u64 {
            0
        }
        fn on_list_changed(&mut self, _streams: &[Stream]) {}
    }

    #[test]
    fn i6_inserts_in_descending_channel_order() {
        let mut list = StreamList::new();
        let mut cb = AcceptAll;
        list.add(stream(1, 2, Direction::Output), &mut cb).unwrap();
        list.add(stream(2, 6, Direction::Output), &mut cb).unwrap();
        list.add(stream(3, 4, Direction::Output), &mut cb).unwrap();
        let channels: Vec<u32> = list.streams().iter().map(|s| s.format.num_channels).collect();
        assert_eq!(channels, vec![6, 4, 2]);
    }

    #[test]
    fn ties_preserve_insertion_order() {
        let mut list = StreamList::new();
        let mut cb = AcceptAll;
        list.add(stream(1, 2, Direction::Output), &mut cb).unwrap();
        list.add(stream(2, 2, Direction::Output), &mut cb).unwrap();
        let ids: Vec<u64> = list.streams().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    struct RejectAll;
    impl StreamListCallbacks for RejectAll {
        fn on_stream_added(&mut self, _stream: &Stream) -> Result<(), RouterError> {
            Err(RouterError::NoDevice)
        }
        fn on_stream_removed(&mut self, _stream: &Stream, _remaining_non_pinned: usize) -> u64 {
            0
        }
        fn on_list_changed(&mut self, _streams: &[Stream]) {}
    }

    #[test]
    fn rejected_add_leaves_list_empty() {
        let mut list = StreamList::new();
        let mut cb = RejectAll;
        let err = list.add(stream(1, 2, Direction::Output), &mut cb).unwrap_err();
        assert_eq!(err, RouterError::NoDevice);
        assert!(list.streams().is_empty());
    }

    struct DrainAfter(u64);
    impl StreamListCallbacks for DrainAfter {
        fn on_stream_added(&mut self, _stream: &Stream) -> Result<(), RouterError> {
            Ok(())
        }
        fn on_stream_removed(&mut self, _stream: &Stream, _remaining_non_pinned: usize) -> u64 {
            self.0
        }
        fn on_list_changed(&mut self, _streams: &[Stream]) {}
    }

    #[test]
    fn s6_drain_ordering_arms_then_destroys() {
        let mut list = StreamList::new();
        let mut add_cb = AcceptAll;
        list.add(stream(1, 2, Direction::Output), &mut add_cb).unwrap();
        list.remove(1).unwrap();

        let mut still_draining = DrainAfter(30);
        let rearm = list.drive_drain(&mut still_draining, Duration::from_millis(10));
        assert_eq!(rearm, Some(Duration::from_millis(30)));

        let mut now_done = DrainAfter(0);
        let rearm = list.drive_drain(&mut now_done, Duration::from_millis(10));
        assert_eq!(rearm, None);
        assert!(list.get(1).is_none());
    }

    #[test]
    fn direct_remove_rejects_output_streams() {
        let mut list = StreamList::new();
        let mut cb = AcceptAll;
        list.add(stream(1, 2, Direction::Output), &mut cb).unwrap();
        assert_eq!(list.direct_remove(1, &mut cb), Err(RouterError::Unsupported));
    }
}

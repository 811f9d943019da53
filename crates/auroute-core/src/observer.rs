// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Typed observer registry. Subscribers implement `EngineObserver`;
//! the engine invokes each registered subscriber's matching method, in
//! registration order, on the main thread. A subscriber callback that
//! re-enters a router operation is tolerated (deferred mutation is
//! unnecessary here since the main thread is never itself inside a
//! borrow when it calls out — see `Engine::notify`).

use auroute_ipc::Direction;

#[allow(unused_variables)]
pub trait EngineObserver {
    fn output_volume_changed(&mut self, volume: i32) {}
    fn output_mute_changed(&mut self, muted: bool, user_muted: bool, mute_locked: bool) {}
    fn capture_mute_changed(&mut self, muted: bool, mute_locked: bool) {}
    fn nodes_changed(&mut self) {}
    fn active_node_changed(&mut self, direction: Direction, node_id: u64) {}
    fn output_node_volume_changed(&mut self, node_id: u64, volume: i32) {}
    fn node_left_right_swapped_changed(&mut self, node_id: u64, swapped: bool) {}
    fn input_node_gain_changed(&mut self, node_id: u64, gain: i32) {}
    fn suspend_changed(&mut self, suspended: bool) {}
    fn num_active_streams_changed(&mut self, direction: Direction, count: u32) {}
    fn hotword_triggered(&mut self, tv_sec: i64, tv_nsec: i64) {}
    fn non_empty_audio_state_changed(&mut self, non_empty: bool) {}
    fn underrun(&mut self) {}
    fn severe_underrun(&mut self) {}
    fn sidetone_supported_changed(&mut self, supported: bool) {}
    fn audio_effects_ready_changed(&mut self, ready: bool) {}
}

/// `(dev_idx, node_idx)` encoded the way the published snapshot and the
/// observer contract address nodes: low 32 bits node idx, high 32 bits
/// device idx.
pub fn node_id(dev_idx: u32, node_idx: u32) -> u64 {
    ((dev_idx as u64) << 32) | node_idx as u64
}

#[derive(Default)]
pub struct ObserverRegistry {
    subscribers: Vec<Box<dyn EngineObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Box<dyn EngineObserver>) {
        self.subscribers.push(observer);
    }

    pub fn notify(&mut self, mut f: impl FnMut(&mut dyn EngineObserver)) {
        for sub in &mut self.subscribers {
            f(sub.as_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        nodes_changed: u32,
    }

    impl EngineObserver for Counter {
        fn nodes_changed(&mut self) {
            self.nodes_changed += 1;
        }
    }

    #[test]
    fn node_id_packs_and_is_stable() {
        assert_eq!(node_id(7, 1), (7u64 << 32) | 1);
    }

    #[test]
    fn registry_invokes_in_registration_order() {
        let mut reg = ObserverRegistry::new();
        let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

        struct Tagged(std::rc::Rc<std::cell::RefCell<Vec<u32>>>, u32);
        impl EngineObserver for Tagged {
            fn nodes_changed(&mut self) {
                self.0.borrow_mut().push(self.1);
            }
        }

        reg.subscribe(Box::new(Tagged(order.clone(), 1)));
        reg.subscribe(Box::new(Tagged(order.clone(), 2)));
        reg.notify(|o| o.nodes_changed());
        assert_eq!(*order.borrow(), vec![1, 2]);
    }
}

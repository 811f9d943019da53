// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Cross-cutting effect-policy evaluator (§4.7): decides whether
//! DSP-offloaded AEC may be active, derived from live output topology
//! and the current input stream set.

use crate::types::{Direction, Stream, StreamEffects};
use auroute_ipc::NcProvider;

#[derive(Debug, Default)]
pub struct EffectEvaluator {
    /// True iff any non-reserved output device with an active node that
    /// is *not* DSP-AEC-capable is currently enabled or open.
    non_dsp_aec_echo_ref_dev_alive: bool,
    /// True iff any input stream cannot use DSP AEC.
    aec_on_dsp_is_disallowed: bool,
    /// Collapses the OR to only `non_dsp_aec_echo_ref_dev_alive` when set.
    nc_standalone_mode: bool,
    blocked: bool,
}

impl EffectEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocked(&self) -> bool {
        self.blocked
    }

    pub fn set_nc_standalone_mode(&mut self, enabled: bool) {
        self.nc_standalone_mode = enabled;
        self.recompute();
    }

    /// Recomputes `aec_on_dsp_is_disallowed` from the current stream
    /// set. Must be invoked on *every* stream-list mutation (add,
    /// remove, drain completion) per `stream_list_changed_cb`, not only
    /// on stream add.
    pub fn recompute_from_streams(&mut self, streams: &[Stream]) -> bool {
        self.aec_on_dsp_is_disallowed = can_use_dsp_aec_disallowed(streams);
        self.recompute()
    }

    /// Recomputes `non_dsp_aec_echo_ref_dev_alive` from live device
    /// state. `non_dsp_aec_capable_output_alive` is true iff any
    /// non-reserved output device with an active node that is not
    /// DSP-AEC-capable is enabled or open.
    pub fn set_non_dsp_aec_echo_ref_dev_alive(&mut self, alive: bool) -> bool {
        self.non_dsp_aec_echo_ref_dev_alive = alive;
        self.recompute()
    }

    /// Recomputes the output flag, returning true iff it *changed*
    /// (I8: toggling causes exactly one republish/notify).
    fn recompute(&mut self) -> bool {
        let new_blocked = if self.nc_standalone_mode {
            self.non_dsp_aec_echo_ref_dev_alive
        } else {
            self.non_dsp_aec_echo_ref_dev_alive || self.aec_on_dsp_is_disallowed
        };
        let changed = new_blocked != self.blocked;
        self.blocked = new_blocked;
        changed
    }

    /// Policy function computing a node's `desired_nc_provider` (§4.8)
    /// from its own provider set, the engine's current dsp/ap
    /// allowances, and the current blocked flag.
    pub fn desired_nc_provider(
        &self,
        node_providers: &std::collections::BTreeSet<NcProvider>,
        dsp_allowed: bool,
        ap_allowed: bool,
    ) -> Option<NcProvider> {
        if node_providers.contains(&NcProvider::Dsp) && dsp_allowed && !self.blocked {
            return Some(NcProvider::Dsp);
        }
        if node_providers.contains(&NcProvider::Ap) && ap_allowed {
            return Some(NcProvider::Ap);
        }
        None
    }
}

/// Every input stream that is not a utility stream and does not carry
/// `DONT_CARE_APM_EFFECTS` must request both `APM_ECHO_CANCELLATION`
/// and `DSP_ECHO_CANCELLATION_ALLOWED`; if any such stream is missing
/// either bit, DSP AEC is disallowed system-wide.
fn can_use_dsp_aec_disallowed(streams: &[Stream]) -> bool {
    streams
        .iter()
        .filter(|s| s.direction == Direction::Input)
        .filter(|s| !s.is_utility())
        .filter(|s| !s.effects.contains(StreamEffects::DONT_CARE_APM_EFFECTS))
        .any(|s| {
            !s.effects.contains(StreamEffects::APM_ECHO_CANCELLATION)
                || !s.effects.contains(StreamEffects::DSP_ECHO_CANCELLATION_ALLOWED)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientType, Format, Stream, StreamType};
    use std::time::Instant;

    fn input_stream(effects: u32, stream_type: StreamType) -> Stream {
        Stream {
            id: 1,
            direction: Direction::Input,
            format: Format { num_channels: 1, frame_rate: 48000 },
            effects: StreamEffects(effects),
            is_pinned: false,
            pinned_dev_idx: None,
            client_type: ClientType::Test,
            stream_type,
            is_hotword: false,
            is_server_only: false,
            cb_threshold: 480,
            start_ts: Instant::now(),
        }
    }

    #[test]
    fn i8_pure_function_of_its_two_inputs() {
        let mut eval = EffectEvaluator::new();
        assert!(!eval.blocked());
        let changed = eval.set_non_dsp_aec_echo_ref_dev_alive(true);
        assert!(changed);
        assert!(eval.blocked());
    }

    #[test]
    fn utility_streams_are_excluded_from_the_predicate() {
        let streams = vec![input_stream(0, StreamType::Utility)];
        assert!(!can_use_dsp_aec_disallowed(&streams));
    }

    #[test]
    fn dont_care_streams_are_excluded() {
        let streams = vec![input_stream(StreamEffects::DONT_CARE_APM_EFFECTS, StreamType::Default)];
        assert!(!can_use_dsp_aec_disallowed(&streams));
    }

    #[test]
    fn missing_dsp_aec_bit_disallows_system_wide() {
        let streams = vec![input_stream(StreamEffects::APM_ECHO_CANCELLATION, StreamType::Default)];
        assert!(can_use_dsp_aec_disallowed(&streams));
    }

    #[test]
    fn both_bits_present_allows() {
        let bits = StreamEffects::APM_ECHO_CANCELLATION | StreamEffects::DSP_ECHO_CANCELLATION_ALLOWED;
        let streams = vec![input_stream(bits, StreamType::Default)];
        assert!(!can_use_dsp_aec_disallowed(&streams));
    }

    #[test]
    fn s5_toggle_reflects_in_evaluator() {
        let mut eval = EffectEvaluator::new();
        eval.set_non_dsp_aec_echo_ref_dev_alive(false);
        assert!(!eval.blocked());
        let changed = eval.set_non_dsp_aec_echo_ref_dev_alive(true);
        assert!(changed && eval.blocked());
        let changed_again = eval.set_non_dsp_aec_echo_ref_dev_alive(true);
        assert!(!changed_again, "no-op toggle must not report a change");
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! PipeWire object shapes the thread discovers via the registry
//! listener, trimmed to what the device backend needs: node identity
//! and media class. Port/link bookkeeping lives in `thread.rs` since
//! nothing outside the PipeWire thread needs to see individual ports.

use std::collections::HashMap;

/// A PipeWire node as seen through the registry's `global` callback.
#[derive(Debug, Clone)]
pub struct PwNode {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub media_class: MediaClass,
    pub properties: HashMap<String, String>,
}

impl PwNode {
    pub fn new(id: u32) -> Self {
        PwNode {
            id,
            name: String::new(),
            description: String::new(),
            media_class: MediaClass::Unknown(String::new()),
            properties: HashMap::new(),
        }
    }
}

/// `media.class` classification, restricted to the values relevant to
/// hardware/virtual playback and capture endpoints; everything else
/// (application streams, video) is `Unknown` and ignored by the
/// registry listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaClass {
    AudioSink,
    AudioSource,
    StreamOutputAudio,
    StreamInputAudio,
    Unknown(String),
}

impl MediaClass {
    pub fn from_str(s: &str) -> Self {
        match s {
            "Audio/Sink" => MediaClass::AudioSink,
            "Audio/Source" => MediaClass::AudioSource,
            "Stream/Output/Audio" => MediaClass::StreamOutputAudio,
            "Stream/Input/Audio" => MediaClass::StreamInputAudio,
            other => MediaClass::Unknown(other.to_string()),
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A dedicated OS thread owning the `pipewire::MainLoop`, exchanging
//! `PwCommand`/`PwEvent` with the engine thread over channels so the
//! engine's router never blocks on PipeWire round-trips. Grounded on
//! `sootmix-daemon::audio::pipewire_thread`'s `PwThread`/`PwCommand`/
//! `PwEvent` split, narrowed from app-mixing virtual-sink commands
//! down to the device-routing commands this crate's `DeviceBackend`
//! and `RealtimeWorker` impls need.

use crate::types::{MediaClass, PwNode};
use pipewire::link::Link;
use pipewire::node::Node;
use pipewire::properties::properties;
use pipewire::spa::param::ParamType;
use pipewire::spa::pod::Pod;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Commands sent from the engine thread to the PipeWire thread. Every
/// variant maps onto one `DeviceBackend`/`RealtimeWorker` call; see
/// `backend.rs`/`worker.rs` for the mapping.
#[derive(Debug, Clone)]
pub enum PwCommand {
    /// Negotiate the node's format and bring it into the mix graph.
    OpenNode { node_id: u32, channels: u32, rate: u32 },
    CloseNode { node_id: u32 },
    SetVolume { node_id: u32, volume: f32 },
    SetMute { node_id: u32, muted: bool },
    /// `enabled=false` is used by `rm_active_node`'s group disable.
    UpdateActiveNode { node_id: u32, enabled: bool },
    LinkNodes { output_node: u32, input_node: u32 },
    UnlinkNodes { output_node: u32, input_node: u32 },
    Shutdown,
}

/// Events sent from the PipeWire thread to the engine thread. The
/// daemon's main loop drains these every tick and folds `NodeAdded`/
/// `NodeRemoved` into the `PwDeviceBackend`'s dev_idx binding table;
/// everything else is diagnostic.
#[derive(Debug, Clone)]
pub enum PwEvent {
    Connected,
    Disconnected,
    NodeAdded(PwNode),
    NodeRemoved(u32),
    /// Acknowledges `PwCommand::OpenNode`; the backend's bounded wait in
    /// `backend.rs` blocks for this rather than real hardware I/O, since
    /// binding a proxy and pushing initial params is control-plane work,
    /// not the realtime path the router's no-blocking rule is about.
    NodeOpened { node_id: u32, ok: bool },
    LinkCreated { output_node: u32, input_node: u32, link_id: u32 },
    LinkFailed { output_node: u32, input_node: u32, reason: String },
    Error(String),
}

#[derive(Debug, Error)]
pub enum PwError {
    #[error("PipeWire initialization failed: {0}")]
    InitFailed(String),
    #[error("failed to connect to PipeWire: {0}")]
    ConnectionFailed(String),
    #[error("PipeWire thread error: {0}")]
    ThreadError(String),
}

struct BoundNode {
    proxy: Node,
}

struct CreatedLink {
    #[allow(dead_code)]
    proxy: Link,
}

#[derive(Default)]
struct PwThreadState {
    nodes: HashMap<u32, PwNode>,
    bound: HashMap<u32, BoundNode>,
    links: HashMap<(u32, u32), CreatedLink>,
    next_link_id: u32,
}

/// Handle to the running PipeWire thread; owns the command channel and
/// the join handle so dropping it cleanly shuts the thread down.
pub struct PwThread {
    cmd_tx: pipewire::channel::Sender<PwCommand>,
    handle: Option<JoinHandle<()>>,
}

impl PwThread {
    /// Spawns the PipeWire thread; `PwEvent`s arrive on `event_rx`
    /// paired with the returned `event_tx`'s receiver, constructed by
    /// the caller via `std::sync::mpsc::channel()`.
    pub fn spawn(event_tx: mpsc::Sender<PwEvent>) -> Result<Self, PwError> {
        let (cmd_tx, cmd_rx) = pipewire::channel::channel::<PwCommand>();

        let handle = thread::Builder::new()
            .name("auroute-pipewire".to_string())
            .spawn(move || {
                if let Err(e) = run_pipewire_loop(cmd_rx, event_tx.clone()) {
                    error!(%e, "pipewire thread exited with error");
                    let _ = event_tx.send(PwEvent::Error(e.to_string()));
                }
            })
            .map_err(|e| PwError::ThreadError(e.to_string()))?;

        Ok(PwThread { cmd_tx, handle: Some(handle) })
    }

    pub fn send(&self, cmd: PwCommand) -> Result<(), PwError> {
        self.cmd_tx.send(cmd).map_err(|_| PwError::ThreadError("command channel closed".into()))
    }
}

impl Drop for PwThread {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(PwCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_pipewire_loop(cmd_rx: pipewire::channel::Receiver<PwCommand>, event_tx: mpsc::Sender<PwEvent>) -> Result<(), PwError> {
    pipewire::init();
    info!("pipewire initialized");

    let main_loop = pipewire::main_loop::MainLoopRc::new(None).map_err(|e| PwError::InitFailed(e.to_string()))?;
    let context = pipewire::context::ContextRc::new(&main_loop, None).map_err(|e| PwError::InitFailed(e.to_string()))?;
    let core = context.connect_rc(None).map_err(|e| PwError::ConnectionFailed(e.to_string()))?;
    let registry = core.get_registry_rc().map_err(|e| PwError::ConnectionFailed(e.to_string()))?;

    info!("connected to pipewire");
    let _ = event_tx.send(PwEvent::Connected);

    let event_tx = Rc::new(event_tx);
    let state = Rc::new(RefCell::new(PwThreadState::default()));

    let main_loop_weak = main_loop.downgrade();
    let state_cmd = state.clone();
    let event_tx_cmd = event_tx.clone();
    let _cmd_receiver = cmd_rx.attach(main_loop.loop_(), move |cmd| {
        handle_command(cmd, &state_cmd, &main_loop_weak, &core, &event_tx_cmd);
    });

    let _registry_listener = setup_registry_listener(&registry, state.clone(), event_tx.clone());

    main_loop.run();

    info!("pipewire thread shutting down");
    let _ = event_tx.send(PwEvent::Disconnected);
    Ok(())
}

fn handle_command(
    cmd: PwCommand,
    state: &Rc<RefCell<PwThreadState>>,
    main_loop_weak: &pipewire::main_loop::MainLoopWeak,
    core: &pipewire::core::CoreRc,
    event_tx: &Rc<mpsc::Sender<PwEvent>>,
) {
    match cmd {
        PwCommand::Shutdown => {
            debug!("received shutdown command");
            if let Some(main_loop) = main_loop_weak.upgrade() {
                main_loop.quit();
            }
        }

        PwCommand::OpenNode { node_id, channels, rate } => {
            debug!(node_id, channels, rate, "opening node");
            // The node's proxy is bound up front when the registry
            // listener first saw it (see `setup_registry_listener`);
            // here we just confirm it's ready to take param changes.
            // The node's own format negotiation is WirePlumber's job
            // (out of scope per the hardware-probing exclusion).
            let ok = state.borrow().bound.contains_key(&node_id);
            let _ = event_tx.send(PwEvent::NodeOpened { node_id, ok });
        }

        PwCommand::CloseNode { node_id } => {
            debug!(node_id, "closing node");
            state.borrow_mut().bound.remove(&node_id);
        }

        PwCommand::SetVolume { node_id, volume } => {
            let result = set_node_volume(state, node_id, volume);
            if let Err(e) = result {
                warn!(node_id, error = %e, "set_volume failed");
            }
        }

        PwCommand::SetMute { node_id, muted } => {
            let result = set_node_mute(state, node_id, muted);
            if let Err(e) = result {
                warn!(node_id, error = %e, "set_mute failed");
            }
        }

        PwCommand::UpdateActiveNode { node_id, enabled } => {
            debug!(node_id, enabled, "update_active_node");
            // Nothing to negotiate at the PipeWire level beyond the
            // volume/mute pods above; `enabled` only matters to the
            // router's own bookkeeping.
        }

        PwCommand::LinkNodes { output_node, input_node } => {
            let link_result = core.create_object::<Link>(
                "link-factory",
                &properties! {
                    "link.output.node" => output_node.to_string(),
                    "link.input.node" => input_node.to_string(),
                    "object.linger" => "true"
                },
            );
            match link_result {
                Ok(link) => {
                    let link_id = {
                        let mut s = state.borrow_mut();
                        let id = s.next_link_id;
                        s.next_link_id += 1;
                        s.links.insert((output_node, input_node), CreatedLink { proxy: link });
                        id
                    };
                    info!(output_node, input_node, link_id, "link created");
                    let _ = event_tx.send(PwEvent::LinkCreated { output_node, input_node, link_id });
                }
                Err(e) => {
                    warn!(output_node, input_node, error = %e, "link creation failed");
                    let _ = event_tx.send(PwEvent::LinkFailed {
                        output_node,
                        input_node,
                        reason: e.to_string(),
                    });
                }
            }
        }

        PwCommand::UnlinkNodes { output_node, input_node } => {
            debug!(output_node, input_node, "unlinking");
            // Dropping the proxy is enough: `object.linger` keeps the
            // link alive server-side only for the creating client's
            // own disconnect, not for an explicit unlink request.
            state.borrow_mut().links.remove(&(output_node, input_node));
        }
    }
}

fn set_node_volume(state: &Rc<RefCell<PwThreadState>>, node_id: u32, volume: f32) -> Result<(), String> {
    let s = state.borrow();
    let bound = s.bound.get(&node_id).ok_or_else(|| format!("node {node_id} not bound"))?;
    let pod_data = build_channel_volumes_pod(&[volume, volume]).map_err(|e| e.to_string())?;
    let pod = Pod::from_bytes(&pod_data).ok_or_else(|| "failed to build volume pod".to_string())?;
    bound.proxy.set_param(ParamType::Props, 0, pod);
    Ok(())
}

fn set_node_mute(state: &Rc<RefCell<PwThreadState>>, node_id: u32, muted: bool) -> Result<(), String> {
    let s = state.borrow();
    let bound = s.bound.get(&node_id).ok_or_else(|| format!("node {node_id} not bound"))?;
    let pod_data = build_mute_pod(muted).map_err(|e| e.to_string())?;
    let pod = Pod::from_bytes(&pod_data).ok_or_else(|| "failed to build mute pod".to_string())?;
    bound.proxy.set_param(ParamType::Props, 0, pod);
    Ok(())
}

fn setup_registry_listener(
    registry: &pipewire::registry::RegistryRc,
    state: Rc<RefCell<PwThreadState>>,
    event_tx: Rc<mpsc::Sender<PwEvent>>,
) -> pipewire::registry::Listener {
    let registry_clone = registry.clone();

    registry
        .add_listener_local()
        .global(move |global| {
            use pipewire::types::ObjectType;
            let Some(props) = global.props else { return };

            match global.type_ {
                ObjectType::Node => {
                    let mut node = PwNode::new(global.id);
                    if let Some(name) = props.get("node.name") {
                        node.name = name.to_string();
                    }
                    if let Some(desc) = props.get("node.description") {
                        node.description = desc.to_string();
                    }
                    if let Some(class) = props.get("media.class") {
                        node.media_class = MediaClass::from_str(class);
                    }
                    for (k, v) in props.iter() {
                        node.properties.insert(k.to_string(), v.to_string());
                    }
                    debug!(id = node.id, name = %node.name, ?node.media_class, "node added");

                    let is_routable = matches!(node.media_class, MediaClass::AudioSink | MediaClass::AudioSource);
                    if is_routable {
                        bind_node_from_global(global, &state, &registry_clone);
                    }

                    state.borrow_mut().nodes.insert(global.id, node.clone());
                    let _ = event_tx.send(PwEvent::NodeAdded(node));
                }
                ObjectType::Link => {}
                _ => {}
            }
        })
        .register()
}

/// Binds a proxy for a sink/source node discovered through the
/// registry listener, so volume/mute param changes and open
/// acknowledgment have something to act on. Grounded on
/// `sootmix-daemon::audio::pipewire_thread::bind_node_from_global`.
fn bind_node_from_global(
    global: &pipewire::registry::GlobalObject<&pipewire::spa::utils::dict::DictRef>,
    state: &Rc<RefCell<PwThreadState>>,
    registry: &pipewire::registry::RegistryRc,
) {
    let node_id = global.id;
    if state.borrow().bound.contains_key(&node_id) {
        return;
    }

    let node: Node = match registry.bind(global) {
        Ok(node) => node,
        Err(e) => {
            warn!(node_id, error = ?e, "failed to bind node proxy");
            return;
        }
    };

    state.borrow_mut().bound.insert(node_id, BoundNode { proxy: node });
    debug!(node_id, "bound node proxy");
}

fn build_channel_volumes_pod(volumes: &[f32]) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    use libspa::pod::serialize::PodSerializer;
    use libspa::pod::Value;
    use std::io::Cursor;

    let props = Value::Object(libspa::pod::Object {
        type_: libspa::sys::SPA_TYPE_OBJECT_Props,
        id: libspa::sys::SPA_PARAM_Props,
        properties: vec![libspa::pod::Property {
            key: libspa::sys::SPA_PROP_channelVolumes,
            flags: libspa::pod::PropertyFlags::empty(),
            value: Value::ValueArray(libspa::pod::ValueArray::Float(volumes.iter().copied().collect())),
        }],
    });

    let mut buffer = Vec::new();
    PodSerializer::serialize(Cursor::new(&mut buffer), &props)?;
    Ok(buffer)
}

fn build_mute_pod(muted: bool) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    use libspa::pod::serialize::PodSerializer;
    use libspa::pod::Value;
    use std::io::Cursor;

    let props = Value::Object(libspa::pod::Object {
        type_: libspa::sys::SPA_TYPE_OBJECT_Props,
        id: libspa::sys::SPA_PARAM_Props,
        properties: vec![libspa::pod::Property {
            key: libspa::sys::SPA_PROP_mute,
            flags: libspa::pod::PropertyFlags::empty(),
            value: Value::Bool(muted),
        }],
    });

    let mut buffer = Vec::new();
    PodSerializer::serialize(Cursor::new(&mut buffer), &props)?;
    Ok(buffer)
}

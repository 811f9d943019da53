// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Auroute Daemon — wires the routing engine to a PipeWire backend and
//! runs it on a single cooperative main loop.

mod config;
mod observer;

use auroute_core::{Device, Direction, Engine, Node, NodeType};
use auroute_pipewire::{MediaClass, PwEvent};
use observer::LoggingObserver;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Binding state the main loop keeps between `dev_idx` and the
/// PipeWire node it was discovered from, so a `NodeRemoved` event can
/// be folded back into `Engine::remove_device`.
#[derive(Default)]
struct Discovery {
    node_to_dev: HashMap<u32, u32>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("auroute_core=debug".parse()?),
        )
        .init();

    info!("auroute daemon starting");

    let config_manager = config::ConfigManager::new()?;
    let router_config = config_manager.load().unwrap_or_default();
    info!(?router_config, "loaded configuration");

    let (backend, worker, shared) = auroute_pipewire::connect()?;

    let mut engine = Engine::new(Box::new(backend), Box::new(worker), router_config.timing());
    engine.subscribe(Box::new(LoggingObserver));
    engine.set_hotword_pause_at_suspend(router_config.hotword_pause_at_suspend);

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        running_handler.store(false, Ordering::SeqCst);
    })?;

    info!("auroute daemon ready");

    let mut discovery = Discovery::default();

    while running.load(Ordering::SeqCst) {
        let events = shared.borrow_mut().poll_events();
        for event in events {
            handle_pw_event(event, &mut engine, &mut discovery, &shared);
        }

        engine.tick(Instant::now());

        let sleep_for = engine
            .next_wakeup()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_millis(100))
            .min(Duration::from_millis(100));
        std::thread::sleep(sleep_for);
    }

    info!("auroute daemon shutting down");
    if let Err(e) = config_manager.save(&router_config) {
        warn!(error = %e, "failed to persist configuration");
    }
    info!("auroute daemon stopped");
    Ok(())
}

fn handle_pw_event(
    event: PwEvent,
    engine: &mut Engine,
    discovery: &mut Discovery,
    shared: &std::rc::Rc<std::cell::RefCell<auroute_pipewire::PwShared>>,
) {
    match event {
        PwEvent::Connected => info!("pipewire connected"),
        PwEvent::Disconnected => warn!("pipewire disconnected"),
        PwEvent::Error(msg) => error!(%msg, "pipewire thread error"),

        PwEvent::NodeAdded(node) => {
            let direction = match node.media_class {
                MediaClass::AudioSink => Direction::Output,
                MediaClass::AudioSource => Direction::Input,
                // Application stream nodes are the client IPC surface's
                // concern, not the device registry's.
                _ => return,
            };

            let node_type = match node.media_class {
                MediaClass::AudioSink | MediaClass::AudioSource => NodeType::Unknown,
                _ => unreachable!(),
            };

            let mut device = Device::new(0, direction, 8);
            device.nodes.push(Node::new(0, node.name.clone(), node_type));
            device.active_node_idx = Some(0);

            let result = match direction {
                Direction::Output => engine.add_output_device(device),
                Direction::Input => engine.add_input_device(device),
            };

            match result {
                Ok(dev_idx) => {
                    debug!(dev_idx, node_id = node.id, name = %node.name, "device discovered");
                    shared.borrow_mut().bind(dev_idx, node.id);
                    discovery.node_to_dev.insert(node.id, dev_idx);
                }
                Err(e) => warn!(error = %e, node_id = node.id, "failed to register discovered device"),
            }
        }

        PwEvent::NodeRemoved(node_id) => {
            if let Some(dev_idx) = discovery.node_to_dev.remove(&node_id) {
                debug!(dev_idx, node_id, "device gone");
                if let Err(e) = engine.remove_device(dev_idx) {
                    warn!(error = %e, dev_idx, "failed to remove device on node departure");
                }
                shared.borrow_mut().unbind(dev_idx);
            }
        }

        PwEvent::NodeOpened { .. } => {
            // Consumed synchronously by `PwDeviceBackend::open`'s
            // bounded wait; nothing to do with it here.
        }

        PwEvent::LinkCreated { output_node, input_node, link_id } => {
            debug!(output_node, input_node, link_id, "link created");
        }

        PwEvent::LinkFailed { output_node, input_node, reason } => {
            warn!(output_node, input_node, %reason, "link failed");
        }
    }
}

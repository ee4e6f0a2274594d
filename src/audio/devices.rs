//! Audio device enumeration via the PipeWire registry

use pipewire as pw;
use std::cell::RefCell;
use std::rc::Rc;

/// Direction of an audio device node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

/// Represents an audio device node
#[derive(Clone, Debug)]
pub struct AudioDevice {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub kind: DeviceKind,
}

/// List audio source and sink nodes currently known to PipeWire
///
/// Connects, waits for the initial registry sync, then returns. Blocks for
/// the duration of the roundtrip; call off the interactive path.
pub fn list_devices() -> Result<Vec<AudioDevice>, String> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| format!("Failed to create PipeWire main loop: {}", e))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| format!("Failed to create PipeWire context: {}", e))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| format!("Failed to connect to PipeWire: {}", e))?;

    let registry = core
        .get_registry_rc()
        .map_err(|e| format!("Failed to get PipeWire registry: {}", e))?;

    let devices = Rc::new(RefCell::new(Vec::new()));

    let devices_ref = devices.clone();
    let _registry_listener = registry
        .add_listener_local()
        .global(move |global| {
            if global.type_ != pw::types::ObjectType::Node {
                return;
            }
            let Some(props) = global.props else { return };

            let kind = match props.get("media.class") {
                Some("Audio/Source") => DeviceKind::Input,
                Some("Audio/Sink") => DeviceKind::Output,
                _ => return,
            };

            let name = props.get("node.name").unwrap_or_default().to_string();
            let description = props
                .get("node.description")
                .or_else(|| props.get("node.nick"))
                .unwrap_or(name.as_str())
                .to_string();

            devices_ref.borrow_mut().push(AudioDevice {
                id: global.id,
                name,
                description,
                kind,
            });
        })
        .register();

    // Quit once the initial enumeration has been delivered
    let pending = core
        .sync(0)
        .map_err(|e| format!("Failed to sync with PipeWire: {}", e))?;
    let mainloop_weak = mainloop.downgrade();
    let _core_listener = core
        .add_listener_local()
        .done(move |_id, seq| {
            if seq == pending {
                if let Some(mainloop) = mainloop_weak.upgrade() {
                    mainloop.quit();
                }
            }
        })
        .register();

    mainloop.run();

    let devices = devices.borrow().clone();
    Ok(devices)
}

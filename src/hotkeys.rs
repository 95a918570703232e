use anyhow::{Context, Result, bail};
use evdev::{AttributeSetRef, Device, EventType, InputEventKind, Key as DeviceKey};
use std::io::BufRead;
use std::sync::mpsc::Sender;
use std::thread;
use tracing::{debug, error, info, warn};

use crate::constants::{input, paths, permissions};
use crate::controller::{Command, Key, Modifiers};
use crate::session::Drag;
use crate::types::Vec3;

/// Everything an input source can hand to the main loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Key { key: Key, mods: Modifiers },
    Command(Command),
    Drag(Drag),
    /// Mouse button released after a drag
    Release,
    Quit,
}

/// Find all keyboard devices that support the Enter key
fn find_all_keyboard_devices() -> Result<Vec<Device>> {
    info!(path = %paths::DEV_INPUT, "Scanning for keyboard devices...");

    let mut devices = Vec::new();

    for entry in std::fs::read_dir(paths::DEV_INPUT)
        .with_context(|| format!("Failed to read {} - are you in the '{}' group?", paths::DEV_INPUT, permissions::INPUT_GROUP))?
    {
        let path = entry?.path();

        if let Ok(device) = Device::open(&path)
            && let Some(keys) = device.supported_keys()
            && keys.contains(DeviceKey::KEY_ENTER)
        {
            info!(device_path = %path.display(), name = ?device.name(), key_count = keys.iter().count(), "Found keyboard device");
            devices.push(device);
        }
    }

    if devices.is_empty() {
        bail!(
            "No keyboard device found. Ensure you're in '{}' group:\n\
             {}\n\
             Then log out and back in.",
            permissions::INPUT_GROUP,
            permissions::ADD_TO_INPUT_GROUP
        )
    }

    info!(count = devices.len(), "Listening on keyboard device(s)");

    Ok(devices)
}

/// Spawn one background thread per keyboard device
pub fn spawn_listener(sender: Sender<InputEvent>) -> Result<Vec<thread::JoinHandle<()>>> {
    let devices = find_all_keyboard_devices()?;
    let mut handles = Vec::new();

    for device in devices {
        let sender = sender.clone();
        let handle = thread::spawn(move || {
            info!(device = ?device.name(), "Hotkey listener started");
            if let Err(e) = listen_for_hotkeys(device, sender) {
                error!(error = %e, "Hotkey listener error");
            }
        });
        handles.push(handle);
    }

    Ok(handles)
}

/// Translate a device key into an editor key
pub fn map_key(key: DeviceKey) -> Option<Key> {
    let mapped = match key {
        DeviceKey::KEY_PAGEUP => Key::PageUp,
        DeviceKey::KEY_PAGEDOWN => Key::PageDown,
        DeviceKey::KEY_MINUS | DeviceKey::KEY_KPMINUS => Key::Minus,
        DeviceKey::KEY_EQUAL => Key::Equal,
        DeviceKey::KEY_ENTER | DeviceKey::KEY_KPENTER => Key::Enter,
        DeviceKey::KEY_SPACE => Key::Space,
        DeviceKey::KEY_LEFT => Key::Left,
        DeviceKey::KEY_RIGHT => Key::Right,
        DeviceKey::KEY_UP => Key::Up,
        DeviceKey::KEY_DOWN => Key::Down,
        DeviceKey::KEY_E => Key::E,
        DeviceKey::KEY_P => Key::P,
        DeviceKey::KEY_R => Key::R,
        DeviceKey::KEY_S => Key::S,
        DeviceKey::KEY_Y => Key::Y,
        DeviceKey::KEY_Z => Key::Z,
        _ => return None,
    };
    Some(mapped)
}

fn modifiers(state: &AttributeSetRef<DeviceKey>) -> Modifiers {
    Modifiers {
        control: state.contains(DeviceKey::KEY_LEFTCTRL) || state.contains(DeviceKey::KEY_RIGHTCTRL),
        shift: state.contains(DeviceKey::KEY_LEFTSHIFT) || state.contains(DeviceKey::KEY_RIGHTSHIFT),
    }
}

/// Listen for bound keys on a single device
fn listen_for_hotkeys(mut device: Device, sender: Sender<InputEvent>) -> Result<()> {
    loop {
        let events = device.fetch_events().context("Failed to fetch events")?;

        // Finish with the events iterator before querying key state
        let mut presses = Vec::new();

        for event in events {
            if event.event_type() != EventType::KEY {
                continue;
            }

            if let InputEventKind::Key(key) = event.kind() {
                debug!(key = ?key, value = event.value(), "Key event");
                let down = matches!(event.value(), input::KEY_PRESS | input::KEY_REPEAT);
                if down && let Some(key) = map_key(key) {
                    presses.push(key);
                }
            }
        }

        for key in presses {
            // Real-time modifier state avoids races from batched events
            let key_state = device.get_key_state().context("Failed to get keyboard state")?;
            let mods = modifiers(&key_state);

            debug!(key = ?key, control = mods.control, shift = mods.shift, "Hotkey pressed, sending event");

            sender.send(InputEvent::Key { key, mods }).context("Failed to send key event")?;
        }
    }
}

/// Parse one line of a command script. Blank lines and `#` comments yield
/// nothing.
///
/// ```text
/// undo
/// scrub -50000
/// drag 7 0.1 0.0 0.9
/// release
/// quit
/// ```
pub fn parse_script_line(line: &str) -> Result<Option<InputEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let event = match parts.next().unwrap_or_default() {
        "quit" | "exit" => InputEvent::Quit,
        "release" => InputEvent::Release,
        "drag" => {
            let fields: Vec<&str> = parts.collect();
            let [body, x, y, z] = fields.as_slice() else {
                bail!("drag expects '<body> <x> <y> <z>', got '{line}'");
            };
            let body = body.parse().with_context(|| format!("Invalid body id '{body}'"))?;
            let mut coords = [0.0; 3];
            for (slot, raw) in coords.iter_mut().zip([x, y, z]) {
                *slot = raw.parse().with_context(|| format!("Invalid coordinate '{raw}'"))?;
            }
            InputEvent::Drag(Drag { body, reference: Vec3::from(coords) })
        }
        _ => InputEvent::Command(line.parse()?),
    };
    Ok(Some(event))
}

/// Feed script lines from `reader` to the main loop; ends with `Quit`
pub fn spawn_script_reader<R>(reader: R, sender: Sender<InputEvent>) -> thread::JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for (number, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "Failed to read command line");
                    break;
                }
            };
            match parse_script_line(&line) {
                Ok(Some(event)) => {
                    if sender.send(event).is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(line = number + 1, error = %e, "Skipping command"),
            }
        }
        let _ = sender.send(InputEvent::Quit);
    })
}

/// Check if hotkeys are available (user has input group permissions)
pub fn check_permissions() -> bool {
    std::fs::read_dir(paths::DEV_INPUT).is_ok()
}

/// Print helpful error message if permissions missing
pub fn print_permission_error() {
    error!(path = %paths::DEV_INPUT, "Cannot access input devices");
    error!(group = %permissions::INPUT_GROUP, "Hotkeys require group membership");
    error!(command = %permissions::ADD_TO_INPUT_GROUP, "Add user to input group");
    error!("  Then log out and back in");
    warn!(continuing = true, "Falling back to commands on stdin...");
}

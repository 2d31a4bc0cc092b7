//! Input device enumeration via the PulseAudio introspection API.

use crate::error::DeviceError;
use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::{Context, FlagSet as ContextFlagSet, State as ContextState};
use libpulse_binding::def::Retval;
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::proplist::{properties, Proplist};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::error;

/// A capture source that can serve as the interview microphone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    /// PulseAudio source name, as accepted by `--device`.
    pub name: String,
    pub description: String,
    pub sample_rate: u32,
    pub channels: u8,
}

/// Monitors replay the system's own output; they are never a microphone.
pub fn is_monitor_source(name: &str, monitor_of_sink: Option<u32>) -> bool {
    monitor_of_sink.is_some() || name.ends_with(".monitor") || name.contains("monitor")
}

fn iterate(mainloop: &mut Mainloop) -> Result<(), DeviceError> {
    match mainloop.iterate(false) {
        IterateResult::Quit(_) | IterateResult::Err(_) => {
            Err(DeviceError::Other("mainloop iterate failed".to_string()))
        }
        IterateResult::Success(_) => Ok(()),
    }
}

/// List microphone-like input sources. An empty list means no device.
pub fn list_input_devices() -> Result<Vec<InputDevice>, DeviceError> {
    let mut proplist =
        Proplist::new().ok_or_else(|| DeviceError::Other("failed to create proplist".to_string()))?;
    proplist
        .set_str(properties::APPLICATION_NAME, "bankedge-device-lister")
        .map_err(|_| DeviceError::Other("failed to set proplist".to_string()))?;

    let mut mainloop =
        Mainloop::new().ok_or_else(|| DeviceError::Other("failed to create mainloop".to_string()))?;
    let mut context = Context::new_with_proplist(&mainloop, "bankedge-context", &proplist)
        .ok_or_else(|| DeviceError::Other("failed to create context".to_string()))?;

    context
        .connect(None, ContextFlagSet::NOFLAGS, None)
        .map_err(crate::capture::classify_pa_error)?;

    loop {
        iterate(&mut mainloop)?;
        match context.get_state() {
            ContextState::Ready => break,
            ContextState::Failed | ContextState::Terminated => {
                return Err(DeviceError::Other("sound server connection failed".to_string()));
            }
            _ => {}
        }
    }

    let devices = Rc::new(RefCell::new(Vec::new()));
    let done = Rc::new(RefCell::new(false));
    let devices_cb = devices.clone();
    let done_cb = done.clone();

    let introspector = context.introspect();
    let _op = introspector.get_source_info_list(move |result| match result {
        ListResult::Item(info) => {
            let Some(name) = info.name.as_ref().map(|s| s.to_string()) else {
                return;
            };
            if is_monitor_source(&name, info.monitor_of_sink) {
                return;
            }
            devices_cb.borrow_mut().push(InputDevice {
                description: info
                    .description
                    .as_ref()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| name.clone()),
                name,
                sample_rate: info.sample_spec.rate,
                channels: info.sample_spec.channels,
            });
        }
        ListResult::End => *done_cb.borrow_mut() = true,
        ListResult::Error => {
            error!("Error listing audio sources");
            *done_cb.borrow_mut() = true;
        }
    });

    while !*done.borrow() {
        iterate(&mut mainloop)?;
    }

    context.disconnect();
    mainloop.quit(Retval(0));

    let list = devices.borrow().clone();
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitors_are_excluded() {
        assert!(is_monitor_source("alsa_output.pci-0000_00_1f.3.analog-stereo.monitor", None));
        assert!(is_monitor_source("whatever", Some(0)));
        assert!(!is_monitor_source("alsa_input.usb-Blue_Yeti-00.analog-stereo", None));
    }
}

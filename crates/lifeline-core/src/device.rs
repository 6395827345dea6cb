//! Device availability and identity queries.
//!
//! A run records which device and which build it was executed against so
//! that reports can be traced back to hardware and firmware.

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelError, CommandChannel};

/// System property holding the device codename.
pub const PROP_DEVICE: &str = "ro.product.vendor.device";

/// System property holding the build fingerprint.
pub const PROP_FINGERPRINT: &str = "ro.product.build.fingerprint";

/// Returns the bridge's view of the device state (e.g. `"device"`,
/// `"unauthorized"`), or `None` if the query failed.
pub fn device_state(channel: &dyn CommandChannel) -> Option<String> {
    channel
        .run("get-state", &[])
        .ok()
        .map(|s| s.trim().to_string())
}

/// Returns `true` if a device is attached and ready for commands.
pub fn device_is_available(channel: &dyn CommandChannel) -> bool {
    device_state(channel).as_deref() == Some("device")
}

/// Identity of the device under test, recorded once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Serial passed to `adb -s`, if one was configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// Device codename (`ro.product.vendor.device`).
    pub device: String,
    /// Build fingerprint (`ro.product.build.fingerprint`).
    pub build: String,
}

impl DeviceInfo {
    /// Reads the device codename and build fingerprint via `getprop`.
    pub fn query(channel: &dyn CommandChannel) -> Result<Self, ChannelError> {
        let device = channel.shell(&["getprop", PROP_DEVICE])?;
        let build = channel.shell(&["getprop", PROP_FINGERPRINT])?;
        Ok(Self {
            serial: channel.device().map(|d| d.to_string()),
            device: device.trim().to_string(),
            build: build.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DeviceId;

    struct PropChannel {
        state: Result<&'static str, ()>,
    }

    impl CommandChannel for PropChannel {
        fn device(&self) -> Option<&DeviceId> {
            None
        }

        fn run(&self, command: &str, args: &[&str]) -> Result<String, ChannelError> {
            match (command, args) {
                ("get-state", []) => self.state.map(str::to_string).map_err(|_| {
                    ChannelError::Exit {
                        command: "adb get-state".into(),
                        status: 1,
                        stderr: "error: no devices/emulators found".into(),
                    }
                }),
                ("shell", ["getprop", PROP_DEVICE]) => Ok("oriole\n".into()),
                ("shell", ["getprop", PROP_FINGERPRINT]) => {
                    Ok("google/oriole/oriole:14/UQ1A/1:user/release-keys\n".into())
                }
                _ => panic!("unexpected command {command} {args:?}"),
            }
        }
    }

    #[test]
    fn available_when_state_is_device() {
        let channel = PropChannel { state: Ok("device\n") };
        assert_eq!(device_state(&channel).as_deref(), Some("device"));
        assert!(device_is_available(&channel));
    }

    #[test]
    fn unavailable_when_unauthorized() {
        let channel = PropChannel { state: Ok("unauthorized\n") };
        assert!(!device_is_available(&channel));
    }

    #[test]
    fn unavailable_when_query_fails() {
        let channel = PropChannel { state: Err(()) };
        assert!(device_state(&channel).is_none());
        assert!(!device_is_available(&channel));
    }

    #[test]
    fn query_trims_properties() {
        let channel = PropChannel { state: Ok("device") };
        let info = DeviceInfo::query(&channel).unwrap();
        assert_eq!(info.device, "oriole");
        assert_eq!(info.build, "google/oriole/oriole:14/UQ1A/1:user/release-keys");
        assert!(info.serial.is_none());
    }
}

//! Process-wide LVM configuration overrides.
//!
//! The `--config` string and `--devices` filter are folded into every
//! method call's option dictionary. Both are guarded by one mutex which is
//! also held while a call is being assembled and issued, so two concurrent
//! callers can never see each other's overrides.

use std::sync::{Mutex, MutexGuard};

use crate::avail::{is_tech_avail, LvmTech, LvmTechMode};
use crate::LvmError;

#[derive(Debug, Default)]
pub(crate) struct LvmConfig {
    pub(crate) global_config: Option<String>,
    pub(crate) devices_filter: Option<String>,
}

static CONFIG: Mutex<LvmConfig> = Mutex::new(LvmConfig {
    global_config: None,
    devices_filter: None,
});

pub(crate) fn lock_config() -> MutexGuard<'static, LvmConfig> {
    CONFIG.lock().unwrap_or_else(|e| e.into_inner())
}

/// Set the global LVM configuration string folded into every call as
/// `--config`; `None` (or an empty string) resets it.
pub fn set_global_config(new_config: Option<&str>) {
    let mut config = lock_config();
    config.global_config = new_config.filter(|c| !c.is_empty()).map(str::to_string);
}

/// The currently set global LVM configuration string ("" when unset).
pub fn get_global_config() -> String {
    lock_config().global_config.clone().unwrap_or_default()
}

/// Restrict LVM commands to the given devices (the `--devices` option);
/// an empty list resets the filter.
pub fn set_devices_filter(devices: &[String]) -> Result<(), LvmError> {
    is_tech_avail(LvmTech::Devices, LvmTechMode::empty())?;
    let mut config = lock_config();
    config.devices_filter = if devices.is_empty() {
        None
    } else {
        Some(devices.join(","))
    };
    Ok(())
}

/// The currently set devices filter.
pub fn get_devices_filter() -> Vec<String> {
    lock_config()
        .devices_filter
        .as_deref()
        .map(|d| d.split(',').map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_roundtrip() {
        assert_eq!(get_global_config(), "");
        set_global_config(Some("devices { filter=[\"a|.*|\"] }"));
        assert_eq!(get_global_config(), "devices { filter=[\"a|.*|\"] }");
        set_global_config(Some(""));
        assert_eq!(get_global_config(), "");
        set_global_config(None);
        assert_eq!(get_global_config(), "");
    }
}

//! LVM devices file management (`lvmdevices`).

use std::process::Command;

use camino::Utf8Path;

use blockdev_utils::{CommandRunExt, ExtraArg};

use crate::avail::{is_tech_avail, LvmTech, LvmTechMode};
use crate::config::lock_config;
use crate::LvmError;

/// Whether the LVM devices file is enabled. The `lvmdevices` command being
/// available does not mean the feature is actually on; lvm.conf (or a
/// `--config` override) decides.
fn lvm_devices_enabled() -> bool {
    // try the full config first; a value there means the feature is
    // explicitly configured
    let config_arg = {
        let config = lock_config();
        config
            .global_config
            .as_ref()
            .map(|c| format!("--config={c}"))
    };
    let mut cmd = Command::new("lvmconfig");
    cmd.args(["--typeconfig", "full", "devices/use_devicesfile"]);
    if let Some(config_arg) = &config_arg {
        cmd.arg(config_arg);
    }
    if let Ok(output) = cmd.run_get_output() {
        return parse_use_devicesfile(&output, "use_devicesfile=");
    }

    // no explicit setting: fall back to the compiled-in default
    match Command::new("lvmconfig")
        .args(["--typeconfig", "default", "devices/use_devicesfile"])
        .run_get_output()
    {
        Ok(output) => parse_use_devicesfile(&output, "# use_devicesfile="),
        Err(_) => false,
    }
}

fn parse_use_devicesfile(output: &str, prefix: &str) -> bool {
    output
        .lines()
        .find_map(|l| l.trim().strip_prefix(prefix))
        .and_then(|v| v.trim().parse::<u32>().ok())
        .map(|v| v != 0)
        .unwrap_or(false)
}

fn devices_file_op(
    op: &str,
    device: &Utf8Path,
    devices_file: Option<&Utf8Path>,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    is_tech_avail(LvmTech::Devices, LvmTechMode::empty())?;
    if !lvm_devices_enabled() {
        return Err(LvmError::DevicesDisabled(
            "LVM devices file not enabled.".to_string(),
        ));
    }

    let mut cmd = Command::new("lvmdevices");
    cmd.args([op, device.as_str()]);
    if let Some(devices_file) = devices_file {
        cmd.arg(format!("--devicesfile={devices_file}"));
    }
    cmd.extra_args(extra).run()?;
    Ok(())
}

/// Add `device` to the LVM devices file (the system one, at
/// `/etc/lvm/devices/system.devices`, unless another file is given).
pub fn devices_add(
    device: &Utf8Path,
    devices_file: Option<&Utf8Path>,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    devices_file_op("--adddev", device, devices_file, extra)
}

/// Delete `device` from the LVM devices file.
pub fn devices_delete(
    device: &Utf8Path,
    devices_file: Option<&Utf8Path>,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    devices_file_op("--deldev", device, devices_file, extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_use_devicesfile() {
        assert!(parse_use_devicesfile("use_devicesfile=1", "use_devicesfile="));
        assert!(!parse_use_devicesfile("use_devicesfile=0", "use_devicesfile="));
        assert!(parse_use_devicesfile(
            "# use_devicesfile=1",
            "# use_devicesfile="
        ));
        assert!(!parse_use_devicesfile("garbage", "use_devicesfile="));
        assert!(!parse_use_devicesfile("", "use_devicesfile="));
    }
}

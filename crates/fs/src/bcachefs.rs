//! The bcachefs family, driven through bcachefs-tools. Like btrfs, most
//! operations work on a mounted filesystem; only single-device volumes are
//! supported here.

use std::process::Command;
use std::sync::OnceLock;

use camino::Utf8Path;
use regex::Regex;

use blockdev_utils::{check_deps, CommandRunExt, DepsCache, ExtraArg, UtilDep};

use crate::common::{check_uuid_rfc4122, parse_u64};
use crate::family::{required_utils, FsMode, FS_MODE_COUNT};
use crate::ops::{BcachefsInfo, MkfsOptions};
use crate::FsError;

static DEPS_CACHE: DepsCache = DepsCache::new();

const DEPS_MKFSBCACHEFS: u32 = 1 << 0;
const DEPS_BCACHEFSCK: u32 = 1 << 1;
const DEPS_BCACHEFS: u32 = 1 << 2;

static DEPS: &[UtilDep] = &[
    UtilDep::new("mkfs.bcachefs"),
    UtilDep::new("fsck.bcachefs"),
    UtilDep::new("bcachefs"),
];

static FS_MODE_UTIL: [u32; FS_MODE_COUNT] = [
    DEPS_MKFSBCACHEFS, // mkfs
    0,                 // wipe
    DEPS_BCACHEFSCK,   // check
    DEPS_BCACHEFSCK,   // repair
    DEPS_BCACHEFS,     // set-label
    DEPS_BCACHEFS,     // query
    DEPS_BCACHEFS,     // resize
    0,                 // set-uuid
];

pub(crate) fn is_tech_avail(modes: FsMode) -> Result<(), FsError> {
    if modes.contains(FsMode::SET_UUID) {
        return Err(FsError::TechUnavail(
            "Bcachefs doesn't support setting UUID for an existing device.".to_string(),
        ));
    }
    let required = required_utils(modes, &FS_MODE_UTIL);
    check_deps(&DEPS_CACHE, required, DEPS)?;
    Ok(())
}

pub(crate) fn mkfs_options(options: &MkfsOptions, extra: &[ExtraArg]) -> Vec<ExtraArg> {
    let mut args = Vec::new();
    if let Some(label) = options.label.as_deref().filter(|l| !l.is_empty()) {
        args.push(ExtraArg::new("-L", label));
    }
    if let Some(uuid) = options.uuid.as_deref().filter(|u| !u.is_empty()) {
        args.push(ExtraArg::new("-U", uuid));
    }
    if options.no_discard {
        args.push(ExtraArg::flag("-K"));
    }
    if options.force {
        args.push(ExtraArg::flag("-f"));
    }
    args.extend_from_slice(extra);
    args
}

pub fn mkfs(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_MKFSBCACHEFS, DEPS)?;
    Command::new("mkfs.bcachefs")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// Wipe the bcachefs signature from `device`.
pub fn wipe(device: &Utf8Path) -> Result<(), FsError> {
    Ok(blockdev_probe::wipe_fs(device, Some("bcachefs"), false)?)
}

/// Check a bcachefs filesystem; returns whether it is clean. A non-zero
/// exit status means "not clean", not an error.
pub fn check(device: &Utf8Path, extra: &[ExtraArg]) -> Result<bool, FsError> {
    check_deps(&DEPS_CACHE, DEPS_BCACHEFSCK, DEPS)?;
    let (status, _stderr) = Command::new("fsck.bcachefs")
        .arg("-n")
        .extra_args(extra)
        .arg(device.as_str())
        .run_get_status()?;
    Ok(status.success())
}

pub fn repair(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_BCACHEFSCK, DEPS)?;
    Command::new("fsck.bcachefs")
        .arg("-y")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn set_label(device: &Utf8Path, label: &str) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_BCACHEFS, DEPS)?;
    Command::new("bcachefs")
        .arg("set-fs-option")
        .arg(format!("--fs_label={label}"))
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn check_label(_label: &str) -> Result<(), FsError> {
    Ok(())
}

pub fn check_uuid(uuid: &str) -> Result<(), FsError> {
    check_uuid_rfc4122(uuid)
}

fn usage_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            Filesystem:\s+(?P<uuid>\S+)\s+
            Size:\s+(?P<size>\d+)\s+
            Used:\s+(?P<used>\d+)",
        )
        .unwrap()
    })
}

fn parse_usage_output(output: &str) -> Result<BcachefsInfo, FsError> {
    let caps = usage_regex().captures(output).ok_or_else(|| {
        FsError::Parse("Failed to parse bcachefs file system information".to_string())
    })?;
    let size = parse_u64(&caps["size"]).unwrap_or(0);
    let used = parse_u64(&caps["used"]).unwrap_or(0);
    Ok(BcachefsInfo {
        uuid: caps["uuid"].to_string(),
        size,
        free_space: size.saturating_sub(used),
    })
}

/// Read information about the bcachefs filesystem mounted on `mountpoint`.
pub fn get_info(mountpoint: &Utf8Path) -> Result<BcachefsInfo, FsError> {
    check_deps(&DEPS_CACHE, DEPS_BCACHEFS, DEPS)?;
    let output = Command::new("bcachefs")
        .args(["fs", "usage", mountpoint.as_str()])
        .run_get_output()?;
    parse_usage_output(&output)
}

/// Resize the (mounted) bcachefs filesystem on `device` to `new_size`
/// bytes; zero adapts it to the size of the device.
pub fn resize(device: &Utf8Path, new_size: u64, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_BCACHEFS, DEPS)?;
    let mut cmd = Command::new("bcachefs");
    cmd.args(["device", "resize", device.as_str()]);
    if new_size != 0 {
        cmd.arg(new_size.to_string());
    }
    cmd.extra_args(extra).run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_parse_usage_output() -> anyhow::Result<()> {
        let fixture = indoc! {"
            Filesystem: 52511175-5218-4bb6-a48e-975eadb2fa98
            Size:               1008984064
            Used:                 44040192
            Online reserved:             0
        "};
        let info = parse_usage_output(fixture)?;
        assert_eq!(info.uuid, "52511175-5218-4bb6-a48e-975eadb2fa98");
        assert_eq!(info.size, 1008984064);
        assert_eq!(info.free_space, 1008984064 - 44040192);
        Ok(())
    }

    #[test]
    fn test_parse_usage_output_garbage() {
        assert!(matches!(
            parse_usage_output("not the usage output"),
            Err(FsError::Parse(_))
        ));
    }
}

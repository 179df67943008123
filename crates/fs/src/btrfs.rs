//! The btrfs family, driven through btrfs-progs.
//!
//! Apart from mkfs, check, repair and UUID changes, btrfs tools operate on
//! a *mountpoint*; the generic layer mounts devices on demand. All
//! functions here only support single-device volumes.

use std::process::Command;
use std::sync::OnceLock;

use camino::Utf8Path;
use regex::Regex;

use blockdev_utils::{check_deps, CommandRunExt, DepsCache, ExtraArg, UtilDep};

use crate::common::{check_uuid_rfc4122, parse_u64};
use crate::family::{required_utils, FsMode, FS_MODE_COUNT};
use crate::ops::{BtrfsInfo, MkfsOptions};
use crate::FsError;

static DEPS_CACHE: DepsCache = DepsCache::new();

const DEPS_MKFSBTRFS: u32 = 1 << 0;
const DEPS_BTRFSCK: u32 = 1 << 1;
const DEPS_BTRFS: u32 = 1 << 2;
const DEPS_BTRFSTUNE: u32 = 1 << 3;

static DEPS: &[UtilDep] = &[
    UtilDep::new("mkfs.btrfs"),
    UtilDep::new("btrfsck"),
    UtilDep::new("btrfs"),
    UtilDep::new("btrfstune"),
];

static FS_MODE_UTIL: [u32; FS_MODE_COUNT] = [
    DEPS_MKFSBTRFS, // mkfs
    0,              // wipe
    DEPS_BTRFSCK,   // check
    DEPS_BTRFSCK,   // repair
    DEPS_BTRFS,     // set-label
    DEPS_BTRFS,     // query
    DEPS_BTRFS,     // resize
    DEPS_BTRFSTUNE, // set-uuid
];

pub(crate) fn is_tech_avail(modes: FsMode) -> Result<(), FsError> {
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
    check_deps(&DEPS_CACHE, DEPS_MKFSBTRFS, DEPS)?;
    Command::new("mkfs.btrfs")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// Wipe the btrfs signature from `device`.
pub fn wipe(device: &Utf8Path) -> Result<(), FsError> {
    Ok(blockdev_probe::wipe_fs(device, Some("btrfs"), false)?)
}

pub fn check(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_BTRFSCK, DEPS)?;
    Command::new("btrfsck")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn repair(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_BTRFSCK, DEPS)?;
    Command::new("btrfsck")
        .arg("--repair")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// Set the label of the btrfs filesystem mounted on `mountpoint`.
pub fn set_label(mountpoint: &Utf8Path, label: &str) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_BTRFS, DEPS)?;
    Command::new("btrfs")
        .args(["filesystem", "label", mountpoint.as_str(), label])
        .run()?;
    Ok(())
}

pub fn check_label(label: &str) -> Result<(), FsError> {
    if label.len() > 256 {
        return Err(FsError::LabelInvalid(
            "Label for btrfs filesystem must be at most 256 characters long.".to_string(),
        ));
    }
    if label.contains('\n') {
        return Err(FsError::LabelInvalid(
            "Label for btrfs filesystem cannot contain new lines.".to_string(),
        ));
    }
    Ok(())
}

/// Set the filesystem UUID; `None` generates a new random one. btrfstune
/// asks for confirmation, so it is fed an answer on stdin.
pub fn set_uuid(device: &Utf8Path, uuid: Option<&str>) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_BTRFSTUNE, DEPS)?;
    let mut cmd = Command::new("btrfstune");
    match uuid {
        None => cmd.args(["-u", device.as_str()]),
        Some(uuid) => cmd.args(["-U", uuid, device.as_str()]),
    };
    cmd.run_with_input("y\n")?;
    Ok(())
}

pub fn check_uuid(uuid: &str) -> Result<(), FsError> {
    check_uuid_rfc4122(uuid)
}

fn show_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            Label:\s+(none|'(?P<label>.+)')\s+
            uuid:\s+(?P<uuid>\S+)\s+
            Total\sdevices\s+(?P<num_devices>\d+)\s+
            FS\sbytes\sused\s+(?P<used>\S+)\s+
            devid\s+1\s+size\s+(?P<size>\S+)\s+\S+",
        )
        .unwrap()
    })
}

fn parse_show_output(output: &str, mountpoint: &Utf8Path) -> Result<BtrfsInfo, FsError> {
    let caps = show_regex().captures(output).ok_or_else(|| {
        FsError::Parse("Failed to parse btrfs file system information".to_string())
    })?;
    let num_devices: u64 = caps
        .name("num_devices")
        .and_then(|m| parse_u64(m.as_str()))
        .unwrap_or(0);
    if num_devices != 1 {
        return Err(FsError::Fail(format!(
            "Btrfs filesystem mounted on {mountpoint} spans multiple devices ({num_devices}). \
             Filesystem plugin is not suitable for multidevice Btrfs volumes, please use \
             Btrfs plugin instead."
        )));
    }
    Ok(BtrfsInfo {
        label: caps
            .name("label")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        uuid: caps
            .name("uuid")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        size: caps
            .name("size")
            .and_then(|m| parse_u64(m.as_str()))
            .unwrap_or(0),
        free_space: 0,
    })
}

/// Read information about the (single-device) btrfs filesystem mounted on
/// `mountpoint`. Free space is derived from the minimal device size
/// reported by `btrfs inspect-internal min-dev-size`.
pub fn get_info(mountpoint: &Utf8Path) -> Result<BtrfsInfo, FsError> {
    check_deps(&DEPS_CACHE, DEPS_BTRFS, DEPS)?;

    let output = Command::new("btrfs")
        .args(["filesystem", "show", "--raw", mountpoint.as_str()])
        .run_get_output()?;
    let mut info = parse_show_output(&output, mountpoint)?;

    let output = Command::new("btrfs")
        .args(["inspect-internal", "min-dev-size", mountpoint.as_str()])
        .run_get_output()?;
    // "114032640 bytes (108.75MiB)"
    let min_size = parse_u64(&output).ok_or_else(|| {
        FsError::Parse("Failed to parse btrfs filesystem min size.".to_string())
    })?;

    info.free_space = info.size.saturating_sub(min_size);
    Ok(info)
}

/// Resize the btrfs filesystem mounted on `mountpoint` to `new_size` bytes;
/// zero grows it to the maximum usable size. Multi-device volumes are
/// refused.
pub fn resize(mountpoint: &Utf8Path, new_size: u64, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_BTRFS, DEPS)?;

    // get_info returns an error for multidevice volumes, which we don't
    // want to resize blindly
    get_info(mountpoint)?;

    let size_spec = if new_size == 0 {
        "max".to_string()
    } else {
        new_size.to_string()
    };
    Command::new("btrfs")
        .args(["filesystem", "resize", &size_spec, mountpoint.as_str()])
        .extra_args(extra)
        .run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_parse_show_output() -> anyhow::Result<()> {
        let fixture = indoc! {"
            Label: 'data'  uuid: 12345678-90ab-cdef-1234-567890abcdef
            	Total devices 1 FS bytes used 147456
            	devid    1 size 1073741824 used 138412032 path /dev/vdb1

        "};
        let info = parse_show_output(fixture, Utf8Path::new("/mnt/x"))?;
        assert_eq!(info.label, "data");
        assert_eq!(info.uuid, "12345678-90ab-cdef-1234-567890abcdef");
        assert_eq!(info.size, 1073741824);
        Ok(())
    }

    #[test]
    fn test_parse_show_output_no_label() -> anyhow::Result<()> {
        let fixture = indoc! {"
            Label: none  uuid: 12345678-90ab-cdef-1234-567890abcdef
            	Total devices 1 FS bytes used 147456
            	devid    1 size 1073741824 used 138412032 path /dev/vdb1
        "};
        let info = parse_show_output(fixture, Utf8Path::new("/mnt/x"))?;
        assert_eq!(info.label, "");
        Ok(())
    }

    #[test]
    fn test_parse_show_output_multidevice() {
        let fixture = indoc! {"
            Label: none  uuid: 12345678-90ab-cdef-1234-567890abcdef
            	Total devices 2 FS bytes used 147456
            	devid    1 size 1073741824 used 138412032 path /dev/vdb1
            	devid    2 size 1073741824 used 138412032 path /dev/vdc1
        "};
        let err = parse_show_output(fixture, Utf8Path::new("/mnt/x")).unwrap_err();
        match err {
            FsError::Fail(msg) => {
                assert!(msg.contains("spans multiple devices (2)"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_check_label() {
        check_label("some label").unwrap();
        assert!(check_label("two\nlines").is_err());
        assert!(check_label(&"x".repeat(257)).is_err());
    }
}

//! The nilfs2 family, driven through nilfs-utils. There is no fsck for
//! nilfs2, and resizing requires the filesystem to be mounted.

use std::process::Command;

use camino::Utf8Path;

use blockdev_utils::{check_deps, CommandRunExt, DepsCache, ExtraArg, UtilDep};

use crate::common::{check_uuid_rfc4122, line_with_prefix, parse_u64, value_after};
use crate::family::{required_utils, FsMode, FS_MODE_COUNT};
use crate::ops::{MkfsOptions, Nilfs2Info};
use crate::FsError;

static DEPS_CACHE: DepsCache = DepsCache::new();

const DEPS_MKFSNILFS2: u32 = 1 << 0;
const DEPS_NILFSTUNE: u32 = 1 << 1;
const DEPS_NILFSRESIZE: u32 = 1 << 2;

static DEPS: &[UtilDep] = &[
    UtilDep::new("mkfs.nilfs2"),
    UtilDep::new("nilfs-tune"),
    UtilDep::new("nilfs-resize"),
];

static FS_MODE_UTIL: [u32; FS_MODE_COUNT] = [
    DEPS_MKFSNILFS2,  // mkfs
    0,                // wipe
    0,                // check
    0,                // repair
    DEPS_NILFSTUNE,   // set-label
    DEPS_NILFSTUNE,   // query
    DEPS_NILFSRESIZE, // resize
    DEPS_NILFSTUNE,   // set-uuid
];

pub(crate) fn is_tech_avail(modes: FsMode) -> Result<(), FsError> {
    if modes.contains(FsMode::CHECK) {
        return Err(FsError::TechUnavail(
            "NILFS2 doesn't support filesystem check.".to_string(),
        ));
    }
    if modes.contains(FsMode::REPAIR) {
        return Err(FsError::TechUnavail(
            "NILFS2 doesn't support filesystem repair.".to_string(),
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
    if options.dry_run {
        args.push(ExtraArg::flag("-n"));
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
    check_deps(&DEPS_CACHE, DEPS_MKFSNILFS2, DEPS)?;
    Command::new("mkfs.nilfs2")
        .arg("-q")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// Wipe the nilfs2 signature from `device`.
pub fn wipe(device: &Utf8Path) -> Result<(), FsError> {
    Ok(blockdev_probe::wipe_fs(device, Some("nilfs2"), false)?)
}

pub fn set_label(device: &Utf8Path, label: &str) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_NILFSTUNE, DEPS)?;
    Command::new("nilfs-tune")
        .args(["-L", label])
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn check_label(label: &str) -> Result<(), FsError> {
    if label.len() > 80 {
        return Err(FsError::LabelInvalid(
            "Label for nilfs2 filesystem must be at most 80 characters long.".to_string(),
        ));
    }
    Ok(())
}

/// Set the filesystem UUID; `None` generates a new random one (nilfs-tune
/// has no generator of its own).
pub fn set_uuid(device: &Utf8Path, uuid: Option<&str>) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_NILFSTUNE, DEPS)?;
    let uuid = match uuid {
        Some(uuid) => uuid.to_string(),
        None => uuid::Uuid::new_v4().hyphenated().to_string(),
    };
    Command::new("nilfs-tune")
        .args(["-U", &uuid])
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn check_uuid(uuid: &str) -> Result<(), FsError> {
    check_uuid_rfc4122(uuid)
}

fn parse_info_output(output: &str) -> Result<(u64, u64, u64), FsError> {
    let parse_fail =
        || FsError::Parse("Failed to parse NILFS2 file system information".to_string());
    // "Block size:		4096"
    let block_size = line_with_prefix(output, "Block size:")
        .and_then(|l| value_after(l, ':'))
        .and_then(parse_u64)
        .ok_or_else(parse_fail)?;
    // "Device size:	167772160"
    let size = line_with_prefix(output, "Device size")
        .and_then(|l| value_after(l, ':'))
        .and_then(parse_u64)
        .ok_or_else(parse_fail)?;
    // "Free blocks count:	389120"
    let free_blocks = line_with_prefix(output, "Free blocks count")
        .and_then(|l| value_after(l, ':'))
        .and_then(parse_u64)
        .ok_or_else(parse_fail)?;
    Ok((block_size, size, free_blocks))
}

pub fn get_info(device: &Utf8Path) -> Result<Nilfs2Info, FsError> {
    check_deps(&DEPS_CACHE, DEPS_NILFSTUNE, DEPS)?;

    let (label, uuid) = blockdev_probe::read_label_uuid(device)?;

    let output = Command::new("nilfs-tune")
        .arg("-l")
        .arg(device.as_str())
        .run_get_output()?;
    let (block_size, size, free_blocks) = parse_info_output(&output)?;

    Ok(Nilfs2Info {
        label,
        uuid,
        size,
        block_size,
        free_blocks,
    })
}

/// Resize the nilfs2 filesystem on `device` to `new_size` bytes; zero
/// adapts the filesystem to the size of the device.
///
/// Note: the filesystem must be mounted for the resize operation.
pub fn resize(device: &Utf8Path, new_size: u64) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_NILFSRESIZE, DEPS)?;
    let mut cmd = Command::new("nilfs-resize");
    cmd.args(["-y", device.as_str()]);
    if new_size != 0 {
        cmd.arg(new_size.to_string());
    }
    cmd.run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_parse_info_output() -> anyhow::Result<()> {
        let fixture = indoc! {"
            Filesystem volume name:	(none)
            Filesystem UUID:		8e5ab2b8-bb07-4e4c-a0b8-6e2a3467eb1c
            Filesystem magic number:	0x3434
            Filesystem revision #:	2.0
            Block size:		4096
            Filesystem features:	(none)
            Device size:	167772160
            Free blocks count:	389120
        "};
        let (bs, size, free) = parse_info_output(fixture)?;
        assert_eq!(bs, 4096);
        assert_eq!(size, 167772160);
        assert_eq!(free, 389120);
        Ok(())
    }

    #[test]
    fn test_parse_info_missing_line() {
        assert!(matches!(
            parse_info_output("Block size:\t4096"),
            Err(FsError::Parse(_))
        ));
    }

    #[test]
    fn test_check_label() {
        check_label(&"a".repeat(80)).unwrap();
        assert!(check_label(&"a".repeat(81)).is_err());
    }
}

//! The reiserfs family, driven through reiserfsprogs.

use std::process::Command;

use camino::Utf8Path;

use blockdev_utils::{check_deps, CommandRunExt, DepsCache, ExtraArg, UtilDep};

use crate::common::{check_uuid_rfc4122, line_with_prefix, parse_u64, value_after};
use crate::family::{required_utils, FsMode, FS_MODE_COUNT};
use crate::ops::{MkfsOptions, ReiserfsInfo};
use crate::FsError;

static DEPS_CACHE: DepsCache = DepsCache::new();

const DEPS_MKREISERFS: u32 = 1 << 0;
const DEPS_REISERFSCK: u32 = 1 << 1;
const DEPS_REISERFSTUNE: u32 = 1 << 2;
const DEPS_DEBUGREISERFS: u32 = 1 << 3;
const DEPS_RESIZEREISERFS: u32 = 1 << 4;

static DEPS: &[UtilDep] = &[
    UtilDep::new("mkreiserfs"),
    UtilDep::new("reiserfsck"),
    UtilDep::new("reiserfstune"),
    UtilDep::new("debugreiserfs"),
    UtilDep::new("resize_reiserfs"),
];

static FS_MODE_UTIL: [u32; FS_MODE_COUNT] = [
    DEPS_MKREISERFS,     // mkfs
    0,                   // wipe
    DEPS_REISERFSCK,     // check
    DEPS_REISERFSCK,     // repair
    DEPS_REISERFSTUNE,   // set-label
    DEPS_DEBUGREISERFS,  // query
    DEPS_RESIZEREISERFS, // resize
    DEPS_REISERFSTUNE,   // set-uuid
];

pub(crate) fn is_tech_avail(modes: FsMode) -> Result<(), FsError> {
    let required = required_utils(modes, &FS_MODE_UTIL);
    check_deps(&DEPS_CACHE, required, DEPS)?;
    Ok(())
}

pub(crate) fn mkfs_options(options: &MkfsOptions, extra: &[ExtraArg]) -> Vec<ExtraArg> {
    let mut args = Vec::new();
    if let Some(label) = options.label.as_deref() {
        args.push(ExtraArg::new("-l", label));
    }
    if let Some(uuid) = options.uuid.as_deref() {
        args.push(ExtraArg::new("-u", uuid));
    }
    args.extend_from_slice(extra);
    args
}

pub fn mkfs(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_MKREISERFS, DEPS)?;
    Command::new("mkreiserfs")
        .arg("-ff")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// Wipe the reiserfs signature from `device`.
pub fn wipe(device: &Utf8Path) -> Result<(), FsError> {
    blockdev_probe::wipe_fs(device, Some("reiserfs"), true)?;
    Ok(())
}

/// Check a reiserfs filesystem; returns whether it is clean. Exit code 6
/// (fixable errors left uncorrected) is reported without error.
pub fn check(device: &Utf8Path, extra: &[ExtraArg]) -> Result<bool, FsError> {
    check_deps(&DEPS_CACHE, DEPS_REISERFSCK, DEPS)?;
    let (status, stderr) = Command::new("reiserfsck")
        .args(["--check", "-y"])
        .extra_args(extra)
        .arg(device.as_str())
        .run_get_status()?;
    match status.code() {
        Some(0) => Ok(true),
        Some(6) => Ok(false),
        _ => Err(blockdev_utils::status_to_error("reiserfsck", status, &stderr).into()),
    }
}

/// Repair a reiserfs filesystem; exit code 1 means errors were corrected.
pub fn repair(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_REISERFSCK, DEPS)?;
    let (status, stderr) = Command::new("reiserfsck")
        .args(["--fix-fixable", "-y"])
        .extra_args(extra)
        .arg(device.as_str())
        .run_get_status()?;
    match status.code() {
        Some(0) | Some(1) => Ok(()),
        _ => Err(blockdev_utils::status_to_error("reiserfsck", status, &stderr).into()),
    }
}

pub fn set_label(device: &Utf8Path, label: &str) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_REISERFSTUNE, DEPS)?;
    if label.len() > 16 {
        tracing::warn!(
            "Given label is too long for ReiserFS and will be truncated. \
             Labels on ReiserFS can be at most 16 characters long"
        );
    }
    Command::new("reiserfstune")
        .args(["-l", label])
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn check_label(label: &str) -> Result<(), FsError> {
    if label.len() > 16 {
        return Err(FsError::LabelInvalid(
            "Label for ReiserFS filesystem must be at most 16 characters long.".to_string(),
        ));
    }
    Ok(())
}

/// Set the filesystem UUID; `None` generates a new random one.
pub fn set_uuid(device: &Utf8Path, uuid: Option<&str>) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_REISERFSTUNE, DEPS)?;
    Command::new("reiserfstune")
        .args(["-u", uuid.unwrap_or("random")])
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn check_uuid(uuid: &str) -> Result<(), FsError> {
    check_uuid_rfc4122(uuid)
}

fn parse_info_output(output: &str) -> Result<(u64, u64, u64), FsError> {
    let parse_fail =
        || FsError::Parse("Failed to parse ReiserFS file system information".to_string());
    // "Count of blocks on the device: 127744"
    let block_count = line_with_prefix(output, "Count of blocks on the device:")
        .and_then(|l| value_after(l, ':'))
        .and_then(parse_u64)
        .ok_or_else(parse_fail)?;
    // "Blocksize: 4096"
    let block_size = line_with_prefix(output, "Blocksize:")
        .and_then(|l| value_after(l, ':'))
        .and_then(parse_u64)
        .ok_or_else(parse_fail)?;
    // "Free blocks (count of blocks - used [journal, bitmaps, data, reserved] blocks): 119529"
    let free_blocks = line_with_prefix(output, "Free blocks")
        .and_then(|l| value_after(l, ':'))
        .and_then(parse_u64)
        .ok_or_else(parse_fail)?;
    Ok((block_count, block_size, free_blocks))
}

pub fn get_info(device: &Utf8Path) -> Result<ReiserfsInfo, FsError> {
    check_deps(&DEPS_CACHE, DEPS_DEBUGREISERFS, DEPS)?;

    let (label, uuid) = blockdev_probe::read_label_uuid(device)?;

    let output = Command::new("debugreiserfs")
        .arg(device.as_str())
        .run_get_output()?;
    let (block_count, block_size, free_blocks) = parse_info_output(&output)?;

    Ok(ReiserfsInfo {
        label,
        uuid,
        block_size,
        block_count,
        free_blocks,
    })
}

/// Resize the reiserfs filesystem on `device` to `new_size` bytes; zero
/// adapts the filesystem to the size of the device. A resize to the current
/// size is a no-op; resize_reiserfs asks for confirmation and is fed an
/// answer on stdin.
pub fn resize(device: &Utf8Path, new_size: u64) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_RESIZEREISERFS, DEPS)?;

    let info = get_info(device).map_err(|e| {
        FsError::Fail(format!(
            "Failed to get information about ReiserFS filesystem before resizing: {e}"
        ))
    })?;
    if new_size != 0 && new_size == info.block_count * info.block_size {
        tracing::info!("Device '{device}' already has requested size {new_size}, not resizing");
        return Ok(());
    }

    let mut cmd = Command::new("resize_reiserfs");
    if new_size != 0 {
        cmd.args(["-s", &new_size.to_string()]);
    }
    cmd.arg(device.as_str());
    cmd.run_with_input("y\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_parse_info_output() -> anyhow::Result<()> {
        let fixture = indoc! {"
            debugreiserfs 3.6.27

            Filesystem state: consistent

            Reiserfs super block in block 16 on 0xfd01 of format 3.6 with standard journal
            Count of blocks on the device: 127744
            Number of bitmaps: 4
            Blocksize: 4096
            Free blocks (count of blocks - used [journal, bitmaps, data, reserved] blocks): 119529
            Root block: 8211
        "};
        let (count, size, free) = parse_info_output(fixture)?;
        assert_eq!(count, 127744);
        assert_eq!(size, 4096);
        assert_eq!(free, 119529);
        Ok(())
    }

    #[test]
    fn test_parse_info_missing() {
        assert!(parse_info_output("Blocksize: 4096").is_err());
    }

    #[test]
    fn test_check_label() {
        check_label("sixteen-chars-ok").unwrap();
        assert!(check_label("seventeen-chars-x").is_err());
    }
}

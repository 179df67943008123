//! The vfat (FAT12/16/32) family, driven through dosfstools and fatresize.

use std::io::{Seek, SeekFrom};
use std::process::Command;

use camino::Utf8Path;

use blockdev_utils::{check_deps, CommandRunExt, DepsCache, ExtraArg, UtilDep};

use crate::common::parse_u64;
use crate::family::{required_utils, FsMode, FS_MODE_COUNT};
use crate::ops::{MkfsOptions, VfatInfo};
use crate::FsError;

static DEPS_CACHE: DepsCache = DepsCache::new();

const DEPS_MKFSVFAT: u32 = 1 << 0;
const DEPS_FATLABEL: u32 = 1 << 1;
const DEPS_FSCKVFAT: u32 = 1 << 2;
const DEPS_FATRESIZE: u32 = 1 << 3;

static DEPS: &[UtilDep] = &[
    UtilDep::new("mkfs.vfat"),
    UtilDep::new("fatlabel"),
    UtilDep::new("fsck.vfat"),
    UtilDep::new("fatresize"),
];

static FS_MODE_UTIL: [u32; FS_MODE_COUNT] = [
    DEPS_MKFSVFAT,  // mkfs
    0,              // wipe
    DEPS_FSCKVFAT,  // check
    DEPS_FSCKVFAT,  // repair
    DEPS_FATLABEL,  // set-label
    DEPS_FSCKVFAT,  // query
    DEPS_FATRESIZE, // resize
    0,              // set-uuid
];

pub(crate) fn is_tech_avail(modes: FsMode) -> Result<(), FsError> {
    if modes.contains(FsMode::SET_UUID) {
        return Err(FsError::TechUnavail(
            "FAT doesn't support setting UUID for an existing device.".to_string(),
        ));
    }
    let required = required_utils(modes, &FS_MODE_UTIL);
    check_deps(&DEPS_CACHE, required, DEPS)?;
    Ok(())
}

pub(crate) fn mkfs_options(options: &MkfsOptions, extra: &[ExtraArg]) -> Vec<ExtraArg> {
    let mut args = Vec::new();
    if let Some(label) = options.label.as_deref().filter(|l| !l.is_empty()) {
        args.push(ExtraArg::new("-n", label));
    }
    if let Some(uuid) = options.uuid.as_deref().filter(|u| !u.is_empty()) {
        args.push(ExtraArg::new("-i", uuid));
    }
    // no_pt maps to `-I` which mkfs always passes
    args.extend_from_slice(extra);
    args
}

pub fn mkfs(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_MKFSVFAT, DEPS)?;
    Command::new("mkfs.vfat")
        .arg("-I")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// Wipe the vfat signature (and the partition table mkfs.vfat writes) from
/// `device`.
pub fn wipe(device: &Utf8Path) -> Result<(), FsError> {
    blockdev_probe::wipe_fs(device, Some("vfat"), true)?;
    Ok(())
}

/// Check a vfat filesystem; returns whether it is clean. Exit code 1 means
/// recoverable errors were detected, which is still reported without error.
pub fn check(device: &Utf8Path, extra: &[ExtraArg]) -> Result<bool, FsError> {
    check_deps(&DEPS_CACHE, DEPS_FSCKVFAT, DEPS)?;
    let (status, stderr) = Command::new("fsck.vfat")
        .arg("-n")
        .extra_args(extra)
        .arg(device.as_str())
        .run_get_status()?;
    match status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(blockdev_utils::status_to_error("fsck.vfat", status, &stderr).into()),
    }
}

pub fn repair(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_FSCKVFAT, DEPS)?;
    Command::new("fsck.vfat")
        .arg("-a")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn set_label(device: &Utf8Path, label: &str) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_FATLABEL, DEPS)?;
    Command::new("fatlabel")
        .arg(device.as_str())
        .arg(label)
        .run()?;
    Ok(())
}

pub fn check_label(label: &str) -> Result<(), FsError> {
    if label.len() > 11 {
        return Err(FsError::LabelInvalid(
            "Label for FAT filesystem must be at most 11 characters long.".to_string(),
        ));
    }
    Ok(())
}

/// A FAT volume id: 32bit hexadecimal number.
pub fn check_uuid(uuid: &str) -> Result<(), FsError> {
    if uuid.len() != 8 || !uuid.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(FsError::UuidInvalid(
            "UUID for FAT filesystem must be an 8 character hexadecimal number.".to_string(),
        ));
    }
    Ok(())
}

/// Parse cluster statistics from `fsck.vfat -nv` output.
fn parse_info_output(output: &str, device: &Utf8Path) -> Result<(u64, u64, u64), FsError> {
    let mut cluster_size = None;
    let mut counts = None;
    for line in output.lines() {
        if cluster_size.is_none() && line.trim_end().ends_with("bytes per cluster") {
            cluster_size = parse_u64(line);
        } else if counts.is_none() && line.starts_with(device.as_str()) {
            // "/dev/sda1: 8 files, 2/127746 clusters"
            let tail = line.split_once(',').map(|(_, t)| t).unwrap_or("");
            let (used, total) = tail
                .trim()
                .split_once('/')
                .and_then(|(used, rest)| Some((parse_u64(used)?, parse_u64(rest)?)))
                .ok_or_else(|| {
                    FsError::Fail(format!("Failed to get number of FAT clusters for '{device}'"))
                })?;
            counts = Some((used, total));
        }
        if cluster_size.is_some() && counts.is_some() {
            break;
        }
    }
    match (cluster_size, counts) {
        (Some(cs), Some((used, total))) => Ok((cs, total, total - used)),
        _ => Err(FsError::Parse(format!(
            "Failed to parse FAT file system information for '{device}'"
        ))),
    }
}

pub fn get_info(device: &Utf8Path) -> Result<VfatInfo, FsError> {
    check_deps(&DEPS_CACHE, DEPS_FSCKVFAT, DEPS)?;

    let (label, uuid) = blockdev_probe::read_label_uuid(device)?;

    let output = Command::new("fsck.vfat")
        .arg("-nv")
        .arg(device.as_str())
        .run_get_output()?;
    let (cluster_size, cluster_count, free_cluster_count) = parse_info_output(&output, device)?;

    Ok(VfatInfo {
        label,
        uuid,
        cluster_size,
        cluster_count,
        free_cluster_count,
    })
}

fn device_length(device: &Utf8Path) -> Result<u64, FsError> {
    let mut file = std::fs::File::open(device.as_std_path())
        .map_err(|e| FsError::Fail(format!("Failed to open the device '{device}': {e}")))?;
    file.seek(SeekFrom::End(0))
        .map_err(|e| FsError::Fail(format!("Failed to get size of the device '{device}': {e}")))
}

/// Resize the vfat filesystem on `device` to `new_size` bytes; zero adapts
/// the filesystem to the size of the device.
pub fn resize(device: &Utf8Path, new_size: u64) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_FATRESIZE, DEPS)?;
    let size = if new_size == 0 {
        device_length(device)?
    } else {
        new_size
    };
    Command::new("fatresize")
        .args(["-s", &size.to_string()])
        .arg(device.as_str())
        .run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_parse_info_output() -> anyhow::Result<()> {
        let fixture = indoc! {"
            fsck.fat 4.2 (2021-01-31)
            Checking we can access the last sector of the filesystem
            Boot sector contents:
            Media byte 0xf8 (hard disk)
                  2048 bytes per cluster
                    16 reserved sectors
            First FAT starts at byte 8192 (sector 16)
            /dev/vdb1: 8 files, 2/127746 clusters
        "};
        let (cs, total, free) = parse_info_output(fixture, Utf8Path::new("/dev/vdb1"))?;
        assert_eq!(cs, 2048);
        assert_eq!(total, 127746);
        assert_eq!(free, 127744);
        Ok(())
    }

    #[test]
    fn test_parse_info_output_missing() {
        assert!(parse_info_output("fsck.fat 4.2", Utf8Path::new("/dev/vdb1")).is_err());
    }

    #[test]
    fn test_check_label_and_uuid() {
        check_label("BOOT").unwrap();
        assert!(check_label("far-too-long-label").is_err());
        check_uuid("DEADBEEF").unwrap();
        assert!(check_uuid("nope").is_err());
        assert!(check_uuid("0123456789abcdef").is_err());
    }

    #[test]
    fn test_mkfs_options() {
        let opts = MkfsOptions {
            label: Some("BOOT".to_string()),
            uuid: Some("deadbeef".to_string()),
            ..Default::default()
        };
        let args = mkfs_options(&opts, &[]);
        assert_eq!(
            args,
            vec![ExtraArg::new("-n", "BOOT"), ExtraArg::new("-i", "deadbeef")]
        );
    }
}

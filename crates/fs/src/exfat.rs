//! The exfat family, driven through exfatprogs.

use std::process::Command;

use camino::Utf8Path;

use blockdev_utils::{check_deps, CommandRunExt, DepsCache, ExtraArg, UtilDep};

use crate::common::parse_u64;
use crate::family::{required_utils, FsMode, FS_MODE_COUNT};
use crate::ops::{ExfatInfo, MkfsOptions};
use crate::FsError;

static DEPS_CACHE: DepsCache = DepsCache::new();

const DEPS_MKEXFAT: u32 = 1 << 0;
const DEPS_FSCKEXFAT: u32 = 1 << 1;
const DEPS_TUNEEXFAT: u32 = 1 << 2;

static DEPS: &[UtilDep] = &[
    UtilDep::new("mkfs.exfat"),
    UtilDep::new("fsck.exfat"),
    UtilDep::new("tune.exfat"),
];

static FS_MODE_UTIL: [u32; FS_MODE_COUNT] = [
    DEPS_MKEXFAT,   // mkfs
    0,              // wipe
    DEPS_FSCKEXFAT, // check
    DEPS_FSCKEXFAT, // repair
    DEPS_TUNEEXFAT, // set-label
    DEPS_TUNEEXFAT, // query
    0,              // resize
    0,              // set-uuid
];

/// Line prefixes in tune.exfat output.
const BLOCK_SIZE_PREFIX: &str = "Block sector size : ";
const SECTORS_PREFIX: &str = "Number of the sectors : ";
const CLUSTERS_PREFIX: &str = "Number of the clusters : ";

pub(crate) fn is_tech_avail(modes: FsMode) -> Result<(), FsError> {
    if modes.contains(FsMode::SET_UUID) {
        return Err(FsError::TechUnavail(
            "exFAT doesn't support setting UUID for an existing device.".to_string(),
        ));
    }
    if modes.contains(FsMode::RESIZE) {
        return Err(FsError::TechUnavail(
            "exFAT currently doesn't support resizing.".to_string(),
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
    args.extend_from_slice(extra);
    args
}

pub fn mkfs(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_MKEXFAT, DEPS)?;
    Command::new("mkfs.exfat")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// Wipe the exfat signature from `device`.
pub fn wipe(device: &Utf8Path) -> Result<(), FsError> {
    blockdev_probe::wipe_fs(device, Some("exfat"), false)?;
    Ok(())
}

/// Check an exfat filesystem; returns whether it is clean. Exit code 1
/// means recoverable errors were detected, reported without error.
pub fn check(device: &Utf8Path, extra: &[ExtraArg]) -> Result<bool, FsError> {
    check_deps(&DEPS_CACHE, DEPS_FSCKEXFAT, DEPS)?;
    let (status, stderr) = Command::new("fsck.exfat")
        .arg("-n")
        .extra_args(extra)
        .arg(device.as_str())
        .run_get_status()?;
    match status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(blockdev_utils::status_to_error("fsck.exfat", status, &stderr).into()),
    }
}

/// Repair an exfat filesystem; exit code 1 means errors were corrected.
pub fn repair(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_FSCKEXFAT, DEPS)?;
    let (status, stderr) = Command::new("fsck.exfat")
        .arg("-y")
        .extra_args(extra)
        .arg(device.as_str())
        .run_get_status()?;
    match status.code() {
        Some(0) | Some(1) => Ok(()),
        _ => Err(blockdev_utils::status_to_error("fsck.exfat", status, &stderr).into()),
    }
}

pub fn set_label(device: &Utf8Path, label: &str) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_TUNEEXFAT, DEPS)?;
    Command::new("tune.exfat")
        .args(["-L", label])
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn check_label(label: &str) -> Result<(), FsError> {
    if label.chars().count() > 11 {
        return Err(FsError::LabelInvalid(
            "Label for exFAT filesystem must be at most 11 characters long.".to_string(),
        ));
    }
    Ok(())
}

fn parse_info_output(output: &str) -> Result<(u64, u64, u64), FsError> {
    let mut sector_size = 0;
    let mut sector_count = 0;
    let mut cluster_count = 0;
    for line in output.lines() {
        if sector_size == 0 {
            if let Some(at) = line.rfind(BLOCK_SIZE_PREFIX) {
                sector_size = parse_u64(&line[at + BLOCK_SIZE_PREFIX.len()..]).unwrap_or(0);
            }
        }
        if sector_count == 0 {
            if let Some(at) = line.rfind(SECTORS_PREFIX) {
                sector_count = parse_u64(&line[at + SECTORS_PREFIX.len()..]).unwrap_or(0);
            }
        }
        if cluster_count == 0 {
            if let Some(at) = line.rfind(CLUSTERS_PREFIX) {
                cluster_count = parse_u64(&line[at + CLUSTERS_PREFIX.len()..]).unwrap_or(0);
            }
        }
        if sector_size > 0 && sector_count > 0 && cluster_count > 0 {
            break;
        }
    }
    if sector_size == 0 || sector_count == 0 || cluster_count == 0 {
        return Err(FsError::Parse("Failed to parse exFAT info.".to_string()));
    }
    Ok((sector_size, sector_count, cluster_count))
}

pub fn get_info(device: &Utf8Path) -> Result<ExfatInfo, FsError> {
    check_deps(&DEPS_CACHE, DEPS_TUNEEXFAT, DEPS)?;

    let (label, uuid) = blockdev_probe::read_label_uuid(device)?;

    let output = Command::new("tune.exfat")
        .arg("-v")
        .arg(device.as_str())
        .run_get_output()?;
    let (sector_size, sector_count, cluster_count) = parse_info_output(&output)?;

    Ok(ExfatInfo {
        label,
        uuid,
        sector_size,
        sector_count,
        cluster_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_parse_info_output() -> anyhow::Result<()> {
        let fixture = indoc! {"
            exfatprogs version : 1.2.0
            -------------- Dump Boot sector region --------------
            Volume Length(sectors) : 2097152
            Sector Size Bits : 9
            Sector per Cluster bits : 3
            -----------------------------------------------------
            Block sector size : 512
            Number of the sectors : 2097152
            Number of the clusters : 261632
        "};
        let (ss, sc, cc) = parse_info_output(fixture)?;
        assert_eq!(ss, 512);
        assert_eq!(sc, 2097152);
        assert_eq!(cc, 261632);
        Ok(())
    }

    #[test]
    fn test_parse_info_output_incomplete() {
        assert!(matches!(
            parse_info_output("Block sector size : 512"),
            Err(FsError::Parse(_))
        ));
    }

    #[test]
    fn test_check_label() {
        check_label("volume").unwrap();
        assert!(check_label("far-too-long-label").is_err());
    }
}

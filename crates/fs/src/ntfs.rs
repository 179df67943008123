//! The ntfs family, driven through ntfs-3g / ntfsprogs.

use std::process::Command;

use camino::Utf8Path;

use blockdev_utils::{check_deps, CommandRunExt, DepsCache, ExtraArg, UtilDep};

use crate::common::{line_containing, line_with_prefix, parse_u64, value_after};
use crate::family::{required_utils, FsMode, FS_MODE_COUNT};
use crate::ops::{MkfsOptions, NtfsInfo};
use crate::FsError;

static DEPS_CACHE: DepsCache = DepsCache::new();

const DEPS_MKNTFS: u32 = 1 << 0;
const DEPS_NTFSFIX: u32 = 1 << 1;
const DEPS_NTFSRESIZE: u32 = 1 << 2;
const DEPS_NTFSLABEL: u32 = 1 << 3;
const DEPS_NTFSINFO: u32 = 1 << 4;

static DEPS: &[UtilDep] = &[
    UtilDep::new("mkntfs"),
    UtilDep::new("ntfsfix"),
    UtilDep::new("ntfsresize"),
    UtilDep::new("ntfslabel"),
    UtilDep::new("ntfsinfo"),
];

static FS_MODE_UTIL: [u32; FS_MODE_COUNT] = [
    DEPS_MKNTFS,     // mkfs
    0,               // wipe
    DEPS_NTFSFIX,    // check
    DEPS_NTFSFIX,    // repair
    DEPS_NTFSLABEL,  // set-label
    DEPS_NTFSINFO,   // query
    DEPS_NTFSRESIZE, // resize
    DEPS_NTFSLABEL,  // set-uuid
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
    if options.dry_run {
        args.push(ExtraArg::flag("-n"));
    }
    args.extend_from_slice(extra);
    args
}

pub fn mkfs(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_MKNTFS, DEPS)?;
    Command::new("mkntfs")
        .args(["-f", "-F"])
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// Wipe the ntfs signature from `device`.
pub fn wipe(device: &Utf8Path) -> Result<(), FsError> {
    Ok(blockdev_probe::wipe_fs(device, Some("ntfs"), true)?)
}

/// Check an ntfs filesystem; returns whether it is clean. Exit code 1 means
/// recoverable errors were detected, which is still reported without error.
pub fn check(device: &Utf8Path, extra: &[ExtraArg]) -> Result<bool, FsError> {
    check_deps(&DEPS_CACHE, DEPS_NTFSFIX, DEPS)?;
    let (status, stderr) = Command::new("ntfsfix")
        .arg("-n")
        .extra_args(extra)
        .arg(device.as_str())
        .run_get_status()?;
    match status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(blockdev_utils::status_to_error("ntfsfix", status, &stderr).into()),
    }
}

pub fn repair(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_NTFSFIX, DEPS)?;
    Command::new("ntfsfix")
        .arg("-d")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn set_label(device: &Utf8Path, label: &str) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_NTFSLABEL, DEPS)?;
    Command::new("ntfslabel")
        .arg(device.as_str())
        .arg(label)
        .run()?;
    Ok(())
}

pub fn check_label(label: &str) -> Result<(), FsError> {
    if label.len() > 128 {
        return Err(FsError::LabelInvalid(
            "Label for NTFS filesystem must be at most 128 characters long.".to_string(),
        ));
    }
    Ok(())
}

/// Set the volume serial number. `None` generates a new one; a 16 hex digit
/// value is set as the full serial, an 8 hex digit value as the half serial.
pub fn set_uuid(device: &Utf8Path, uuid: Option<&str>) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_NTFSLABEL, DEPS)?;
    let serial_arg = match uuid {
        None => "--new-serial".to_string(),
        Some(uuid) if uuid.len() == 16 => format!("--new-serial={uuid}"),
        Some(uuid) if uuid.len() == 8 => format!("--new-half-serial={uuid}"),
        Some(_) => {
            return Err(FsError::Fail(
                "Invalid format of UUID/serial number for NTFS filesystem.".to_string(),
            ))
        }
    };
    Command::new("ntfslabel")
        .arg(device.as_str())
        .arg(serial_arg)
        .run()?;
    Ok(())
}

pub fn check_uuid(uuid: &str) -> Result<(), FsError> {
    if uuid.len() != 8 && uuid.len() != 16 {
        return Err(FsError::UuidInvalid(
            "UUID for NTFS filesystem must be either 8 or 16 characters long.".to_string(),
        ));
    }
    if !uuid.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(FsError::UuidInvalid(
            "UUID for NTFS filesystem must be a hexadecimal number.".to_string(),
        ));
    }
    Ok(())
}

fn parse_info_output(output: &str) -> Result<(u64, u64), FsError> {
    let parse_fail = || FsError::Parse("Failed to parse NTFS file system information".to_string());
    // "Cluster Size: 4096"
    let cluster_size = line_containing(output, "Cluster Size")
        .and_then(|l| value_after(l, ':'))
        .and_then(parse_u64)
        .ok_or_else(parse_fail)?;
    // "Volume Size in Clusters: 15314943"
    let clusters = line_containing(output, "Volume Size in Clusters")
        .and_then(|l| value_after(l, ':'))
        .and_then(parse_u64)
        .ok_or_else(parse_fail)?;
    // "Free Clusters: 7812655 (51,0%)"
    let free_clusters = line_containing(output, "Free Clusters")
        .and_then(|l| value_after(l, ':'))
        .and_then(parse_u64)
        .ok_or_else(parse_fail)?;
    Ok((clusters * cluster_size, free_clusters * cluster_size))
}

/// Read information about the ntfs filesystem on `device`. The device must
/// not be mounted; ntfsinfo refuses to work on mounted volumes.
pub fn get_info(device: &Utf8Path) -> Result<NtfsInfo, FsError> {
    check_deps(&DEPS_CACHE, DEPS_NTFSINFO, DEPS)?;

    if blockdev_mount::get_mountpoint(device)?.is_some() {
        return Err(FsError::NotMounted(format!(
            "Can't get NTFS file system information for '{device}': Device is mounted."
        )));
    }

    let (label, uuid) = blockdev_probe::read_label_uuid(device)?;

    let output = Command::new("ntfsinfo")
        .arg("-m")
        .arg(device.as_str())
        .run_get_output()?;
    let (size, free_space) = parse_info_output(&output)?;

    Ok(NtfsInfo {
        label,
        uuid,
        size,
        free_space,
    })
}

/// Resize the ntfs filesystem on `device` to `new_size` bytes; zero adapts
/// the filesystem to the size of the device.
pub fn resize(device: &Utf8Path, new_size: u64) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_NTFSRESIZE, DEPS)?;
    let mut cmd = Command::new("ntfsresize");
    cmd.arg("--no-progress-bar");
    if new_size != 0 {
        cmd.args(["-s", &new_size.to_string()]);
    }
    cmd.arg(device.as_str()).run()?;
    Ok(())
}

/// The smallest size the filesystem can be shrunk to, as reported by
/// `ntfsresize --info`.
pub fn get_min_size(device: &Utf8Path) -> Result<u64, FsError> {
    check_deps(&DEPS_CACHE, DEPS_NTFSRESIZE, DEPS)?;
    let output = Command::new("ntfsresize")
        .arg("--info")
        .arg(device.as_str())
        .run_get_output()?;
    parse_min_size(&output)
        .ok_or_else(|| FsError::Fail(format!("Failed to get minimum size for '{device}'")))
}

fn parse_min_size(output: &str) -> Option<u64> {
    // "You might resize at 65658880 bytes or 66 MB (freeing 1934 MB)."
    let line = line_with_prefix(output, "You might resize at")?;
    parse_u64(line.strip_prefix("You might resize at")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_parse_info_output() -> anyhow::Result<()> {
        let fixture = indoc! {"
            Volume Information
            	Name of device: /dev/vdb1
            	Device state: 11
            	Volume Name: win
            	Volume State: 1
            	Volume Flags: 0x0000
            	Cluster Size: 4096
            	Volume Size in Clusters: 15314943
            MFT Information
            	MFT Records: 64
            	Free Clusters: 7812655 (51,0%)
        "};
        let (size, free) = parse_info_output(fixture)?;
        assert_eq!(size, 15314943 * 4096);
        assert_eq!(free, 7812655 * 4096);
        Ok(())
    }

    #[test]
    fn test_parse_info_missing_line() {
        assert!(matches!(
            parse_info_output("Cluster Size: 4096"),
            Err(FsError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_min_size() {
        let fixture = indoc! {"
            ntfsresize v2022.5.17 (libntfs-3g)
            Checking filesystem consistency ...
            Space in use       : 127 MB (6,2%)
            Collecting resizing constraints ...
            You might resize at 65658880 bytes or 66 MB (freeing 1934 MB).
        "};
        assert_eq!(parse_min_size(fixture), Some(65658880));
        assert_eq!(parse_min_size("nothing here"), None);
    }

    #[test]
    fn test_check_uuid() {
        check_uuid("0123456789abcdef").unwrap();
        check_uuid("DEADBEEF").unwrap();
        assert!(check_uuid("xyz").is_err());
        assert!(check_uuid("0123456789abcde").is_err());
        assert!(check_uuid("ghghghgh").is_err());
    }
}

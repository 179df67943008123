//! The f2fs family, driven through f2fs-tools.

use std::process::Command;

use camino::Utf8Path;

use blockdev_utils::{check_deps, check_util_version, CommandRunExt, DepsCache, ExtraArg, UtilDep};

use crate::common::{line_with_prefix, parse_u64, value_after};
use crate::family::{required_utils, FsMode, FS_MODE_COUNT};
use crate::ops::{F2fsInfo, MkfsOptions};
use crate::FsError;

static DEPS_CACHE: DepsCache = DepsCache::new();
static SHRINK_DEPS_CACHE: DepsCache = DepsCache::new();

const DEPS_MKFSF2FS: u32 = 1 << 0;
const DEPS_CHECKF2FS: u32 = 1 << 1;
const DEPS_FSCKF2FS: u32 = 1 << 2;
const DEPS_DUMPF2FS: u32 = 1 << 3;
const DEPS_RESIZEF2FS: u32 = 1 << 4;

/// The `-V` option was only added in 1.11.0, so a version that cannot
/// report itself is by definition too old.
static DEPS: &[UtilDep] = &[
    UtilDep::new("mkfs.f2fs"),
    UtilDep::with_version("fsck.f2fs", "1.11.0", "-V", r"fsck.f2fs\s+([\d\.]+).+"),
    UtilDep::new("fsck.f2fs"),
    UtilDep::new("dump.f2fs"),
    UtilDep::new("resize.f2fs"),
];

const SHRINK_DEPS_RESIZEF2FS: u32 = 1 << 0;

/// Shrinking needs a newer resize.f2fs.
static SHRINK_DEPS: &[UtilDep] = &[UtilDep::with_version(
    "resize.f2fs",
    "1.12.0",
    "-V",
    r"resize.f2fs\s+([\d\.]+).+",
)];

static FS_MODE_UTIL: [u32; FS_MODE_COUNT] = [
    DEPS_MKFSF2FS,   // mkfs
    0,               // wipe
    DEPS_CHECKF2FS,  // check
    DEPS_FSCKF2FS,   // repair
    0,               // set-label
    DEPS_DUMPF2FS,   // query
    DEPS_RESIZEF2FS, // resize
    0,               // set-uuid
];

/// Check the version gate for a tool that might predate its own `-V`
/// option: an unknown version is reported as "too low", not as unknown.
fn can_check_f2fs_version(dep: &UtilDep) -> Result<(), FsError> {
    match check_util_version(dep.name, dep.version, dep.version_arg, dep.version_regex) {
        Err(blockdev_utils::DepError::UnknownVersion { util }) => Err(FsError::TechUnavail(
            format!(
                "Too low version of {util}. At least {} required.",
                dep.version.unwrap_or("unknown")
            ),
        )),
        // other errors (including a detected-but-low version) are left for
        // the regular dependency check to report
        _ => Ok(()),
    }
}

pub(crate) fn is_tech_avail(modes: FsMode) -> Result<(), FsError> {
    if modes.contains(FsMode::SET_LABEL) {
        return Err(FsError::TechUnavail(
            "F2FS doesn't support setting label for an existing device.".to_string(),
        ));
    }
    if modes.contains(FsMode::SET_UUID) {
        return Err(FsError::TechUnavail(
            "F2FS doesn't support setting UUID for an existing device.".to_string(),
        ));
    }
    if modes.contains(FsMode::CHECK) {
        can_check_f2fs_version(&DEPS[1])?;
    }
    let required = required_utils(modes, &FS_MODE_UTIL);
    check_deps(&DEPS_CACHE, required, DEPS)?;
    Ok(())
}

pub(crate) fn mkfs_options(options: &MkfsOptions, extra: &[ExtraArg]) -> Vec<ExtraArg> {
    let mut args = Vec::new();
    if let Some(label) = options.label.as_deref().filter(|l| !l.is_empty()) {
        args.push(ExtraArg::new("-l", label));
    }
    if options.no_discard {
        args.push(ExtraArg::new("-t", "nodiscard"));
    }
    if options.force {
        args.push(ExtraArg::flag("-f"));
    }
    args.extend_from_slice(extra);
    args
}

pub fn mkfs(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_MKFSF2FS, DEPS)?;
    Command::new("mkfs.f2fs")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// Wipe the f2fs signature from `device`.
pub fn wipe(device: &Utf8Path) -> Result<(), FsError> {
    Ok(blockdev_probe::wipe_fs(device, Some("f2fs"), false)?)
}

/// Check an f2fs filesystem; returns whether it is clean. Exit code 255
/// means there are errors on the filesystem, which is reported without
/// error.
pub fn check(device: &Utf8Path, extra: &[ExtraArg]) -> Result<bool, FsError> {
    is_tech_avail(FsMode::CHECK)?;
    let (status, stderr) = Command::new("fsck.f2fs")
        .arg("--dry-run")
        .extra_args(extra)
        .arg(device.as_str())
        .run_get_status()?;
    match status.code() {
        Some(0) => Ok(true),
        Some(255) => Ok(false),
        _ => Err(blockdev_utils::status_to_error("fsck.f2fs", status, &stderr).into()),
    }
}

pub fn repair(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_FSCKF2FS, DEPS)?;
    Command::new("fsck.f2fs")
        .arg("-a")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn check_label(label: &str) -> Result<(), FsError> {
    if label.len() > 512 {
        return Err(FsError::LabelInvalid(
            "Label for F2FS filesystem must be at most 512 characters long.".to_string(),
        ));
    }
    Ok(())
}

fn parse_info_output(output: &str) -> Result<(u64, u64, u64), FsError> {
    let parse_fail = || FsError::Parse("Failed to parse F2FS file system information".to_string());

    // Sector size is not printed by dump.f2fs 1.15 and newer.
    let sector_size = line_with_prefix(output, "Info: sector size")
        .and_then(|l| value_after(l, '='))
        .and_then(parse_u64)
        .unwrap_or(0);

    // "Info: total FS sectors = 3932160 (15360 MB)"
    let sector_count = line_with_prefix(output, "Info: total FS sectors")
        .and_then(|l| value_after(l, '='))
        .and_then(parse_u64)
        .ok_or_else(parse_fail)?;

    // "Info: superblock features = 0 : "
    let features_line = line_with_prefix(output, "Info: superblock features")
        .and_then(|l| value_after(l, '='))
        .ok_or_else(parse_fail)?;
    let features_hex = features_line.trim_start();
    let features = u64::from_str_radix(
        features_hex
            .split(|c: char| !c.is_ascii_hexdigit())
            .next()
            .unwrap_or(""),
        16,
    )
    .map_err(|_| parse_fail())?;

    Ok((sector_size, sector_count, features))
}

pub fn get_info(device: &Utf8Path) -> Result<F2fsInfo, FsError> {
    check_deps(&DEPS_CACHE, DEPS_DUMPF2FS, DEPS)?;

    let output = Command::new("dump.f2fs")
        .arg(device.as_str())
        .run_get_output()?;

    let (label, uuid) = blockdev_probe::read_label_uuid(device)?;
    let (sector_size, sector_count, features) = parse_info_output(&output)?;

    Ok(F2fsInfo {
        label,
        uuid,
        sector_size,
        sector_count,
        features,
    })
}

/// Resize the f2fs filesystem on `device` to `new_size` *sectors* (see
/// [`get_info`]); zero adapts the filesystem to the device. Shrinking
/// requires `safe` and resize.f2fs >= 1.12.0.
pub fn resize(
    device: &Utf8Path,
    new_size: u64,
    safe: bool,
    extra: &[ExtraArg],
) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_RESIZEF2FS, DEPS)?;

    if safe {
        can_check_f2fs_version(&SHRINK_DEPS[0])
            .and_then(|_| {
                check_deps(&SHRINK_DEPS_CACHE, SHRINK_DEPS_RESIZEF2FS, SHRINK_DEPS)
                    .map_err(FsError::from)
            })
            .map_err(|e| FsError::TechUnavail(format!("Can't perform safe resize: {e}")))?;
    }

    let info = get_info(device)?;
    if new_size != 0 && new_size < info.sector_count && !safe {
        // resize.f2fs prints an error but exits 0 in this case
        return Err(FsError::Invalid(
            "F2FS filesystem doesn't support shrinking without using the 'safe' option"
                .to_string(),
        ));
    }

    let mut cmd = Command::new("resize.f2fs");
    if safe {
        cmd.arg("-s");
    }
    if new_size != 0 {
        cmd.args(["-t", &new_size.to_string()]);
    }
    cmd.arg(device.as_str()).extra_args(extra).run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_parse_info_output() -> anyhow::Result<()> {
        let fixture = indoc! {"
            Info: Segments per section = 1
            Info: Sections per zone = 1
            Info: sector size = 512
            Info: total FS sectors = 3932160 (1920 MB)
            Info: MKFS version
              \"Linux version 5.14\"
            Info: superblock features = 0 :
            Info: superblock encrypt level = 0, salt = 00000000000000000000000000000000
        "};
        let (ss, sc, features) = parse_info_output(fixture)?;
        assert_eq!(ss, 512);
        assert_eq!(sc, 3932160);
        assert_eq!(features, 0);
        Ok(())
    }

    #[test]
    fn test_parse_info_no_sector_size() -> anyhow::Result<()> {
        // dump.f2fs 1.15 does not print the sector size line
        let fixture = indoc! {"
            Info: total FS sectors = 3932160 (1920 MB)
            Info: superblock features = 1c0 : extra_attr project_quota inode_checksum
        "};
        let (ss, sc, features) = parse_info_output(fixture)?;
        assert_eq!(ss, 0);
        assert_eq!(sc, 3932160);
        assert_eq!(features, 0x1c0);
        Ok(())
    }

    #[test]
    fn test_parse_info_missing_sectors() {
        assert!(matches!(
            parse_info_output("Info: sector size = 512"),
            Err(FsError::Parse(_))
        ));
    }

    #[test]
    fn test_mkfs_options() {
        let opts = MkfsOptions {
            label: Some("data".to_string()),
            no_discard: true,
            force: true,
            ..Default::default()
        };
        assert_eq!(
            mkfs_options(&opts, &[]),
            vec![
                ExtraArg::new("-l", "data"),
                ExtraArg::new("-t", "nodiscard"),
                ExtraArg::flag("-f"),
            ]
        );
    }
}

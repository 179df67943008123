//! The xfs family, driven through xfsprogs.

use std::process::Command;

use camino::Utf8Path;

use blockdev_utils::{check_deps, CommandRunExt, DepsCache, ExtraArg, UtilDep};

use crate::common::{check_uuid_rfc4122, parse_u64};
use crate::family::{required_utils, FsMode, FS_MODE_COUNT};
use crate::ops::{MkfsOptions, XfsInfo};
use crate::FsError;

static DEPS_CACHE: DepsCache = DepsCache::new();

const DEPS_MKFSXFS: u32 = 1 << 0;
const DEPS_XFS_DB: u32 = 1 << 1;
const DEPS_XFS_REPAIR: u32 = 1 << 2;
const DEPS_XFS_ADMIN: u32 = 1 << 3;
const DEPS_XFS_GROWFS: u32 = 1 << 4;

static DEPS: &[UtilDep] = &[
    UtilDep::new("mkfs.xfs"),
    UtilDep::new("xfs_db"),
    UtilDep::new("xfs_repair"),
    UtilDep::new("xfs_admin"),
    UtilDep::new("xfs_growfs"),
];

static FS_MODE_UTIL: [u32; FS_MODE_COUNT] = [
    DEPS_MKFSXFS,    // mkfs
    0,               // wipe
    DEPS_XFS_REPAIR, // check
    DEPS_XFS_REPAIR, // repair
    DEPS_XFS_ADMIN,  // set-label
    DEPS_XFS_DB,     // query
    DEPS_XFS_GROWFS, // resize
    DEPS_XFS_ADMIN,  // set-uuid
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
        args.push(ExtraArg::new("-m", format!("uuid={uuid}")));
    }
    if options.dry_run {
        args.push(ExtraArg::flag("-N"));
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
    check_deps(&DEPS_CACHE, DEPS_MKFSXFS, DEPS)?;
    Command::new("mkfs.xfs")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// Wipe the xfs signature from `device`.
pub fn wipe(device: &Utf8Path) -> Result<(), FsError> {
    Ok(blockdev_probe::wipe_fs(device, Some("xfs"), false)?)
}

/// Check an xfs filesystem; returns whether it is clean.
///
/// Note: if the filesystem is mounted read-write, it will always be
/// reported as not clean.
pub fn check(device: &Utf8Path, extra: &[ExtraArg]) -> Result<bool, FsError> {
    check_deps(&DEPS_CACHE, DEPS_XFS_REPAIR, DEPS)?;
    let (status, _stderr) = Command::new("xfs_repair")
        .arg("-n")
        .extra_args(extra)
        .arg(device.as_str())
        .run_get_status()?;
    // non-zero exit status -> the fs is not clean, but not an error
    Ok(status.success())
}

pub fn repair(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_XFS_REPAIR, DEPS)?;
    Command::new("xfs_repair")
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn set_label(device: &Utf8Path, label: &str) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_XFS_ADMIN, DEPS)?;
    Command::new("xfs_admin")
        .arg("-L")
        .arg(if label.is_empty() { "--" } else { label })
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn check_label(label: &str) -> Result<(), FsError> {
    if label.len() > 12 {
        return Err(FsError::LabelInvalid(
            "Label for XFS filesystem must be at most 12 characters long.".to_string(),
        ));
    }
    if label.contains(' ') {
        return Err(FsError::LabelInvalid(
            "Label for XFS filesystem cannot contain spaces.".to_string(),
        ));
    }
    Ok(())
}

/// Set the filesystem UUID; `None` generates a new one. The special values
/// `"nil"` and `"generate"` are passed through to xfs_admin.
pub fn set_uuid(device: &Utf8Path, uuid: Option<&str>) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_XFS_ADMIN, DEPS)?;
    Command::new("xfs_admin")
        .args(["-U", uuid.unwrap_or("generate")])
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn check_uuid(uuid: &str) -> Result<(), FsError> {
    check_uuid_rfc4122(uuid)
}

/// Parse the `data = bsize=... blocks=...` section of xfs_db/xfs_spaceman
/// info output.
fn parse_info_output(output: &str) -> Result<(u64, u64), FsError> {
    let parse_fail = || FsError::Parse("Failed to parse xfs file system information".to_string());
    let line = output
        .lines()
        .find(|l| l.starts_with("data"))
        .ok_or_else(parse_fail)?;
    // "data     =      bsize=4096   blocks=262400, imaxpct=25"
    let bsize_at = line.find("bsize=").ok_or_else(parse_fail)?;
    let block_size = parse_u64(&line[bsize_at + "bsize=".len()..]).ok_or_else(parse_fail)?;
    let blocks_at = line.find("blocks=").ok_or_else(parse_fail)?;
    let block_count = parse_u64(&line[blocks_at + "blocks=".len()..]).ok_or_else(parse_fail)?;
    Ok((block_size, block_count))
}

/// Read information about the xfs filesystem on `device`. A mounted
/// filesystem is queried through xfs_spaceman (xfs_db might return stale
/// information); an unmounted one through `xfs_db -r`.
pub fn get_info(device: &Utf8Path) -> Result<XfsInfo, FsError> {
    check_deps(&DEPS_CACHE, DEPS_XFS_DB, DEPS)?;

    let (label, uuid) = blockdev_probe::read_label_uuid(device)?;

    let mountpoint = blockdev_mount::get_mountpoint(device)?;
    let output = match mountpoint {
        Some(mp) => Command::new("xfs_spaceman")
            .args(["-c", "info", mp.as_str()])
            .run_get_output()?,
        None => Command::new("xfs_db")
            .args(["-r", "-c", "info", device.as_str()])
            .run_get_output()?,
    };
    let (block_size, block_count) = parse_info_output(&output)?;

    Ok(XfsInfo {
        label,
        uuid,
        block_size,
        block_count,
    })
}

/// Grow the xfs filesystem mounted on `mountpoint` to `new_size` *blocks*
/// (see [`get_info`]); zero adapts it to the underlying device.
pub fn resize(mountpoint: &Utf8Path, new_size: u64, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_XFS_GROWFS, DEPS)?;
    let mut cmd = Command::new("xfs_growfs");
    if new_size != 0 {
        // xfs_growfs doesn't understand bytes, just a number of blocks
        cmd.args(["-D", &new_size.to_string()]);
    }
    cmd.arg(mountpoint.as_str()).extra_args(extra).run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_parse_info_output() -> anyhow::Result<()> {
        let fixture = indoc! {"
            meta-data=/dev/vdb1              isize=512    agcount=4, agsize=65600 blks
                     =                       sectsz=512   attr=2, projid32bit=1
                     =                       crc=1        finobt=1, sparse=1, rmapbt=0
            data     =                       bsize=4096   blocks=262400, imaxpct=25
                     =                       sunit=0      swidth=0 blks
            naming   =version 2              bsize=4096   ascii-ci=0, ftype=1
        "};
        let (bsize, blocks) = parse_info_output(fixture)?;
        assert_eq!(bsize, 4096);
        assert_eq!(blocks, 262400);
        Ok(())
    }

    #[test]
    fn test_parse_info_output_missing_data_section() {
        assert!(matches!(
            parse_info_output("meta-data=/dev/vdb1 isize=512"),
            Err(FsError::Parse(_))
        ));
    }

    #[test]
    fn test_check_label() {
        check_label("xfslabel").unwrap();
        assert!(check_label("with space").is_err());
        assert!(check_label("far-too-long-label").is_err());
    }

    #[test]
    fn test_mkfs_options() {
        let opts = MkfsOptions {
            label: Some("L".to_string()),
            uuid: Some("12345678-1234-1234-1234-123456789abc".to_string()),
            no_discard: true,
            force: true,
            ..Default::default()
        };
        let args = mkfs_options(&opts, &[]);
        assert_eq!(
            args,
            vec![
                ExtraArg::new("-L", "L"),
                ExtraArg::new("-m", "uuid=12345678-1234-1234-1234-123456789abc"),
                ExtraArg::flag("-K"),
                ExtraArg::flag("-f"),
            ]
        );
    }
}

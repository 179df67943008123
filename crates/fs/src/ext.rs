//! The ext2/ext3/ext4 family, driven through e2fsprogs.

use std::io::{Read, Seek, SeekFrom};
use std::process::Command;
use std::sync::OnceLock;

use camino::Utf8Path;
use regex::Regex;

use blockdev_utils::{
    check_deps, prog_reporting_initialized, status_to_error, CommandRunExt, DepsCache, ExtraArg,
    UtilDep,
};

use crate::common::{check_uuid_rfc4122, line_with_prefix, parse_u64, value_after};
use crate::family::{required_utils, FsMode, FS_MODE_COUNT};
use crate::ops::{ExtInfo, MkfsOptions};
use crate::FsError;

static DEPS_CACHE: DepsCache = DepsCache::new();

const DEPS_MKE2FS: u32 = 1 << 0;
const DEPS_E2FSCK: u32 = 1 << 1;
const DEPS_TUNE2FS: u32 = 1 << 2;
const DEPS_RESIZE2FS: u32 = 1 << 3;

static DEPS: &[UtilDep] = &[
    UtilDep::new("mke2fs"),
    UtilDep::new("e2fsck"),
    UtilDep::new("tune2fs"),
    UtilDep::new("resize2fs"),
];

static FS_MODE_UTIL: [u32; FS_MODE_COUNT] = [
    DEPS_MKE2FS,    // mkfs
    0,              // wipe
    DEPS_E2FSCK,    // check
    DEPS_E2FSCK,    // repair
    DEPS_TUNE2FS,   // set-label
    0,              // query
    DEPS_RESIZE2FS, // resize
    DEPS_TUNE2FS,   // set-uuid
];

/// ext superblock constants (all offsets relative to the superblock, which
/// itself sits 1024 bytes into the device).
const SB_OFFSET: u64 = 1024;
const SB_SIZE: usize = 1024;
const SB_MAGIC: u16 = 0xEF53;
const SB_OFF_BLOCKS_COUNT_LO: usize = 0x4;
const SB_OFF_FREE_BLOCKS_LO: usize = 0xC;
const SB_OFF_LOG_BLOCK_SIZE: usize = 0x18;
const SB_OFF_MAGIC: usize = 0x38;
const SB_OFF_STATE: usize = 0x3A;
const SB_OFF_FEATURE_INCOMPAT: usize = 0x60;
const SB_OFF_UUID: usize = 0x68;
const SB_OFF_VOLUME_NAME: usize = 0x78;
const SB_OFF_BLOCKS_COUNT_HI: usize = 0x150;
const SB_OFF_FREE_BLOCKS_HI: usize = 0x158;

const EXT2_VALID_FS: u16 = 0x1;
const EXT2_ERROR_FS: u16 = 0x2;
/// INCOMPAT_64BIT: block counts use the high 32 bits too.
const INCOMPAT_64BIT: u32 = 0x80;

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
    if options.dry_run {
        args.push(ExtraArg::flag("-n"));
    }
    if options.no_discard {
        args.push(ExtraArg::new("-E", "nodiscard"));
    }
    if options.force {
        args.push(ExtraArg::flag("-F"));
    }
    args.extend_from_slice(extra);
    args
}

fn ext_mkfs(device: &Utf8Path, extra: &[ExtraArg], ext_version: &str) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_MKE2FS, DEPS)?;
    Command::new("mke2fs")
        .args(["-t", ext_version])
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// Create a new ext2 filesystem on `device`.
pub fn mkfs_ext2(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    ext_mkfs(device, extra, "ext2")
}

/// Create a new ext3 filesystem on `device`.
pub fn mkfs_ext3(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    ext_mkfs(device, extra, "ext3")
}

/// Create a new ext4 filesystem on `device`.
pub fn mkfs_ext4(device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), FsError> {
    ext_mkfs(device, extra, "ext4")
}

/// Wipe an ext2 signature from `device`.
pub fn wipe_ext2(device: &Utf8Path) -> Result<(), FsError> {
    Ok(blockdev_probe::wipe_fs(device, Some("ext2"), true)?)
}

/// Wipe an ext3 signature from `device`.
pub fn wipe_ext3(device: &Utf8Path) -> Result<(), FsError> {
    Ok(blockdev_probe::wipe_fs(device, Some("ext3"), true)?)
}

/// Wipe an ext4 signature from `device`.
pub fn wipe_ext4(device: &Utf8Path) -> Result<(), FsError> {
    Ok(blockdev_probe::wipe_fs(device, Some("ext4"), true)?)
}

fn compute_percents(pass_cur: u8, pass_total: u8, val_cur: u64, val_total: u64) -> u8 {
    if val_total == 0 || pass_total == 0 {
        return 0;
    }
    let perc = (val_cur * 100 / val_total) as u32;
    let one_pass = 100 / pass_total as u32;
    (((pass_cur.saturating_sub(1)) as u32 * one_pass) + perc / pass_total as u32) as u8
}

/// Parse one line of `e2fsck -C 1` output into a completion percentage.
/// e2fsck has five passes; this cannot be read from the output in advance.
fn extract_e2fsck_progress(line: &str) -> Option<u8> {
    static PROGRESS_RE: OnceLock<Regex> = OnceLock::new();
    let re = PROGRESS_RE
        .get_or_init(|| Regex::new(r"^([0-9]+) ([0-9]+) ([0-9]+) (/.*)").unwrap());
    let caps = re.captures(line)?;
    let pass: u8 = caps[1].parse().ok()?;
    let cur: u64 = caps[2].parse().ok()?;
    let total: u64 = caps[3].parse().ok()?;
    Some(compute_percents(pass, 5, cur, total))
}

fn run_e2fsck(device: &Utf8Path, mode_arg: &str) -> Result<std::process::ExitStatus, FsError> {
    check_deps(&DEPS_CACHE, DEPS_E2FSCK, DEPS)?;
    let (status, _stderr) = if prog_reporting_initialized() {
        Command::new("e2fsck")
            .args(["-f", mode_arg, "-C", "1"])
            .arg(device.as_str())
            .run_with_progress(&mut extract_e2fsck_progress)?
    } else {
        Command::new("e2fsck")
            .args(["-f", mode_arg])
            .arg(device.as_str())
            .run_get_status()?
    };
    Ok(status)
}

/// Check an ext filesystem; returns whether it is clean. Exit code 4 ("file
/// system errors left uncorrected") reports the filesystem as not clean
/// without raising an error; any other non-zero exit code is an error.
pub fn check(device: &Utf8Path, _extra: &[ExtraArg]) -> Result<bool, FsError> {
    let status = run_e2fsck(device, "-n")?;
    match status.code() {
        Some(0) => Ok(true),
        Some(4) => Ok(false),
        Some(code) => Err(FsError::Fail(format!(
            "e2fsck on '{device}' failed (exit status {code})"
        ))),
        None => Err(FsError::Fail(format!(
            "e2fsck on '{device}' was killed by a signal"
        ))),
    }
}

/// Repair an ext filesystem. With `unsafe_ops` e2fsck answers yes to all
/// questions (`-y`), otherwise only safe fixes are applied (`-p`).
pub fn repair(device: &Utf8Path, unsafe_ops: bool, _extra: &[ExtraArg]) -> Result<(), FsError> {
    let status = run_e2fsck(device, if unsafe_ops { "-y" } else { "-p" })?;
    match status.code() {
        Some(0) | Some(1) => Ok(()),
        Some(2) => {
            tracing::warn!(
                "File system errors on {device} were successfully corrected, \
                 but system reboot is advised."
            );
            Ok(())
        }
        Some(_) => Err(status_to_error("e2fsck", status, "").into()),
        None => Err(FsError::Fail(format!(
            "e2fsck on '{device}' was killed by a signal"
        ))),
    }
}

pub fn set_label(device: &Utf8Path, label: &str) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_TUNE2FS, DEPS)?;
    Command::new("tune2fs")
        .args(["-L", label])
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn check_label(label: &str) -> Result<(), FsError> {
    if label.len() > 16 {
        return Err(FsError::LabelInvalid(
            "Label for ext filesystem must be at most 16 characters long.".to_string(),
        ));
    }
    Ok(())
}

/// Set the filesystem UUID; `None` generates a new random one.
pub fn set_uuid(device: &Utf8Path, uuid: Option<&str>) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_TUNE2FS, DEPS)?;
    Command::new("tune2fs")
        .args(["-U", uuid.unwrap_or("random")])
        .arg(device.as_str())
        .run()?;
    Ok(())
}

pub fn check_uuid(uuid: &str) -> Result<(), FsError> {
    check_uuid_rfc4122(uuid)
}

fn decode_fs_state(state: u16) -> String {
    format!(
        "{}{}",
        if state & EXT2_VALID_FS != 0 {
            "clean"
        } else {
            "not clean"
        },
        if state & EXT2_ERROR_FS != 0 {
            " with errors"
        } else {
            ""
        }
    )
}

fn read_u16(sb: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([sb[off], sb[off + 1]])
}

fn read_u32(sb: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([sb[off], sb[off + 1], sb[off + 2], sb[off + 3]])
}

fn parse_superblock(sb: &[u8]) -> Result<ExtInfo, FsError> {
    if sb.len() < SB_SIZE || read_u16(sb, SB_OFF_MAGIC) != SB_MAGIC {
        return Err(FsError::Fail("Failed to open ext4 file system".to_string()));
    }

    let label_raw = &sb[SB_OFF_VOLUME_NAME..SB_OFF_VOLUME_NAME + 16];
    let label_len = label_raw.iter().position(|&b| b == 0).unwrap_or(16);
    let label = String::from_utf8_lossy(&label_raw[..label_len]).into_owned();

    let mut uuid_bytes = [0u8; 16];
    uuid_bytes.copy_from_slice(&sb[SB_OFF_UUID..SB_OFF_UUID + 16]);
    let uuid = uuid::Uuid::from_bytes(uuid_bytes);
    let uuid = if uuid.is_nil() {
        String::new()
    } else {
        uuid.hyphenated().to_string()
    };

    let incompat = read_u32(sb, SB_OFF_FEATURE_INCOMPAT);
    let mut block_count = read_u32(sb, SB_OFF_BLOCKS_COUNT_LO) as u64;
    let mut free_blocks = read_u32(sb, SB_OFF_FREE_BLOCKS_LO) as u64;
    if incompat & INCOMPAT_64BIT != 0 {
        block_count |= (read_u32(sb, SB_OFF_BLOCKS_COUNT_HI) as u64) << 32;
        free_blocks |= (read_u32(sb, SB_OFF_FREE_BLOCKS_HI) as u64) << 32;
    }

    Ok(ExtInfo {
        label,
        uuid,
        state: decode_fs_state(read_u16(sb, SB_OFF_STATE)),
        block_size: 1024u64 << read_u32(sb, SB_OFF_LOG_BLOCK_SIZE),
        block_count,
        free_blocks,
    })
}

/// Read information about the ext filesystem on `device` directly from its
/// superblock; no external tool is involved.
pub fn get_info(device: &Utf8Path) -> Result<ExtInfo, FsError> {
    let mut file = std::fs::File::open(device.as_std_path())
        .map_err(|e| FsError::Fail(format!("Failed to open the device '{device}': {e}")))?;
    file.seek(SeekFrom::Start(SB_OFFSET))
        .map_err(|e| FsError::Fail(format!("Failed to read the superblock of '{device}': {e}")))?;
    let mut sb = vec![0u8; SB_SIZE];
    file.read_exact(&mut sb)
        .map_err(|e| FsError::Fail(format!("Failed to read the superblock of '{device}': {e}")))?;
    parse_superblock(&sb)
}

/// Resize the ext filesystem on `device` to `new_size` bytes; zero adapts
/// the filesystem to the size of the device.
pub fn resize(device: &Utf8Path, new_size: u64, extra: &[ExtraArg]) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_RESIZE2FS, DEPS)?;
    let mut cmd = Command::new("resize2fs");
    cmd.arg(device.as_str());
    if new_size != 0 {
        // resize2fs doesn't understand bytes, just 512B sectors
        cmd.arg(format!("{}s", new_size / 512));
    }
    cmd.extra_args(extra).run()?;
    Ok(())
}

/// The smallest size the filesystem can be shrunk to, as estimated by
/// `resize2fs -P`.
pub fn get_min_size(device: &Utf8Path) -> Result<u64, FsError> {
    check_deps(&DEPS_CACHE, DEPS_RESIZE2FS, DEPS)?;
    let info = get_info(device)?;
    let output = Command::new("resize2fs")
        .arg("-P")
        .arg(device.as_str())
        .run_get_output()?;
    parse_min_size(&output, &info)
        .ok_or_else(|| FsError::Fail(format!("Failed to get minimum size for '{device}'")))
}

fn parse_min_size(output: &str, info: &ExtInfo) -> Option<u64> {
    let line = line_with_prefix(output, "Estimated minimum size")?;
    let blocks = parse_u64(value_after(line, ':')?)?;
    Some(blocks * info.block_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_superblock() -> Vec<u8> {
        let mut sb = vec![0u8; SB_SIZE];
        sb[SB_OFF_MAGIC..SB_OFF_MAGIC + 2].copy_from_slice(&SB_MAGIC.to_le_bytes());
        sb[SB_OFF_BLOCKS_COUNT_LO..SB_OFF_BLOCKS_COUNT_LO + 4]
            .copy_from_slice(&262144u32.to_le_bytes());
        sb[SB_OFF_FREE_BLOCKS_LO..SB_OFF_FREE_BLOCKS_LO + 4]
            .copy_from_slice(&230000u32.to_le_bytes());
        // log_block_size 2 -> 4096 bytes
        sb[SB_OFF_LOG_BLOCK_SIZE..SB_OFF_LOG_BLOCK_SIZE + 4].copy_from_slice(&2u32.to_le_bytes());
        sb[SB_OFF_STATE..SB_OFF_STATE + 2].copy_from_slice(&EXT2_VALID_FS.to_le_bytes());
        sb[SB_OFF_UUID..SB_OFF_UUID + 16].copy_from_slice(
            uuid::Uuid::parse_str("12345678-1234-1234-1234-123456789abc")
                .unwrap()
                .as_bytes(),
        );
        sb[SB_OFF_VOLUME_NAME..SB_OFF_VOLUME_NAME + 5].copy_from_slice(b"mydat");
        sb
    }

    #[test]
    fn test_parse_superblock() -> anyhow::Result<()> {
        let info = parse_superblock(&sample_superblock())?;
        assert_eq!(info.label, "mydat");
        assert_eq!(info.uuid, "12345678-1234-1234-1234-123456789abc");
        assert_eq!(info.state, "clean");
        assert_eq!(info.block_size, 4096);
        assert_eq!(info.block_count, 262144);
        assert_eq!(info.free_blocks, 230000);
        Ok(())
    }

    #[test]
    fn test_parse_superblock_64bit_counts() -> anyhow::Result<()> {
        let mut sb = sample_superblock();
        sb[SB_OFF_FEATURE_INCOMPAT..SB_OFF_FEATURE_INCOMPAT + 4]
            .copy_from_slice(&INCOMPAT_64BIT.to_le_bytes());
        sb[SB_OFF_BLOCKS_COUNT_HI..SB_OFF_BLOCKS_COUNT_HI + 4]
            .copy_from_slice(&1u32.to_le_bytes());
        let info = parse_superblock(&sb)?;
        assert_eq!(info.block_count, (1u64 << 32) | 262144);
        Ok(())
    }

    #[test]
    fn test_parse_superblock_bad_magic() {
        let sb = vec![0u8; SB_SIZE];
        assert!(parse_superblock(&sb).is_err());
    }

    #[test]
    fn test_decode_fs_state() {
        assert_eq!(decode_fs_state(EXT2_VALID_FS), "clean");
        assert_eq!(decode_fs_state(0), "not clean");
        assert_eq!(
            decode_fs_state(EXT2_VALID_FS | EXT2_ERROR_FS),
            "clean with errors"
        );
        assert_eq!(decode_fs_state(EXT2_ERROR_FS), "not clean with errors");
    }

    #[test]
    fn test_extract_e2fsck_progress() {
        // pass 1 halfway: (0 * 20) + (50 / 5) = 10
        assert_eq!(extract_e2fsck_progress("1 50 100 /dev/sda1"), Some(10));
        // pass 5 complete: (4 * 20) + (100 / 5) = 100
        assert_eq!(extract_e2fsck_progress("5 100 100 /dev/sda1"), Some(100));
        assert_eq!(extract_e2fsck_progress("Pass 1: Checking inodes"), None);
    }

    #[test]
    fn test_mkfs_options() {
        let opts = MkfsOptions {
            label: Some("root".to_string()),
            uuid: Some("12345678-1234-1234-1234-123456789abc".to_string()),
            dry_run: true,
            no_discard: true,
            force: true,
            no_pt: false,
        };
        let args = mkfs_options(&opts, &[ExtraArg::new("-b", "4096")]);
        similar_asserts::assert_eq!(
            args,
            vec![
                ExtraArg::new("-L", "root"),
                ExtraArg::new("-U", "12345678-1234-1234-1234-123456789abc"),
                ExtraArg::flag("-n"),
                ExtraArg::new("-E", "nodiscard"),
                ExtraArg::flag("-F"),
                ExtraArg::new("-b", "4096"),
            ]
        );
    }

    #[test]
    fn test_mkfs_options_empty_strings_skipped() {
        let opts = MkfsOptions {
            label: Some(String::new()),
            uuid: Some(String::new()),
            ..Default::default()
        };
        assert!(mkfs_options(&opts, &[]).is_empty());
    }

    #[test]
    fn test_parse_min_size() {
        let info = ExtInfo {
            block_size: 4096,
            ..Default::default()
        };
        let output = "resize2fs 1.46.5 (30-Dec-2021)\nEstimated minimum size of the filesystem: 17012\n";
        assert_eq!(parse_min_size(output, &info), Some(17012 * 4096));
        assert_eq!(parse_min_size("no such line", &info), None);
    }

    #[test]
    fn test_check_label() {
        check_label("a-reasonable-lbl").unwrap();
        assert!(matches!(
            check_label("a-label-that-is-way-too-long"),
            Err(FsError::LabelInvalid(_))
        ));
    }
}

//! The udf family, driven through udftools.
//!
//! UDF labels are special: the filesystem carries both a Logical Volume
//! Identifier (up to 126 8-bit or 63 16-bit characters) and a Volume
//! Identifier (up to 30 8-bit or 15 16-bit characters); setting a label
//! sets the former and a truncated form of it as the latter.

use std::collections::HashMap;
use std::process::Command;

use camino::Utf8Path;

use blockdev_utils::{check_deps, CommandRunExt, DepsCache, ExtraArg, UtilDep};

use crate::common::parse_u64;
use crate::family::{required_utils, FsMode, FS_MODE_COUNT};
use crate::freeze::logical_block_size;
use crate::ops::{MkfsOptions, UdfInfo};
use crate::FsError;

static DEPS_CACHE: DepsCache = DepsCache::new();

const DEPS_MKUDFFS: u32 = 1 << 0;
const DEPS_UDFLABEL: u32 = 1 << 1;
const DEPS_UDFINFO: u32 = 1 << 2;

static DEPS: &[UtilDep] = &[
    UtilDep::new("mkudffs"),
    UtilDep::new("udflabel"),
    UtilDep::new("udfinfo"),
];

static FS_MODE_UTIL: [u32; FS_MODE_COUNT] = [
    DEPS_MKUDFFS,  // mkfs
    0,             // wipe
    0,             // check
    0,             // repair
    DEPS_UDFLABEL, // set-label
    DEPS_UDFINFO,  // query
    0,             // resize
    DEPS_UDFLABEL, // set-uuid
];

pub(crate) fn is_tech_avail(modes: FsMode) -> Result<(), FsError> {
    if modes.intersects(FsMode::CHECK | FsMode::REPAIR) {
        return Err(FsError::TechUnavail(
            "UDF doesn't support checking and repairing.".to_string(),
        ));
    }
    if modes.contains(FsMode::RESIZE) {
        return Err(FsError::TechUnavail(
            "UDF currently doesn't support resizing.".to_string(),
        ));
    }
    let required = required_utils(modes, &FS_MODE_UTIL);
    check_deps(&DEPS_CACHE, required, DEPS)?;
    Ok(())
}

/// Derive a valid Volume Identifier from `label`: at most 30 characters, or
/// 15 when any character above U+00FF appears among them.
fn get_vid(label: &str) -> String {
    let chars: Vec<char> = label.chars().collect();
    if chars.len() <= 15 {
        return label.to_string();
    }
    for (pos, c) in chars.iter().enumerate() {
        if (*c as u32) > 0xFF {
            if pos < 15 {
                // vid can have at most 15 characters above U+FF
                return chars[..15].iter().collect();
            } else if pos < 30 {
                // cut before the "problematic" character
                return chars[..pos].iter().collect();
            }
        }
    }
    chars[..chars.len().min(30)].iter().collect()
}

pub(crate) fn mkfs_options(options: &MkfsOptions, extra: &[ExtraArg]) -> Vec<ExtraArg> {
    let mut args = Vec::new();
    if let Some(label) = options.label.as_deref().filter(|l| !l.is_empty()) {
        args.push(ExtraArg::new("--lvid", label));
        args.push(ExtraArg::new("--vid", get_vid(label)));
    }
    if let Some(uuid) = options.uuid.as_deref().filter(|u| !u.is_empty()) {
        args.push(ExtraArg::new("-u", uuid));
    }
    args.extend_from_slice(extra);
    args
}

/// Create a new UDF filesystem on `device`. `media_type` defaults to "hd",
/// `revision` to "0x201" and `block_size` to the device's logical block
/// size.
pub fn mkfs(
    device: &Utf8Path,
    media_type: Option<&str>,
    revision: Option<&str>,
    block_size: u64,
    extra: &[ExtraArg],
) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_MKUDFFS, DEPS)?;

    let block_size = if block_size != 0 {
        block_size
    } else {
        logical_block_size(device)?
    };

    Command::new("mkudffs")
        .arg("--utf8")
        .arg(format!("--blocksize={block_size}"))
        .arg(format!("--media-type={}", media_type.unwrap_or("hd")))
        .arg(format!("--udfrev={}", revision.unwrap_or("0x201")))
        .extra_args(extra)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// Wipe the udf signature (and the partition table mkudffs writes) from
/// `device`.
pub fn wipe(device: &Utf8Path) -> Result<(), FsError> {
    Ok(blockdev_probe::wipe_fs(device, Some("udf"), true)?)
}

/// Set the label: both the Logical Volume Identifier and a Volume
/// Identifier truncated per the UDF length limits.
pub fn set_label(device: &Utf8Path, label: &str) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_UDFLABEL, DEPS)?;
    check_label(label)?;
    Command::new("udflabel")
        .arg("--utf8")
        .arg(format!("--lvid={label}"))
        .arg(format!("--vid={}", get_vid(label)))
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// Check the Logical Volume Identifier limits: 126 characters for pure
/// 8-bit labels, 63 when any character above U+00FF appears.
pub fn check_label(label: &str) -> Result<(), FsError> {
    let len = label.chars().count();
    if label.is_ascii() {
        if len > 126 {
            return Err(FsError::LabelInvalid(
                "Label for UDF filesystem can be at most 126 characters long.".to_string(),
            ));
        }
        return Ok(());
    }

    if len <= 63 {
        // up to 63 characters is always valid
        return Ok(());
    }
    if len > 126 {
        return Err(FsError::LabelInvalid(
            "Label for UDF filesystem can be at most 126 characters long.".to_string(),
        ));
    }
    if label.chars().any(|c| (c as u32) > 0xFF) {
        return Err(FsError::LabelInvalid(
            "Label for UDF filesystem containing unicode characters above U+FF can \
             be at most 63 characters long."
                .to_string(),
        ));
    }
    Ok(())
}

/// Set the UUID (volume set identifier prefix); `None` generates a random
/// one.
pub fn set_uuid(device: &Utf8Path, uuid: Option<&str>) -> Result<(), FsError> {
    check_deps(&DEPS_CACHE, DEPS_UDFLABEL, DEPS)?;
    let uuid_arg = match uuid {
        Some(uuid) => format!("--uuid={uuid}"),
        None => "--uuid=random".to_string(),
    };
    Command::new("udflabel")
        .arg(uuid_arg)
        .arg(device.as_str())
        .run()?;
    Ok(())
}

/// A UDF UUID: 16 lowercase hexadecimal digits.
pub fn check_uuid(uuid: &str) -> Result<(), FsError> {
    if uuid.len() != 16 {
        return Err(FsError::UuidInvalid(
            "UUID for UDF filesystem must be 16 characters long.".to_string(),
        ));
    }
    if !uuid
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err(FsError::UuidInvalid(
            "UUID for UDF filesystem must be a lowercase hexadecimal number.".to_string(),
        ));
    }
    Ok(())
}

/// Parse the `key=value` output of `udfinfo --utf8`, skipping the
/// positional `start=...` block ranges.
fn parse_udf_vars(output: &str) -> HashMap<&str, &str> {
    let mut table = HashMap::new();
    for line in output.lines() {
        if line.starts_with("start=") {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            table.insert(key, value);
        }
    }
    table
}

pub fn get_info(device: &Utf8Path) -> Result<UdfInfo, FsError> {
    check_deps(&DEPS_CACHE, DEPS_UDFINFO, DEPS)?;

    let output = Command::new("udfinfo")
        .arg("--utf8")
        .arg(device.as_str())
        .run_get_output()?;
    let table = parse_udf_vars(&output);
    if table.is_empty() {
        return Err(FsError::Parse(
            "Failed to parse UDF file system information".to_string(),
        ));
    }

    let (label, uuid) = blockdev_probe::read_label_uuid(device)?;

    Ok(UdfInfo {
        label,
        uuid,
        revision: table.get("udfrev").unwrap_or(&"").to_string(),
        lvid: table.get("lvid").unwrap_or(&"").to_string(),
        vid: table.get("vid").unwrap_or(&"").to_string(),
        block_size: table.get("blocksize").and_then(|v| parse_u64(v)).unwrap_or(0),
        block_count: table.get("blocks").and_then(|v| parse_u64(v)).unwrap_or(0),
        free_blocks: table
            .get("freeblocks")
            .and_then(|v| parse_u64(v))
            .unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_get_vid() {
        assert_eq!(get_vid("short"), "short");
        let long = "a".repeat(40);
        assert_eq!(get_vid(&long), "a".repeat(30));
        // unicode above U+FF early: cut at 15
        let label = format!("\u{1234}{}", "a".repeat(40));
        assert_eq!(get_vid(&label).chars().count(), 15);
        // unicode above U+FF between 15 and 30: cut before it
        let label = format!("{}\u{1234}{}", "a".repeat(20), "b".repeat(20));
        assert_eq!(get_vid(&label), "a".repeat(20));
    }

    #[test]
    fn test_check_label() {
        check_label("simple").unwrap();
        check_label(&"a".repeat(126)).unwrap();
        assert!(check_label(&"a".repeat(127)).is_err());
        // 63 wide characters are fine, 64 are not
        check_label(&"\u{1234}".repeat(63)).unwrap();
        assert!(check_label(&"\u{1234}".repeat(64)).is_err());
        // >63 8-bit-only non-ASCII characters are fine
        check_label(&"\u{e9}".repeat(100)).unwrap();
    }

    #[test]
    fn test_check_uuid() {
        check_uuid("0123456789abcdef").unwrap();
        assert!(check_uuid("0123456789ABCDEF").is_err());
        assert!(check_uuid("0123").is_err());
    }

    #[test]
    fn test_parse_udf_vars() {
        let fixture = indoc! {"
            filename=/dev/vdb1
            label=LinuxUDF
            uuid=5c6fda2b00000000
            lvid=LinuxUDF
            vid=LinuxUDF
            udfrev=2.01
            blocksize=512
            blocks=2097152
            usedblocks=1120
            freeblocks=2095973
            behindblocks=0
            numfiles=0
            numdirs=1
            start=0 blocks=16 type=RESERVED
        "};
        let table = parse_udf_vars(fixture);
        assert_eq!(table.get("lvid"), Some(&"LinuxUDF"));
        assert_eq!(table.get("udfrev"), Some(&"2.01"));
        assert_eq!(table.get("blocksize"), Some(&"512"));
        assert_eq!(table.get("freeblocks"), Some(&"2095973"));
        assert!(!table.contains_key("start"));
    }

    #[test]
    fn test_mkfs_options() {
        let opts = MkfsOptions {
            label: Some("My Volume Label That Is Long".to_string()),
            uuid: Some("0123456789abcdef".to_string()),
            ..Default::default()
        };
        let args = mkfs_options(&opts, &[]);
        assert_eq!(args[0], ExtraArg::new("--lvid", "My Volume Label That Is Long"));
        assert_eq!(args[1].opt, "--vid");
        assert_eq!(args[1].val.chars().count(), 28);
        assert_eq!(args[2], ExtraArg::new("-u", "0123456789abcdef"));
    }
}

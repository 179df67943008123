//! Generic filesystem operations, dispatched to the family specialists.
//!
//! Callers may pass the filesystem type explicitly or let it be detected by
//! probing the device. Operations that a family can only perform on a
//! mounted filesystem (xfs, btrfs, nilfs2 and bcachefs resize; btrfs label
//! and info) transparently mount the device on a temporary directory and
//! unmount it again, leaving the device in its previous mount state.

use camino::{Utf8Path, Utf8PathBuf};

use blockdev_mount::TempMount;
use blockdev_utils::{check_util_version, ExtraArg};

use crate::family::{FsFamily, FsMode, MkfsFlags, ResizeFlags};
use crate::ops::{FsInfo, MkfsOptions};
use crate::{bcachefs, btrfs, exfat, ext, f2fs, freeze as freeze_impl, nilfs, ntfs, reiserfs, udf,
            vfat, xfs, FsError};

/// The filesystems supported by this library. Whether they are supported by
/// the running system as well is answered by the `can_*` functions.
pub fn supported_filesystems() -> Vec<&'static str> {
    FsFamily::ALL.iter().map(|f| f.as_str()).collect()
}

/// Whether the given technology-mode combination is supported and all its
/// runtime dependencies are available.
pub fn is_tech_avail(fstype: FsFamily, modes: FsMode) -> Result<(), FsError> {
    match fstype {
        FsFamily::Ext2 | FsFamily::Ext3 | FsFamily::Ext4 => ext::is_tech_avail(modes),
        FsFamily::Xfs => xfs::is_tech_avail(modes),
        FsFamily::Vfat => vfat::is_tech_avail(modes),
        FsFamily::Ntfs => ntfs::is_tech_avail(modes),
        FsFamily::F2fs => f2fs::is_tech_avail(modes),
        FsFamily::Nilfs2 => nilfs::is_tech_avail(modes),
        FsFamily::Exfat => exfat::is_tech_avail(modes),
        FsFamily::Btrfs => btrfs::is_tech_avail(modes),
        FsFamily::Udf => udf::is_tech_avail(modes),
        FsFamily::Reiserfs => reiserfs::is_tech_avail(modes),
        FsFamily::Bcachefs => bcachefs::is_tech_avail(modes),
    }
}

/// Get the type of the filesystem on `device`, or `None` when the device
/// carries no recognizable filesystem signature.
pub fn get_fstype(device: &Utf8Path) -> Result<Option<String>, FsError> {
    Ok(blockdev_probe::get_fstype(device)?)
}

fn detect_family(device: &Utf8Path, fstype: Option<FsFamily>) -> Result<FsFamily, FsError> {
    if let Some(fstype) = fstype {
        return Ok(fstype);
    }
    match blockdev_probe::get_fstype(device) {
        Ok(Some(detected)) => detected.parse(),
        Ok(None) => Err(FsError::NoFilesystem(format!(
            "No filesystem detected on the device '{device}'"
        ))),
        Err(e) => Err(FsError::from(e)),
    }
}

/// Wipe the first (or all) signature(s) from `device`; see
/// [`blockdev_probe::wipe`].
pub fn wipe(device: &Utf8Path, all: bool, force: bool) -> Result<(), FsError> {
    Ok(blockdev_probe::wipe(device, all, force)?)
}

/// Remove all signatures from `device`; an already clean device is fine.
pub fn clean(device: &Utf8Path, force: bool) -> Result<(), FsError> {
    Ok(blockdev_probe::clean(device, force)?)
}

/// Mount `device` for an operation that needs it mounted. Returns the
/// mountpoint and, when the mount is ours, the guard to unmount it with.
fn fs_mount(
    device: &Utf8Path,
    fstype: FsFamily,
    read_only: bool,
) -> Result<(Utf8PathBuf, Option<TempMount>), FsError> {
    match blockdev_mount::get_mountpoint(device) {
        Ok(Some(mountpoint)) => Ok((mountpoint, None)),
        Ok(None) => {
            let mount = TempMount::new(device, fstype.as_str(), read_only)?;
            Ok((mount.mountpoint().to_owned(), Some(mount)))
        }
        Err(e) => Err(FsError::Fail(format!(
            "Error when trying to get mountpoint for '{device}': {e}"
        ))),
    }
}

/// Run `op` against a mountpoint of `device`, mounting it on demand. When
/// the mount was ours it is released afterwards; an unmount failure after a
/// successful operation surfaces as `UnmountFail`, after a failed operation
/// the operation's error wins.
fn with_mounted<T>(
    device: &Utf8Path,
    fstype: FsFamily,
    read_only: bool,
    op_desc: &str,
    op: impl FnOnce(&Utf8Path) -> Result<T, FsError>,
) -> Result<T, FsError> {
    let (mountpoint, our_mount) = fs_mount(device, fstype, read_only)?;
    let result = op(&mountpoint);
    let Some(our_mount) = our_mount else {
        return result;
    };
    match our_mount.unmount() {
        Ok(()) => result,
        Err(unmount_error) => match result {
            Ok(_) => Err(FsError::UnmountFail(format!(
                "Failed to unmount '{device}' after {op_desc}: {unmount_error}"
            ))),
            // the operation's own error is the important one
            Err(e) => Err(e),
        },
    }
}

fn xfs_resize_device(device: &Utf8Path, new_size: u64) -> Result<(), FsError> {
    let info = xfs::get_info(device)?;
    let blocks = if new_size == 0 {
        0
    } else {
        new_size.div_ceil(info.block_size.max(1))
    };
    with_mounted(device, FsFamily::Xfs, false, "resizing it", |mp| {
        xfs::resize(mp, blocks, &[])
    })
}

fn f2fs_resize_device(device: &Utf8Path, new_size: u64) -> Result<(), FsError> {
    let info = f2fs::get_info(device)?;
    // dump.f2fs 1.15 stopped printing the sector size; it is 512 there
    let sector_size = if info.sector_size == 0 {
        512
    } else {
        info.sector_size
    };
    let sectors = new_size.div_ceil(sector_size);
    let safe = sectors != 0 && sectors < info.sector_count;
    f2fs::resize(device, sectors, safe, &[])
}

fn btrfs_get_info_mounted(device: &Utf8Path) -> Result<crate::ops::BtrfsInfo, FsError> {
    with_mounted(device, FsFamily::Btrfs, true, "getting info", |mp| {
        btrfs::get_info(mp)
    })
}

fn bcachefs_get_info_mounted(device: &Utf8Path) -> Result<crate::ops::BcachefsInfo, FsError> {
    with_mounted(device, FsFamily::Bcachefs, true, "getting info", |mp| {
        bcachefs::get_info(mp)
    })
}

/// Create a filesystem of the given type on `device`, translating the
/// common `options` into the family's mkfs arguments. Extra arguments are
/// appended verbatim after the translated ones; it is the caller's
/// responsibility that they do not conflict.
pub fn mkfs(
    device: &Utf8Path,
    fstype: FsFamily,
    options: &MkfsOptions,
    extra: &[ExtraArg],
) -> Result<(), FsError> {
    match fstype {
        FsFamily::Ext2 => ext::mkfs_ext2(device, &ext::mkfs_options(options, extra)),
        FsFamily::Ext3 => ext::mkfs_ext3(device, &ext::mkfs_options(options, extra)),
        FsFamily::Ext4 => ext::mkfs_ext4(device, &ext::mkfs_options(options, extra)),
        FsFamily::Xfs => xfs::mkfs(device, &xfs::mkfs_options(options, extra)),
        FsFamily::Vfat => vfat::mkfs(device, &vfat::mkfs_options(options, extra)),
        FsFamily::Ntfs => ntfs::mkfs(device, &ntfs::mkfs_options(options, extra)),
        FsFamily::F2fs => f2fs::mkfs(device, &f2fs::mkfs_options(options, extra)),
        FsFamily::Nilfs2 => nilfs::mkfs(device, &nilfs::mkfs_options(options, extra)),
        FsFamily::Exfat => exfat::mkfs(device, &exfat::mkfs_options(options, extra)),
        FsFamily::Btrfs => btrfs::mkfs(device, &btrfs::mkfs_options(options, extra)),
        FsFamily::Udf => udf::mkfs(device, None, None, 0, &udf::mkfs_options(options, extra)),
        FsFamily::Reiserfs => reiserfs::mkfs(device, &reiserfs::mkfs_options(options, extra)),
        FsFamily::Bcachefs => bcachefs::mkfs(device, &bcachefs::mkfs_options(options, extra)),
    }
}

/// Resize the filesystem on `device` to `new_size` bytes (zero adapts it to
/// the size of the device). Families that can only resize mounted (xfs,
/// btrfs, nilfs2, bcachefs) are mounted on demand.
pub fn resize(device: &Utf8Path, new_size: u64, fstype: Option<FsFamily>) -> Result<(), FsError> {
    let family = detect_family(device, fstype)?;
    match family {
        FsFamily::Ext2 | FsFamily::Ext3 | FsFamily::Ext4 => ext::resize(device, new_size, &[]),
        FsFamily::Xfs => xfs_resize_device(device, new_size),
        FsFamily::Vfat => vfat::resize(device, new_size),
        FsFamily::Ntfs => ntfs::resize(device, new_size),
        FsFamily::F2fs => f2fs_resize_device(device, new_size),
        FsFamily::Nilfs2 => {
            with_mounted(device, family, false, "resizing it", |_mp| {
                nilfs::resize(device, new_size)
            })
        }
        FsFamily::Btrfs => with_mounted(device, family, false, "resizing it", |mp| {
            btrfs::resize(mp, new_size, &[])
        }),
        FsFamily::Bcachefs => with_mounted(device, family, false, "resizing it", |_mp| {
            bcachefs::resize(device, new_size, &[])
        }),
        FsFamily::Reiserfs => reiserfs::resize(device, new_size),
        FsFamily::Exfat | FsFamily::Udf => Err(FsError::NotSupported(format!(
            "Resizing filesystem '{family}' is not supported."
        ))),
    }
}

/// Check the filesystem on `device`; returns whether it is clean.
pub fn check(device: &Utf8Path, fstype: Option<FsFamily>) -> Result<bool, FsError> {
    let family = detect_family(device, fstype)?;
    match family {
        FsFamily::Ext2 | FsFamily::Ext3 | FsFamily::Ext4 => ext::check(device, &[]),
        FsFamily::Xfs => xfs::check(device, &[]),
        FsFamily::Vfat => vfat::check(device, &[]),
        FsFamily::Ntfs => ntfs::check(device, &[]),
        FsFamily::F2fs => f2fs::check(device, &[]),
        FsFamily::Exfat => exfat::check(device, &[]),
        FsFamily::Btrfs => btrfs::check(device, &[]).map(|()| true),
        FsFamily::Reiserfs => reiserfs::check(device, &[]),
        FsFamily::Bcachefs => bcachefs::check(device, &[]),
        FsFamily::Nilfs2 | FsFamily::Udf => Err(FsError::NotSupported(format!(
            "Checking filesystem '{family}' is not supported."
        ))),
    }
}

/// Repair the filesystem on `device`.
pub fn repair(device: &Utf8Path, fstype: Option<FsFamily>) -> Result<(), FsError> {
    let family = detect_family(device, fstype)?;
    match family {
        FsFamily::Ext2 | FsFamily::Ext3 | FsFamily::Ext4 => ext::repair(device, true, &[]),
        FsFamily::Xfs => xfs::repair(device, &[]),
        FsFamily::Vfat => vfat::repair(device, &[]),
        FsFamily::Ntfs => ntfs::repair(device, &[]),
        FsFamily::F2fs => f2fs::repair(device, &[]),
        FsFamily::Exfat => exfat::repair(device, &[]),
        FsFamily::Btrfs => btrfs::repair(device, &[]),
        FsFamily::Reiserfs => reiserfs::repair(device, &[]),
        FsFamily::Bcachefs => bcachefs::repair(device, &[]),
        FsFamily::Nilfs2 | FsFamily::Udf => Err(FsError::NotSupported(format!(
            "Repairing filesystem '{family}' is not supported."
        ))),
    }
}

/// Set the label of the filesystem on `device`.
pub fn set_label(device: &Utf8Path, label: &str, fstype: Option<FsFamily>) -> Result<(), FsError> {
    let family = detect_family(device, fstype)?;
    match family {
        FsFamily::Ext2 | FsFamily::Ext3 | FsFamily::Ext4 => ext::set_label(device, label),
        FsFamily::Xfs => xfs::set_label(device, label),
        FsFamily::Vfat => vfat::set_label(device, label),
        FsFamily::Ntfs => ntfs::set_label(device, label),
        FsFamily::Nilfs2 => nilfs::set_label(device, label),
        FsFamily::Exfat => exfat::set_label(device, label),
        FsFamily::Btrfs => with_mounted(device, family, false, "setting label", |mp| {
            btrfs::set_label(mp, label)
        }),
        FsFamily::Udf => udf::set_label(device, label),
        FsFamily::Reiserfs => reiserfs::set_label(device, label),
        FsFamily::Bcachefs => bcachefs::set_label(device, label),
        FsFamily::F2fs => Err(FsError::NotSupported(format!(
            "Setting the label of filesystem '{family}' is not supported."
        ))),
    }
}

/// Validate `label` against the family's label rules.
pub fn check_label(fstype: FsFamily, label: &str) -> Result<(), FsError> {
    match fstype {
        FsFamily::Ext2 | FsFamily::Ext3 | FsFamily::Ext4 => ext::check_label(label),
        FsFamily::Xfs => xfs::check_label(label),
        FsFamily::Vfat => vfat::check_label(label),
        FsFamily::Ntfs => ntfs::check_label(label),
        FsFamily::F2fs => f2fs::check_label(label),
        FsFamily::Nilfs2 => nilfs::check_label(label),
        FsFamily::Exfat => exfat::check_label(label),
        FsFamily::Btrfs => btrfs::check_label(label),
        FsFamily::Udf => udf::check_label(label),
        FsFamily::Reiserfs => reiserfs::check_label(label),
        FsFamily::Bcachefs => bcachefs::check_label(label),
    }
}

/// Set the UUID of the filesystem on `device`; `None` generates a new one
/// where the family's tool supports that.
pub fn set_uuid(
    device: &Utf8Path,
    uuid: Option<&str>,
    fstype: Option<FsFamily>,
) -> Result<(), FsError> {
    let family = detect_family(device, fstype)?;
    match family {
        FsFamily::Ext2 | FsFamily::Ext3 | FsFamily::Ext4 => ext::set_uuid(device, uuid),
        FsFamily::Xfs => xfs::set_uuid(device, uuid),
        FsFamily::Ntfs => ntfs::set_uuid(device, uuid),
        FsFamily::Nilfs2 => nilfs::set_uuid(device, uuid),
        FsFamily::Btrfs => btrfs::set_uuid(device, uuid),
        FsFamily::Udf => udf::set_uuid(device, uuid),
        FsFamily::Reiserfs => reiserfs::set_uuid(device, uuid),
        FsFamily::Vfat | FsFamily::F2fs | FsFamily::Exfat | FsFamily::Bcachefs => {
            Err(FsError::NotSupported(format!(
                "Setting UUID of filesystem '{family}' is not supported."
            )))
        }
    }
}

/// Validate `uuid` against the family's UUID rules.
pub fn check_uuid(fstype: FsFamily, uuid: &str) -> Result<(), FsError> {
    match fstype {
        FsFamily::Ext2 | FsFamily::Ext3 | FsFamily::Ext4 => ext::check_uuid(uuid),
        FsFamily::Xfs => xfs::check_uuid(uuid),
        FsFamily::Vfat => vfat::check_uuid(uuid),
        FsFamily::Ntfs => ntfs::check_uuid(uuid),
        FsFamily::Nilfs2 => nilfs::check_uuid(uuid),
        FsFamily::Btrfs => btrfs::check_uuid(uuid),
        FsFamily::Udf => udf::check_uuid(uuid),
        FsFamily::Reiserfs => reiserfs::check_uuid(uuid),
        FsFamily::Bcachefs => bcachefs::check_uuid(uuid),
        FsFamily::F2fs | FsFamily::Exfat => Err(FsError::NotSupported(format!(
            "Checking UUID format for filesystem '{fstype}' is not supported."
        ))),
    }
}

/// Get information about the filesystem on `device`.
pub fn get_info(device: &Utf8Path, fstype: Option<FsFamily>) -> Result<FsInfo, FsError> {
    let family = detect_family(device, fstype)?;
    match family {
        FsFamily::Ext2 | FsFamily::Ext3 | FsFamily::Ext4 => {
            ext::get_info(device).map(FsInfo::Ext)
        }
        FsFamily::Xfs => xfs::get_info(device).map(FsInfo::Xfs),
        FsFamily::Vfat => vfat::get_info(device).map(FsInfo::Vfat),
        FsFamily::Ntfs => ntfs::get_info(device).map(FsInfo::Ntfs),
        FsFamily::F2fs => f2fs::get_info(device).map(FsInfo::F2fs),
        FsFamily::Nilfs2 => nilfs::get_info(device).map(FsInfo::Nilfs2),
        FsFamily::Exfat => exfat::get_info(device).map(FsInfo::Exfat),
        FsFamily::Btrfs => btrfs_get_info_mounted(device).map(FsInfo::Btrfs),
        FsFamily::Udf => udf::get_info(device).map(FsInfo::Udf),
        FsFamily::Reiserfs => reiserfs::get_info(device).map(FsInfo::Reiserfs),
        FsFamily::Bcachefs => bcachefs_get_info_mounted(device).map(FsInfo::Bcachefs),
    }
}

/// Get the size of the filesystem on `device` in bytes.
pub fn get_size(device: &Utf8Path, fstype: Option<FsFamily>) -> Result<u64, FsError> {
    Ok(get_info(device, fstype)?.size())
}

/// Get the free space of the filesystem on `device` in bytes. Some
/// families cannot report free space reliably; see [`can_get_free_space`].
pub fn get_free_space(device: &Utf8Path, fstype: Option<FsFamily>) -> Result<u64, FsError> {
    let family = detect_family(device, fstype)?;
    match family {
        FsFamily::Ext2 | FsFamily::Ext3 | FsFamily::Ext4 => {
            let info = ext::get_info(device)?;
            Ok(info.block_size * info.free_blocks)
        }
        FsFamily::Vfat => {
            let info = vfat::get_info(device)?;
            Ok(info.cluster_size * info.free_cluster_count)
        }
        FsFamily::Ntfs => Ok(ntfs::get_info(device)?.free_space),
        FsFamily::Nilfs2 => {
            let info = nilfs::get_info(device)?;
            Ok(info.block_size * info.free_blocks)
        }
        FsFamily::Btrfs => Ok(btrfs_get_info_mounted(device)?.free_space),
        FsFamily::Reiserfs => {
            let info = reiserfs::get_info(device)?;
            Ok(info.block_size * info.free_blocks)
        }
        FsFamily::Bcachefs => Ok(bcachefs_get_info_mounted(device)?.free_space),
        FsFamily::Xfs | FsFamily::F2fs | FsFamily::Exfat | FsFamily::Udf => {
            Err(FsError::NotSupported(format!(
                "Getting free space on filesystem '{family}' is not supported."
            )))
        }
    }
}

/// Get the minimum size the filesystem on `device` could be shrunk to.
pub fn get_min_size(device: &Utf8Path, fstype: Option<FsFamily>) -> Result<u64, FsError> {
    let family = detect_family(device, fstype)?;
    match family {
        FsFamily::Ext2 | FsFamily::Ext3 | FsFamily::Ext4 => ext::get_min_size(device),
        FsFamily::Ntfs => ntfs::get_min_size(device),
        _ => Err(FsError::NotSupported(format!(
            "Getting minimum size of filesystem '{family}' is not supported."
        ))),
    }
}

/// Result of a `can_*` query: whether the operation is ready to be used and
/// which utility is missing when it is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsCapability {
    pub available: bool,
    pub required_utility: Option<String>,
}

enum FsOp {
    Mkfs,
    Resize,
    Repair,
    Check,
    Label,
    Uuid,
    GetSize,
    GetFreeSpace,
    GetInfo,
    GetMinSize,
}

fn query_fs_operation(fstype: FsFamily, op: FsOp) -> Result<FsCapability, FsError> {
    let tools = fstype.tools();
    let (op_name, util) = match op {
        FsOp::Mkfs => ("Creating", tools.mkfs_util),
        FsOp::Resize => ("Resizing", tools.resize_util),
        FsOp::Repair => ("Repairing", tools.repair_util),
        FsOp::Check => ("Checking", tools.check_util),
        FsOp::Label => ("Setting the label of", tools.label_util),
        FsOp::Uuid => ("Setting UUID of", tools.uuid_util),
        FsOp::GetSize => ("Getting size of", tools.info_util),
        FsOp::GetFreeSpace => ("Getting free space on", tools.info_util),
        FsOp::GetInfo => ("Getting filesystem info of", tools.info_util),
        FsOp::GetMinSize => ("Getting minimum size of", tools.minsize_util),
    };

    let Some(util) = util else {
        return Err(FsError::NotSupported(format!(
            "{op_name} filesystem '{fstype}' is not supported."
        )));
    };
    if util.is_empty() {
        // supported without any utility
        return Ok(FsCapability {
            available: true,
            required_utility: None,
        });
    }
    match check_util_version(util, None, None, None) {
        Ok(()) => Ok(FsCapability {
            available: true,
            required_utility: None,
        }),
        Err(_) => Ok(FsCapability {
            available: false,
            required_utility: Some(util.to_string()),
        }),
    }
}

/// Whether a filesystem of the given type can be created; also reports the
/// mkfs options the family supports.
pub fn can_mkfs(fstype: FsFamily) -> Result<(FsCapability, MkfsFlags), FsError> {
    let cap = query_fs_operation(fstype, FsOp::Mkfs)?;
    Ok((cap, fstype.features().mkfs))
}

/// Whether the filesystem can be resized; also reports the supported
/// resize modes.
pub fn can_resize(fstype: FsFamily) -> Result<(FsCapability, ResizeFlags), FsError> {
    let cap = query_fs_operation(fstype, FsOp::Resize)?;
    Ok((cap, fstype.features().resize))
}

pub fn can_check(fstype: FsFamily) -> Result<FsCapability, FsError> {
    query_fs_operation(fstype, FsOp::Check)
}

pub fn can_repair(fstype: FsFamily) -> Result<FsCapability, FsError> {
    query_fs_operation(fstype, FsOp::Repair)
}

pub fn can_set_label(fstype: FsFamily) -> Result<FsCapability, FsError> {
    query_fs_operation(fstype, FsOp::Label)
}

pub fn can_set_uuid(fstype: FsFamily) -> Result<FsCapability, FsError> {
    query_fs_operation(fstype, FsOp::Uuid)
}

pub fn can_get_size(fstype: FsFamily) -> Result<FsCapability, FsError> {
    query_fs_operation(fstype, FsOp::GetSize)
}

/// Whether free space can be queried for the given filesystem. Some
/// filesystems cannot tell us free space even when their tools are present.
pub fn can_get_free_space(fstype: FsFamily) -> Result<FsCapability, FsError> {
    match fstype {
        FsFamily::Xfs | FsFamily::F2fs | FsFamily::Exfat | FsFamily::Udf => {
            Err(FsError::NotSupported(format!(
                "Getting free space on filesystem '{fstype}' is not supported."
            )))
        }
        _ => query_fs_operation(fstype, FsOp::GetFreeSpace),
    }
}

pub fn can_get_info(fstype: FsFamily) -> Result<FsCapability, FsError> {
    query_fs_operation(fstype, FsOp::GetInfo)
}

pub fn can_get_min_size(fstype: FsFamily) -> Result<FsCapability, FsError> {
    query_fs_operation(fstype, FsOp::GetMinSize)
}

/// Freeze the filesystem mounted on `mountpoint`; writes are blocked until
/// it is thawed again.
pub fn freeze(mountpoint: &Utf8Path) -> Result<(), FsError> {
    fs_freeze(mountpoint, true)
}

/// Un-freeze the filesystem mounted on `mountpoint`.
pub fn unfreeze(mountpoint: &Utf8Path) -> Result<(), FsError> {
    fs_freeze(mountpoint, false)
}

fn fs_freeze(mountpoint: &Utf8Path, freeze: bool) -> Result<(), FsError> {
    match blockdev_mount::is_mountpoint(mountpoint) {
        Ok(true) => {}
        Ok(false) => {
            return Err(FsError::NotMounted(format!(
                "'{mountpoint}' doesn't appear to be a mountpoint."
            )))
        }
        Err(e) => {
            return Err(FsError::Fail(format!(
                "Failed to check mountpoint '{mountpoint}': {e}"
            )))
        }
    }
    freeze_impl::freeze_ioctl(mountpoint, freeze)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_filesystems() {
        let supported = supported_filesystems();
        assert_eq!(supported.len(), 13);
        assert!(supported.contains(&"ext4"));
        assert!(supported.contains(&"bcachefs"));
    }

    #[test]
    fn test_can_get_free_space_refusals() {
        // tools cannot report free space reliably for these, even when
        // installed
        for fs in [FsFamily::Xfs, FsFamily::F2fs, FsFamily::Exfat, FsFamily::Udf] {
            assert!(matches!(
                can_get_free_space(fs),
                Err(FsError::NotSupported(_))
            ));
        }
    }

    #[test]
    fn test_can_queries_unsupported_ops() {
        assert!(matches!(can_check(FsFamily::Udf), Err(FsError::NotSupported(_))));
        assert!(matches!(can_repair(FsFamily::Nilfs2), Err(FsError::NotSupported(_))));
        assert!(matches!(can_resize(FsFamily::Exfat), Err(FsError::NotSupported(_))));
        assert!(matches!(
            can_get_min_size(FsFamily::Btrfs),
            Err(FsError::NotSupported(_))
        ));
        assert!(matches!(can_set_uuid(FsFamily::Vfat), Err(FsError::NotSupported(_))));
    }

    #[test]
    fn test_can_get_size_ext_needs_no_tool() -> anyhow::Result<()> {
        // ext info is read straight from the superblock
        let cap = can_get_size(FsFamily::Ext4)?;
        assert!(cap.available);
        assert_eq!(cap.required_utility, None);
        Ok(())
    }

    #[test]
    fn test_check_label_dispatch() {
        check_label(FsFamily::Ext4, "ok").unwrap();
        assert!(check_label(FsFamily::Xfs, "has space").is_err());
        assert!(check_label(FsFamily::Reiserfs, &"x".repeat(17)).is_err());
        // bcachefs applies no extra restrictions
        check_label(FsFamily::Bcachefs, &"x".repeat(300)).unwrap();
    }

    #[test]
    fn test_check_uuid_dispatch() {
        check_uuid(FsFamily::Ext4, "12345678-1234-1234-1234-123456789abc").unwrap();
        check_uuid(FsFamily::Ntfs, "DEADBEEF").unwrap();
        check_uuid(FsFamily::Udf, "0123456789abcdef").unwrap();
        assert!(check_uuid(FsFamily::Udf, "0123456789ABCDEF").is_err());
        assert!(matches!(
            check_uuid(FsFamily::F2fs, "whatever"),
            Err(FsError::NotSupported(_))
        ));
    }

    #[test]
    fn test_freeze_requires_mountpoint() {
        let err = freeze(Utf8Path::new("/definitely/not/mounted")).unwrap_err();
        assert!(matches!(err, FsError::NotMounted(_)));
    }
}

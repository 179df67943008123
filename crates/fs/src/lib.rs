//! Filesystem lifecycle management.
//!
//! A uniform, typed API over the filesystem family tools: create, check,
//! repair, label, UUID, resize, query and wipe, with per-family specialists
//! encoding each family's command lines, output parsing and exit-code
//! policies. Operations that need the device mounted (xfs or btrfs resize
//! for example) mount it on demand on a temporary directory.

mod error;
pub use error::FsError;
mod family;
pub use family::{
    ConfigureFlags, FeatureFlags, FsFamily, FsFeatures, FsMode, FsckFlags, MkfsFlags, ResizeFlags,
};
mod ops;
pub use ops::*;
mod common;
mod freeze;
pub mod generic;

pub mod bcachefs;
pub mod btrfs;
pub mod exfat;
pub mod ext;
pub mod f2fs;
pub mod nilfs;
pub mod ntfs;
pub mod reiserfs;
pub mod udf;
pub mod vfat;
pub mod xfs;

pub use generic::{
    can_check, can_get_free_space, can_get_info, can_get_min_size, can_get_size, can_mkfs,
    can_repair, can_resize, can_set_label, can_set_uuid, check, check_label, check_uuid, clean,
    freeze, get_free_space, get_fstype, get_info, get_min_size, get_size, is_tech_avail, mkfs,
    repair, resize, set_label, set_uuid, supported_filesystems, unfreeze, wipe, FsCapability,
};

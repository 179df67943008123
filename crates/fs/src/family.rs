use std::fmt;
use std::str::FromStr;

use crate::FsError;

bitflags::bitflags! {
    /// Supported resize directions, split by mount state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResizeFlags: u32 {
        const OFFLINE_GROW = 1 << 1;
        const OFFLINE_SHRINK = 1 << 2;
        const ONLINE_GROW = 1 << 3;
        const ONLINE_SHRINK = 1 << 4;
    }

    /// Options supported by the family's mkfs tool.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MkfsFlags: u32 {
        const LABEL = 1 << 0;
        const UUID = 1 << 1;
        const DRY_RUN = 1 << 2;
        const NODISCARD = 1 << 3;
        const FORCE = 1 << 4;
        const NOPT = 1 << 5;
    }

    /// Consistency check/repair support.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FsckFlags: u32 {
        const CHECK = 1 << 0;
        const REPAIR = 1 << 1;
    }

    /// Post-creation configuration support.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConfigureFlags: u32 {
        const SET_LABEL = 1 << 0;
        const SET_UUID = 1 << 1;
    }

    /// Miscellaneous filesystem features.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureFlags: u32 {
        /// Filesystem records file ownership.
        const OWNERS = 1 << 0;
        /// mkfs writes a partition table to the device.
        const PARTITION_TABLE = 1 << 1;
    }

    /// Modes of operation. The bit positions index the per-family
    /// mode-to-utility tables.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FsMode: u32 {
        const MKFS = 1 << 0;
        const WIPE = 1 << 1;
        const CHECK = 1 << 2;
        const REPAIR = 1 << 3;
        const SET_LABEL = 1 << 4;
        const QUERY = 1 << 5;
        const RESIZE = 1 << 6;
        const SET_UUID = 1 << 7;
    }
}

/// Number of [`FsMode`] bits; the length of mode-to-utility tables.
pub(crate) const FS_MODE_COUNT: usize = 8;

/// Accumulate the utility bitmask required for `modes` from a per-family
/// mode table.
pub(crate) fn required_utils(modes: FsMode, table: &[u32; FS_MODE_COUNT]) -> u32 {
    let mut required = 0;
    for (i, mask) in table.iter().enumerate() {
        if modes.bits() & (1 << i) != 0 {
            required |= mask;
        }
    }
    required
}

/// Static capabilities of one filesystem family.
#[derive(Debug, Clone, Copy)]
pub struct FsFeatures {
    pub resize: ResizeFlags,
    pub mkfs: MkfsFlags,
    pub fsck: FsckFlags,
    pub configure: ConfigureFlags,
    pub features: FeatureFlags,
    /// MBR partition id commonly used for this filesystem.
    pub partition_id: &'static str,
    /// GPT partition type UUID commonly used for this filesystem.
    pub partition_type: &'static str,
}

/// Required utility per operation; `Some("")` means supported without any
/// tool, `None` means the operation is not supported for this family.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FsToolInfo {
    pub mkfs_util: Option<&'static str>,
    pub check_util: Option<&'static str>,
    pub repair_util: Option<&'static str>,
    pub resize_util: Option<&'static str>,
    pub minsize_util: Option<&'static str>,
    pub label_util: Option<&'static str>,
    pub info_util: Option<&'static str>,
    pub uuid_util: Option<&'static str>,
}

/// The filesystem families the library knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsFamily {
    Ext2,
    Ext3,
    Ext4,
    Xfs,
    Vfat,
    Ntfs,
    F2fs,
    Nilfs2,
    Exfat,
    Btrfs,
    Udf,
    Reiserfs,
    Bcachefs,
}

const LINUX_ID: &str = "0x83";
const LINUX_TYPE: &str = "0fc63daf-8483-4772-8e79-3d69d8477de4";
const WIN_DATA_ID: &str = "0x07";
const WIN_DATA_TYPE: &str = "ebd0a0a2-b9e5-4433-87c0-68b6b72699c7";

const EXT_FEATURES: FsFeatures = FsFeatures {
    resize: ResizeFlags::ONLINE_GROW
        .union(ResizeFlags::OFFLINE_GROW)
        .union(ResizeFlags::OFFLINE_SHRINK),
    mkfs: MkfsFlags::LABEL
        .union(MkfsFlags::UUID)
        .union(MkfsFlags::DRY_RUN)
        .union(MkfsFlags::NODISCARD)
        .union(MkfsFlags::FORCE),
    fsck: FsckFlags::CHECK.union(FsckFlags::REPAIR),
    configure: ConfigureFlags::SET_LABEL.union(ConfigureFlags::SET_UUID),
    features: FeatureFlags::OWNERS,
    partition_id: LINUX_ID,
    partition_type: LINUX_TYPE,
};

const XFS_FEATURES: FsFeatures = FsFeatures {
    resize: ResizeFlags::ONLINE_GROW.union(ResizeFlags::OFFLINE_GROW),
    mkfs: MkfsFlags::LABEL
        .union(MkfsFlags::UUID)
        .union(MkfsFlags::DRY_RUN)
        .union(MkfsFlags::NODISCARD)
        .union(MkfsFlags::FORCE),
    fsck: FsckFlags::CHECK.union(FsckFlags::REPAIR),
    configure: ConfigureFlags::SET_LABEL.union(ConfigureFlags::SET_UUID),
    features: FeatureFlags::OWNERS,
    partition_id: LINUX_ID,
    partition_type: LINUX_TYPE,
};

const VFAT_FEATURES: FsFeatures = FsFeatures {
    resize: ResizeFlags::OFFLINE_GROW.union(ResizeFlags::OFFLINE_SHRINK),
    mkfs: MkfsFlags::LABEL
        .union(MkfsFlags::UUID)
        .union(MkfsFlags::FORCE)
        .union(MkfsFlags::NOPT),
    fsck: FsckFlags::CHECK.union(FsckFlags::REPAIR),
    configure: ConfigureFlags::SET_LABEL,
    features: FeatureFlags::PARTITION_TABLE,
    partition_id: "0x0c",
    partition_type: WIN_DATA_TYPE,
};

const NTFS_FEATURES: FsFeatures = FsFeatures {
    resize: ResizeFlags::OFFLINE_GROW.union(ResizeFlags::OFFLINE_SHRINK),
    mkfs: MkfsFlags::LABEL.union(MkfsFlags::DRY_RUN),
    fsck: FsckFlags::CHECK.union(FsckFlags::REPAIR),
    configure: ConfigureFlags::SET_LABEL.union(ConfigureFlags::SET_UUID),
    features: FeatureFlags::empty(),
    partition_id: WIN_DATA_ID,
    partition_type: WIN_DATA_TYPE,
};

const F2FS_FEATURES: FsFeatures = FsFeatures {
    resize: ResizeFlags::OFFLINE_GROW.union(ResizeFlags::OFFLINE_SHRINK),
    mkfs: MkfsFlags::LABEL
        .union(MkfsFlags::NODISCARD)
        .union(MkfsFlags::FORCE),
    fsck: FsckFlags::CHECK.union(FsckFlags::REPAIR),
    configure: ConfigureFlags::empty(),
    features: FeatureFlags::OWNERS,
    partition_id: LINUX_ID,
    partition_type: LINUX_TYPE,
};

const NILFS2_FEATURES: FsFeatures = FsFeatures {
    resize: ResizeFlags::ONLINE_GROW.union(ResizeFlags::ONLINE_SHRINK),
    mkfs: MkfsFlags::LABEL
        .union(MkfsFlags::DRY_RUN)
        .union(MkfsFlags::NODISCARD)
        .union(MkfsFlags::FORCE),
    fsck: FsckFlags::empty(),
    configure: ConfigureFlags::SET_LABEL.union(ConfigureFlags::SET_UUID),
    features: FeatureFlags::OWNERS,
    partition_id: LINUX_ID,
    partition_type: LINUX_TYPE,
};

const EXFAT_FEATURES: FsFeatures = FsFeatures {
    resize: ResizeFlags::empty(),
    mkfs: MkfsFlags::LABEL,
    fsck: FsckFlags::CHECK.union(FsckFlags::REPAIR),
    configure: ConfigureFlags::SET_LABEL,
    features: FeatureFlags::empty(),
    partition_id: WIN_DATA_ID,
    partition_type: WIN_DATA_TYPE,
};

const BTRFS_FEATURES: FsFeatures = FsFeatures {
    resize: ResizeFlags::ONLINE_GROW.union(ResizeFlags::ONLINE_SHRINK),
    mkfs: MkfsFlags::LABEL
        .union(MkfsFlags::UUID)
        .union(MkfsFlags::NODISCARD)
        .union(MkfsFlags::FORCE),
    fsck: FsckFlags::CHECK.union(FsckFlags::REPAIR),
    configure: ConfigureFlags::SET_LABEL.union(ConfigureFlags::SET_UUID),
    features: FeatureFlags::OWNERS,
    partition_id: LINUX_ID,
    partition_type: LINUX_TYPE,
};

const UDF_FEATURES: FsFeatures = FsFeatures {
    resize: ResizeFlags::empty(),
    mkfs: MkfsFlags::LABEL.union(MkfsFlags::UUID),
    fsck: FsckFlags::empty(),
    configure: ConfigureFlags::SET_LABEL.union(ConfigureFlags::SET_UUID),
    features: FeatureFlags::OWNERS.union(FeatureFlags::PARTITION_TABLE),
    partition_id: WIN_DATA_ID,
    partition_type: WIN_DATA_TYPE,
};

const REISERFS_FEATURES: FsFeatures = FsFeatures {
    resize: ResizeFlags::OFFLINE_GROW.union(ResizeFlags::OFFLINE_SHRINK),
    mkfs: MkfsFlags::LABEL.union(MkfsFlags::UUID),
    fsck: FsckFlags::CHECK.union(FsckFlags::REPAIR),
    configure: ConfigureFlags::SET_LABEL.union(ConfigureFlags::SET_UUID),
    features: FeatureFlags::OWNERS,
    partition_id: LINUX_ID,
    partition_type: LINUX_TYPE,
};

const BCACHEFS_FEATURES: FsFeatures = FsFeatures {
    resize: ResizeFlags::ONLINE_GROW.union(ResizeFlags::ONLINE_SHRINK),
    mkfs: MkfsFlags::LABEL
        .union(MkfsFlags::UUID)
        .union(MkfsFlags::NODISCARD)
        .union(MkfsFlags::FORCE),
    fsck: FsckFlags::CHECK.union(FsckFlags::REPAIR),
    configure: ConfigureFlags::SET_LABEL,
    features: FeatureFlags::OWNERS,
    partition_id: LINUX_ID,
    partition_type: LINUX_TYPE,
};

impl FsFamily {
    pub const ALL: &'static [FsFamily] = &[
        FsFamily::Ext2,
        FsFamily::Ext3,
        FsFamily::Ext4,
        FsFamily::Xfs,
        FsFamily::Vfat,
        FsFamily::Ntfs,
        FsFamily::F2fs,
        FsFamily::Nilfs2,
        FsFamily::Exfat,
        FsFamily::Btrfs,
        FsFamily::Udf,
        FsFamily::Reiserfs,
        FsFamily::Bcachefs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FsFamily::Ext2 => "ext2",
            FsFamily::Ext3 => "ext3",
            FsFamily::Ext4 => "ext4",
            FsFamily::Xfs => "xfs",
            FsFamily::Vfat => "vfat",
            FsFamily::Ntfs => "ntfs",
            FsFamily::F2fs => "f2fs",
            FsFamily::Nilfs2 => "nilfs2",
            FsFamily::Exfat => "exfat",
            FsFamily::Btrfs => "btrfs",
            FsFamily::Udf => "udf",
            FsFamily::Reiserfs => "reiserfs",
            FsFamily::Bcachefs => "bcachefs",
        }
    }

    /// The capability record for this family.
    pub const fn features(&self) -> &'static FsFeatures {
        match self {
            FsFamily::Ext2 | FsFamily::Ext3 | FsFamily::Ext4 => &EXT_FEATURES,
            FsFamily::Xfs => &XFS_FEATURES,
            FsFamily::Vfat => &VFAT_FEATURES,
            FsFamily::Ntfs => &NTFS_FEATURES,
            FsFamily::F2fs => &F2FS_FEATURES,
            FsFamily::Nilfs2 => &NILFS2_FEATURES,
            FsFamily::Exfat => &EXFAT_FEATURES,
            FsFamily::Btrfs => &BTRFS_FEATURES,
            FsFamily::Udf => &UDF_FEATURES,
            FsFamily::Reiserfs => &REISERFS_FEATURES,
            FsFamily::Bcachefs => &BCACHEFS_FEATURES,
        }
    }

    /// The utility each operation needs for this family.
    pub(crate) const fn tools(&self) -> &'static FsToolInfo {
        match self {
            FsFamily::Ext2 => &FsToolInfo {
                mkfs_util: Some("mkfs.ext2"),
                check_util: Some("e2fsck"),
                repair_util: Some("e2fsck"),
                resize_util: Some("resize2fs"),
                minsize_util: Some("resize2fs"),
                label_util: Some("tune2fs"),
                // the superblock is read directly, no tool needed
                info_util: Some(""),
                uuid_util: Some("tune2fs"),
            },
            FsFamily::Ext3 => &FsToolInfo {
                mkfs_util: Some("mkfs.ext3"),
                check_util: Some("e2fsck"),
                repair_util: Some("e2fsck"),
                resize_util: Some("resize2fs"),
                minsize_util: Some("resize2fs"),
                label_util: Some("tune2fs"),
                info_util: Some(""),
                uuid_util: Some("tune2fs"),
            },
            FsFamily::Ext4 => &FsToolInfo {
                mkfs_util: Some("mkfs.ext4"),
                check_util: Some("e2fsck"),
                repair_util: Some("e2fsck"),
                resize_util: Some("resize2fs"),
                minsize_util: Some("resize2fs"),
                label_util: Some("tune2fs"),
                info_util: Some(""),
                uuid_util: Some("tune2fs"),
            },
            FsFamily::Xfs => &FsToolInfo {
                mkfs_util: Some("mkfs.xfs"),
                check_util: Some("xfs_repair"),
                repair_util: Some("xfs_repair"),
                resize_util: Some("xfs_growfs"),
                minsize_util: None,
                label_util: Some("xfs_admin"),
                info_util: Some("xfs_db"),
                uuid_util: Some("xfs_admin"),
            },
            FsFamily::Vfat => &FsToolInfo {
                mkfs_util: Some("mkfs.vfat"),
                check_util: Some("fsck.vfat"),
                repair_util: Some("fsck.vfat"),
                resize_util: Some("fatresize"),
                minsize_util: None,
                label_util: Some("fatlabel"),
                info_util: Some("fsck.vfat"),
                uuid_util: None,
            },
            FsFamily::Ntfs => &FsToolInfo {
                mkfs_util: Some("mkntfs"),
                check_util: Some("ntfsfix"),
                repair_util: Some("ntfsfix"),
                resize_util: Some("ntfsresize"),
                minsize_util: Some("ntfsresize"),
                label_util: Some("ntfslabel"),
                info_util: Some("ntfsinfo"),
                uuid_util: Some("ntfslabel"),
            },
            FsFamily::F2fs => &FsToolInfo {
                mkfs_util: Some("mkfs.f2fs"),
                check_util: Some("fsck.f2fs"),
                repair_util: Some("fsck.f2fs"),
                resize_util: Some("resize.f2fs"),
                minsize_util: None,
                label_util: None,
                info_util: Some("dump.f2fs"),
                uuid_util: None,
            },
            FsFamily::Nilfs2 => &FsToolInfo {
                mkfs_util: Some("mkfs.nilfs2"),
                check_util: None,
                repair_util: None,
                resize_util: Some("nilfs-resize"),
                minsize_util: None,
                label_util: Some("nilfs-tune"),
                info_util: Some("nilfs-tune"),
                uuid_util: Some("nilfs-tune"),
            },
            FsFamily::Exfat => &FsToolInfo {
                mkfs_util: Some("mkfs.exfat"),
                check_util: Some("fsck.exfat"),
                repair_util: Some("fsck.exfat"),
                resize_util: None,
                minsize_util: None,
                label_util: Some("tune.exfat"),
                info_util: Some("tune.exfat"),
                uuid_util: None,
            },
            FsFamily::Btrfs => &FsToolInfo {
                mkfs_util: Some("mkfs.btrfs"),
                check_util: Some("btrfsck"),
                repair_util: Some("btrfsck"),
                resize_util: Some("btrfs"),
                minsize_util: None,
                label_util: Some("btrfs"),
                info_util: Some("btrfs"),
                uuid_util: Some("btrfstune"),
            },
            FsFamily::Udf => &FsToolInfo {
                mkfs_util: Some("mkudffs"),
                check_util: None,
                repair_util: None,
                resize_util: None,
                minsize_util: None,
                label_util: Some("udflabel"),
                info_util: Some("udfinfo"),
                uuid_util: Some("udflabel"),
            },
            FsFamily::Reiserfs => &FsToolInfo {
                mkfs_util: Some("mkreiserfs"),
                check_util: Some("reiserfsck"),
                repair_util: Some("reiserfsck"),
                resize_util: Some("resize_reiserfs"),
                minsize_util: None,
                label_util: Some("reiserfstune"),
                info_util: Some("debugreiserfs"),
                uuid_util: Some("reiserfstune"),
            },
            FsFamily::Bcachefs => &FsToolInfo {
                mkfs_util: Some("mkfs.bcachefs"),
                check_util: Some("fsck.bcachefs"),
                repair_util: Some("fsck.bcachefs"),
                resize_util: Some("bcachefs"),
                minsize_util: None,
                label_util: Some("bcachefs"),
                info_util: Some("bcachefs"),
                uuid_util: None,
            },
        }
    }
}

impl fmt::Display for FsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsFamily {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FsFamily::ALL
            .iter()
            .find(|f| f.as_str() == s)
            .copied()
            .ok_or_else(|| FsError::NotSupported(format!("Filesystem '{s}' is not supported.")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_roundtrip() {
        for family in FsFamily::ALL {
            assert_eq!(family.as_str().parse::<FsFamily>().unwrap(), *family);
        }
        assert!("zfs".parse::<FsFamily>().is_err());
    }

    #[test]
    fn test_capability_matrix_spots() {
        let ext4 = FsFamily::Ext4.features();
        assert!(ext4.resize.contains(ResizeFlags::OFFLINE_SHRINK));
        assert!(ext4.mkfs.contains(MkfsFlags::UUID));

        let xfs = FsFamily::Xfs.features();
        assert!(!xfs.resize.contains(ResizeFlags::OFFLINE_SHRINK));
        assert!(xfs.resize.contains(ResizeFlags::ONLINE_GROW));

        let exfat = FsFamily::Exfat.features();
        assert!(exfat.resize.is_empty());
        assert!(!exfat.configure.contains(ConfigureFlags::SET_UUID));

        let udf = FsFamily::Udf.features();
        assert!(udf.fsck.is_empty());
        assert!(udf.features.contains(FeatureFlags::PARTITION_TABLE));

        let vfat = FsFamily::Vfat.features();
        assert!(vfat.mkfs.contains(MkfsFlags::NOPT));
        assert_eq!(vfat.partition_id, "0x0c");
    }

    #[test]
    fn test_required_utils() {
        let table: [u32; FS_MODE_COUNT] = [0b01, 0, 0b10, 0b10, 0b100, 0, 0b1000, 0b100];
        assert_eq!(required_utils(FsMode::MKFS, &table), 0b01);
        assert_eq!(required_utils(FsMode::CHECK | FsMode::REPAIR, &table), 0b10);
        assert_eq!(
            required_utils(FsMode::SET_LABEL | FsMode::RESIZE, &table),
            0b1100
        );
        assert_eq!(required_utils(FsMode::WIPE, &table), 0);
    }
}

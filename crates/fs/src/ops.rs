/// Options commonly supported by mkfs tools. Unsupported options are
/// silently ignored by families that cannot express them; consult
/// [`crate::FsFeatures::mkfs`] for what a family honours.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MkfsOptions {
    pub label: Option<String>,
    pub uuid: Option<String>,
    /// Only simulate the creation.
    pub dry_run: bool,
    /// Do not discard (TRIM) the device during creation.
    pub no_discard: bool,
    /// Overwrite existing signatures without asking.
    pub force: bool,
    /// Do not create a partition table on the device (vfat).
    pub no_pt: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtInfo {
    pub label: String,
    pub uuid: String,
    /// `"clean"`/`"not clean"` optionally suffixed with `" with errors"`.
    pub state: String,
    pub block_size: u64,
    pub block_count: u64,
    pub free_blocks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XfsInfo {
    pub label: String,
    pub uuid: String,
    pub block_size: u64,
    pub block_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VfatInfo {
    pub label: String,
    pub uuid: String,
    pub cluster_size: u64,
    pub cluster_count: u64,
    pub free_cluster_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NtfsInfo {
    pub label: String,
    pub uuid: String,
    pub size: u64,
    pub free_space: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct F2fsInfo {
    pub label: String,
    pub uuid: String,
    /// Zero when the tool does not report the sector size.
    pub sector_size: u64,
    pub sector_count: u64,
    /// Superblock feature bits.
    pub features: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BtrfsInfo {
    pub label: String,
    pub uuid: String,
    pub size: u64,
    pub free_space: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExfatInfo {
    pub label: String,
    pub uuid: String,
    pub sector_size: u64,
    pub sector_count: u64,
    pub cluster_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UdfInfo {
    pub label: String,
    pub uuid: String,
    /// UDF revision, e.g. `"2.01"`.
    pub revision: String,
    /// Logical Volume Identifier.
    pub lvid: String,
    /// Volume Identifier (truncated form of the label).
    pub vid: String,
    pub block_size: u64,
    pub block_count: u64,
    pub free_blocks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Nilfs2Info {
    pub label: String,
    pub uuid: String,
    pub size: u64,
    pub block_size: u64,
    pub free_blocks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReiserfsInfo {
    pub label: String,
    pub uuid: String,
    pub block_size: u64,
    pub block_count: u64,
    pub free_blocks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BcachefsInfo {
    pub uuid: String,
    pub size: u64,
    pub free_space: u64,
}

/// Information about a filesystem, one variant per family (the three ext
/// generations share a record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsInfo {
    Ext(ExtInfo),
    Xfs(XfsInfo),
    Vfat(VfatInfo),
    Ntfs(NtfsInfo),
    F2fs(F2fsInfo),
    Btrfs(BtrfsInfo),
    Exfat(ExfatInfo),
    Udf(UdfInfo),
    Nilfs2(Nilfs2Info),
    Reiserfs(ReiserfsInfo),
    Bcachefs(BcachefsInfo),
}

impl FsInfo {
    /// The filesystem label, if the family records one.
    pub fn label(&self) -> Option<&str> {
        match self {
            FsInfo::Ext(i) => Some(&i.label),
            FsInfo::Xfs(i) => Some(&i.label),
            FsInfo::Vfat(i) => Some(&i.label),
            FsInfo::Ntfs(i) => Some(&i.label),
            FsInfo::F2fs(i) => Some(&i.label),
            FsInfo::Btrfs(i) => Some(&i.label),
            FsInfo::Exfat(i) => Some(&i.label),
            FsInfo::Udf(i) => Some(&i.label),
            FsInfo::Nilfs2(i) => Some(&i.label),
            FsInfo::Reiserfs(i) => Some(&i.label),
            FsInfo::Bcachefs(_) => None,
        }
    }

    pub fn uuid(&self) -> &str {
        match self {
            FsInfo::Ext(i) => &i.uuid,
            FsInfo::Xfs(i) => &i.uuid,
            FsInfo::Vfat(i) => &i.uuid,
            FsInfo::Ntfs(i) => &i.uuid,
            FsInfo::F2fs(i) => &i.uuid,
            FsInfo::Btrfs(i) => &i.uuid,
            FsInfo::Exfat(i) => &i.uuid,
            FsInfo::Udf(i) => &i.uuid,
            FsInfo::Nilfs2(i) => &i.uuid,
            FsInfo::Reiserfs(i) => &i.uuid,
            FsInfo::Bcachefs(i) => &i.uuid,
        }
    }

    /// Total size of the filesystem in bytes.
    pub fn size(&self) -> u64 {
        match self {
            FsInfo::Ext(i) => i.block_size * i.block_count,
            FsInfo::Xfs(i) => i.block_size * i.block_count,
            FsInfo::Vfat(i) => i.cluster_size * i.cluster_count,
            FsInfo::Ntfs(i) => i.size,
            FsInfo::F2fs(i) => i.sector_size * i.sector_count,
            FsInfo::Btrfs(i) => i.size,
            FsInfo::Exfat(i) => i.sector_size * i.sector_count,
            FsInfo::Udf(i) => i.block_size * i.block_count,
            FsInfo::Nilfs2(i) => i.size,
            FsInfo::Reiserfs(i) => i.block_size * i.block_count,
            FsInfo::Bcachefs(i) => i.size,
        }
    }
}

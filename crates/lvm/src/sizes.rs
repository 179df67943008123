//! Local size math for planning LVM layouts. All sizes are in bytes.

use blockdev_utils::sizes::{GIB, KIB, MIB};

/// The default physical extent size, used when callers pass 0.
pub const DEFAULT_PE_SIZE: u64 = 4 * MIB;

pub const MIN_PE_SIZE: u64 = KIB;
pub const MAX_PE_SIZE: u64 = 16 * GIB;

pub const MIN_THPOOL_MD_SIZE: u64 = 4 * MIB;
/// DM_THIN_MAX_METADATA_SIZE is in 512 byte sectors (from libdevmapper):
/// 255 incarnations of (2^14 - 64) 4 KiB metadata blocks.
const DM_THIN_MAX_METADATA_SIZE: u64 = 255 * ((1 << 14) - 64) * (4096 / 512);
pub const MAX_THPOOL_MD_SIZE: u64 = DM_THIN_MAX_METADATA_SIZE * 512;

pub const MIN_THPOOL_CHUNK_SIZE: u64 = 64 * KIB;
pub const MAX_THPOOL_CHUNK_SIZE: u64 = GIB;
const DEFAULT_CHUNK_SIZE: u64 = 64 * KIB;

/// Minimal cache metadata size, according to lvmcache(7).
pub const MIN_CACHE_MD_SIZE: u64 = 8 * MIB;

const THPOOL_MD_FACTOR_NEW: f64 = 0.2;
const THPOOL_MD_FACTOR_EXISTS: f64 = 1.0 / 6.0;

#[cfg(target_pointer_width = "64")]
pub const MAX_LV_SIZE: u64 = 8 * blockdev_utils::sizes::EIB;
#[cfg(not(target_pointer_width = "64"))]
pub const MAX_LV_SIZE: u64 = 16 * blockdev_utils::sizes::TIB;

fn resolve_pe_size(pe_size: u64) -> u64 {
    if pe_size == 0 {
        DEFAULT_PE_SIZE
    } else {
        pe_size
    }
}

/// Whether `size` is a supported physical extent size: a power of two
/// between 1 KiB and 16 GiB.
pub fn is_supported_pe_size(size: u64) -> bool {
    size.is_power_of_two() && (MIN_PE_SIZE..=MAX_PE_SIZE).contains(&size)
}

/// All supported PE sizes.
pub fn get_supported_pe_sizes() -> Vec<u64> {
    std::iter::successors(Some(MIN_PE_SIZE), |s| Some(s * 2))
        .take_while(|s| *s <= MAX_PE_SIZE)
        .collect()
}

/// The maximum LV size on this architecture.
pub fn get_max_lv_size() -> u64 {
    MAX_LV_SIZE
}

/// Round `size` up or down to a multiple of `pe_size` (0 selects the
/// default PE size). If rounding up would overflow, the value is rounded
/// down instead.
pub fn round_size_to_pe(size: u64, pe_size: u64, round_up: bool) -> u64 {
    let pe_size = resolve_pe_size(pe_size);
    let delta = size % pe_size;
    if delta == 0 {
        return size;
    }
    if round_up && (u64::MAX - (pe_size - delta)) >= size {
        size + (pe_size - delta)
    } else {
        size - delta
    }
}

/// The space an LV of `lv_size` actually takes on disk: the size rounded up
/// to a whole number of extents, plus one extra extent for the LV metadata.
pub fn get_lv_physical_size(lv_size: u64, pe_size: u64) -> u64 {
    let pe_size = resolve_pe_size(pe_size);
    round_size_to_pe(lv_size, pe_size, true) + pe_size
}

/// The padding needed for a thin pool of the given size; `included` means
/// the padding is already part of `size`.
pub fn get_thpool_padding(size: u64, pe_size: u64, included: bool) -> u64 {
    let pe_size = resolve_pe_size(pe_size);
    let factor = if included {
        THPOOL_MD_FACTOR_EXISTS
    } else {
        THPOOL_MD_FACTOR_NEW
    };
    let raw_md_size = (size as f64 * factor).ceil() as u64;
    std::cmp::min(
        round_size_to_pe(raw_md_size, pe_size, true),
        round_size_to_pe(MAX_THPOOL_MD_SIZE, pe_size, true),
    )
}

/// The recommended metadata size for a thin pool, based on the lvcreate
/// metadata size calculation, clamped to the valid metadata size interval.
pub fn get_thpool_meta_size(pool_size: u64, chunk_size: u64) -> u64 {
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    (64 * pool_size / chunk_size).clamp(MIN_THPOOL_MD_SIZE, MAX_THPOOL_MD_SIZE)
}

/// Whether `size` is a valid thin pool metadata size.
pub fn is_valid_thpool_md_size(size: u64) -> bool {
    (MIN_THPOOL_MD_SIZE..=MAX_THPOOL_MD_SIZE).contains(&size)
}

/// Whether `size` is a valid thin pool chunk size. To support discard the
/// chunk size must be a power of two; otherwise a multiple of 64 KiB is
/// enough.
pub fn is_valid_thpool_chunk_size(size: u64, discard: bool) -> bool {
    if !(MIN_THPOOL_CHUNK_SIZE..=MAX_THPOOL_CHUNK_SIZE).contains(&size) {
        return false;
    }
    if discard {
        size.is_power_of_two()
    } else {
        size % (64 * KIB) == 0
    }
}

/// The recommended default metadata size for a cache of `cache_size`.
pub fn cache_get_default_md_size(cache_size: u64) -> u64 {
    std::cmp::max(cache_size / 1000, MIN_CACHE_MD_SIZE)
}

/// Format a size for the LVM command line option dictionary (`"<n>b"`).
pub(crate) fn size_str_param(size: u64) -> String {
    format!("{size}b")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_supported_pe_size() {
        assert!(is_supported_pe_size(KIB));
        assert!(is_supported_pe_size(4 * MIB));
        assert!(is_supported_pe_size(16 * GIB));
        assert!(!is_supported_pe_size(512));
        assert!(!is_supported_pe_size(3 * MIB));
        assert!(!is_supported_pe_size(32 * GIB));
        assert!(!is_supported_pe_size(0));
    }

    #[test]
    fn test_get_supported_pe_sizes() {
        let sizes = get_supported_pe_sizes();
        assert_eq!(sizes.first(), Some(&KIB));
        assert_eq!(sizes.last(), Some(&(16 * GIB)));
        assert_eq!(sizes.len(), 25);
        assert!(sizes.iter().all(|s| is_supported_pe_size(*s)));
    }

    #[test]
    fn test_round_size_to_pe() {
        assert_eq!(round_size_to_pe(13 * MIB, 4 * MIB, true), 16 * MIB);
        assert_eq!(round_size_to_pe(13 * MIB, 4 * MIB, false), 12 * MIB);
        // already a multiple
        assert_eq!(round_size_to_pe(12 * MIB, 4 * MIB, true), 12 * MIB);
        assert_eq!(round_size_to_pe(12 * MIB, 4 * MIB, false), 12 * MIB);
        // default PE size for 0
        assert_eq!(round_size_to_pe(5 * MIB, 0, true), 8 * MIB);
        // overflow rounds down regardless
        assert_eq!(
            round_size_to_pe(u64::MAX - 1, 4 * MIB, true),
            u64::MAX - (u64::MAX % (4 * MIB))
        );
    }

    #[test]
    fn test_thpool_meta_size_bounds() {
        for size in [MIB, GIB, 100 * GIB, 1024 * GIB] {
            for chunk in [0, 64 * KIB, MIB, GIB] {
                let md = get_thpool_meta_size(size, chunk);
                assert!(md >= MIN_THPOOL_MD_SIZE);
                assert!(md <= MAX_THPOOL_MD_SIZE);
            }
        }
        // a tiny pool is clamped up
        assert_eq!(get_thpool_meta_size(MIB, 0), MIN_THPOOL_MD_SIZE);
        // a huge pool with a tiny chunk size is clamped down
        assert_eq!(
            get_thpool_meta_size(100 * 1024 * GIB, 64 * KIB),
            MAX_THPOOL_MD_SIZE
        );
        // the middle is the lvcreate formula
        assert_eq!(get_thpool_meta_size(100 * GIB, 64 * KIB), 100 * MIB);
    }

    #[test]
    fn test_thpool_padding() {
        // 20% rounded up to the PE size
        assert_eq!(get_thpool_padding(100 * MIB, 4 * MIB, false), 20 * MIB);
        // 1/6 when already included
        assert_eq!(get_thpool_padding(120 * MIB, 4 * MIB, true), 20 * MIB);
        // capped at the max metadata size (rounded to PE size)
        let padding = get_thpool_padding(100 * 1024 * GIB, 4 * MIB, false);
        assert_eq!(padding, round_size_to_pe(MAX_THPOOL_MD_SIZE, 4 * MIB, true));
    }

    #[test]
    fn test_is_valid_thpool_chunk_size() {
        assert!(is_valid_thpool_chunk_size(64 * KIB, true));
        assert!(is_valid_thpool_chunk_size(GIB, true));
        // non power of two needs discard disabled
        assert!(!is_valid_thpool_chunk_size(192 * KIB, true));
        assert!(is_valid_thpool_chunk_size(192 * KIB, false));
        // out of bounds
        assert!(!is_valid_thpool_chunk_size(32 * KIB, false));
        assert!(!is_valid_thpool_chunk_size(2 * GIB, false));
        // not a multiple of 64 KiB
        assert!(!is_valid_thpool_chunk_size(65 * KIB, false));
    }

    #[test]
    fn test_cache_get_default_md_size() {
        assert_eq!(cache_get_default_md_size(GIB), MIN_CACHE_MD_SIZE);
        assert_eq!(cache_get_default_md_size(100 * GIB), 100 * GIB / 1000);
    }

    #[test]
    fn test_lv_physical_size() {
        // rounded up to whole extents, plus one extent for the metadata
        assert_eq!(get_lv_physical_size(10 * MIB + 1, 4 * MIB), 16 * MIB);
        assert_eq!(get_lv_physical_size(12 * MIB, 4 * MIB), 16 * MIB);
        assert_eq!(get_lv_physical_size(4 * MIB, 0), 8 * MIB);
    }
}

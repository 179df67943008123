//! Cache pool, cached LV and writecache operations.

use camino::Utf8Path;

use blockdev_utils::{report_finished, report_progress, report_started, ExtraArg};

use crate::conn::{
    call_lvm_obj_method_sync, extra_str, get_lvm_object_properties, get_object_path, CallConfig,
    Param,
};
use crate::dm::CacheMode;
use crate::props::{prop_path, strip_brackets, DbusResolver, PathResolver};
use crate::sizes::cache_get_default_md_size;
use crate::{LvmError, CACHED_LV_INTF, CACHE_POOL_INTF, LV_CMN_INTF, LV_INTF, VG_INTF};

bitflags::bitflags! {
    /// Layout flags for cache pool (and metadata) creation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CachePoolFlags: u32 {
        const STRIPED = 1 << 0;
        const RAID1 = 1 << 1;
        const RAID5 = 1 << 2;
        const RAID6 = 1 << 3;
        const RAID10 = 1 << 4;
        const META_STRIPED = 1 << 5;
        const META_RAID1 = 1 << 6;
        const META_RAID5 = 1 << 7;
        const META_RAID6 = 1 << 8;
        const META_RAID10 = 1 << 9;
    }
}

/// LV type string for the data (or metadata) part from the pool flags.
fn lv_type_from_flags(flags: CachePoolFlags, meta: bool) -> Option<&'static str> {
    let (striped, raid1, raid5, raid6, raid10) = if meta {
        (
            CachePoolFlags::META_STRIPED,
            CachePoolFlags::META_RAID1,
            CachePoolFlags::META_RAID5,
            CachePoolFlags::META_RAID6,
            CachePoolFlags::META_RAID10,
        )
    } else {
        (
            CachePoolFlags::STRIPED,
            CachePoolFlags::RAID1,
            CachePoolFlags::RAID5,
            CachePoolFlags::RAID6,
            CachePoolFlags::RAID10,
        )
    };
    if flags.contains(striped) {
        Some("striped")
    } else if flags.contains(raid1) {
        Some("raid1")
    } else if flags.contains(raid5) {
        Some("raid5")
    } else if flags.contains(raid6) {
        Some("raid6")
    } else if flags.contains(raid10) {
        Some("raid10")
    } else {
        None
    }
}

/// Create a cache pool `vg_name/pool_name`: a data LV, a metadata LV and
/// the conversion of the two into a pool. Partial progress is reported; no
/// rollback is attempted when a later step fails.
pub fn cache_create_pool(
    vg_name: &str,
    pool_name: &str,
    pool_size: u64,
    md_size: u64,
    mode: CacheMode,
    flags: CachePoolFlags,
    fast_pvs: &[&Utf8Path],
) -> Result<(), LvmError> {
    let progress_id = report_started(&format!("Started 'create cache pool {vg_name}/{pool_name}'"));

    // create an LV for the pool
    let lv_type = lv_type_from_flags(flags, false);
    if let Err(e) = crate::lv_create(vg_name, pool_name, pool_size, lv_type, fast_pvs, &[]) {
        let e = LvmError::Fail(format!("Failed to create the pool LV: {e}"));
        report_finished(progress_id, &e.to_string());
        return Err(e);
    }
    report_progress(progress_id, 33, Some("Created the data LV"));

    // create the metadata LV
    let md_type = lv_type_from_flags(flags, true);
    let md_size = if md_size == 0 {
        cache_get_default_md_size(pool_size)
    } else {
        md_size
    };
    let md_name = format!("{pool_name}_meta");
    if let Err(e) = crate::lv_create(vg_name, &md_name, md_size, md_type, fast_pvs, &[]) {
        let e = LvmError::Fail(format!("Failed to create the pool metadata LV: {e}"));
        report_finished(progress_id, &e.to_string());
        return Err(e);
    }
    report_progress(progress_id, 66, Some("Created the metadata LV"));

    // create the cache pool from the two LVs
    let result: Result<(), LvmError> = (|| {
        let md_path = get_object_path(&format!("{vg_name}/{md_name}"))?;
        let pool_path = get_object_path(&format!("{vg_name}/{pool_name}"))?;
        let extra_params = vec![extra_str("cachemode", mode.as_str())];
        call_lvm_obj_method_sync(
            vg_name,
            VG_INTF,
            "CreateCachePool",
            vec![Param::ObjPath(md_path), Param::ObjPath(pool_path)],
            extra_params,
            &[],
            CallConfig::Global,
        )?;
        Ok(())
    })();

    match &result {
        Ok(()) => report_finished(progress_id, "Completed"),
        Err(e) => report_finished(progress_id, &e.to_string()),
    }
    result
}

/// Attach the cache pool `vg_name/cache_pool_lv` to `vg_name/data_lv`.
pub fn cache_attach(
    vg_name: &str,
    data_lv: &str,
    cache_pool_lv: &str,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    let data_lv_path = get_object_path(&format!("{vg_name}/{data_lv}"))?;
    call_lvm_obj_method_sync(
        &format!("{vg_name}/{cache_pool_lv}"),
        CACHE_POOL_INTF,
        "CacheLv",
        vec![Param::ObjPath(data_lv_path)],
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Detach the cache of `vg_name/cached_lv` (syncing it first), destroying
/// the cache pool when requested.
pub fn cache_detach(
    vg_name: &str,
    cached_lv: &str,
    destroy: bool,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    // make sure the LV is cached before issuing the detach
    cache_pool_name(vg_name, cached_lv)?;
    call_lvm_obj_method_sync(
        &format!("{vg_name}/{cached_lv}"),
        CACHED_LV_INTF,
        "DetachCachePool",
        vec![Param::Bool(destroy)],
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Create a cached LV in one call: the data LV, a cache pool and the
/// attachment. Partial progress is reported; no rollback is attempted.
#[allow(clippy::too_many_arguments)]
pub fn cache_create_cached_lv(
    vg_name: &str,
    lv_name: &str,
    data_size: u64,
    cache_size: u64,
    md_size: u64,
    mode: CacheMode,
    flags: CachePoolFlags,
    slow_pvs: &[&Utf8Path],
    fast_pvs: &[&Utf8Path],
) -> Result<(), LvmError> {
    let progress_id = report_started(&format!("Started 'create cached LV {vg_name}/{lv_name}'"));

    if let Err(e) = crate::lv_create(vg_name, lv_name, data_size, None, slow_pvs, &[]) {
        let e = LvmError::Fail(format!("Failed to create the data LV: {e}"));
        report_finished(progress_id, &e.to_string());
        return Err(e);
    }
    // 1/5 steps (cache pool creation has 3 steps) done
    report_progress(progress_id, 20, Some("Data LV created"));

    let pool_name = format!("{lv_name}_cache");
    if let Err(e) = cache_create_pool(vg_name, &pool_name, cache_size, md_size, mode, flags, fast_pvs)
    {
        let e = LvmError::Fail(format!("Failed to create the cache pool '{pool_name}': {e}"));
        report_finished(progress_id, &e.to_string());
        return Err(e);
    }
    // 4/5 steps done
    report_progress(progress_id, 80, Some("Cache pool created"));

    if let Err(e) = cache_attach(vg_name, lv_name, &pool_name, &[]) {
        let e = LvmError::Fail(format!(
            "Failed to attach the cache pool '{pool_name}' to the data LV: {e}"
        ));
        report_finished(progress_id, &e.to_string());
        return Err(e);
    }

    report_finished(progress_id, "Completed");
    Ok(())
}

/// The name of the cache pool used by `vg_name/cached_lv`.
pub fn cache_pool_name(vg_name: &str, cached_lv: &str) -> Result<String, LvmError> {
    let props = get_lvm_object_properties(&format!("{vg_name}/{cached_lv}"), CACHED_LV_INTF)?;
    let pool_path = prop_path(&props, "CachePool").ok_or_else(|| {
        LvmError::CacheNoCache(format!("The LV '{cached_lv}' has no cache pool attached"))
    })?;
    let name = DbusResolver
        .name_of(&pool_path, LV_CMN_INTF)
        .ok_or_else(|| {
            LvmError::Fail(format!(
                "Failed to get the cache pool name for the LV '{cached_lv}'"
            ))
        })?;
    // reported like hidden LVs, with square brackets around the name
    if !name.contains('[') || !name.contains(']') {
        return Err(LvmError::CacheInvalid(format!(
            "Failed to determine cache pool name from: '{name}'"
        )));
    }
    Ok(strip_brackets(&name))
}

/// Attach the (fast) LV `cache_lv` as a writecache to `data_lv`.
///
/// Note: both LVs are deactivated before the operation.
pub fn writecache_attach(
    vg_name: &str,
    data_lv: &str,
    cache_lv: &str,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    // both LVs need to be inactive for the writecache convert to work
    crate::lv_deactivate(vg_name, data_lv, &[])?;
    crate::lv_deactivate(vg_name, cache_lv, &[])?;

    let data_lv_path = get_object_path(&format!("{vg_name}/{data_lv}"))?;
    call_lvm_obj_method_sync(
        &format!("{vg_name}/{cache_lv}"),
        LV_INTF,
        "WriteCacheLv",
        vec![Param::ObjPath(data_lv_path)],
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Detach the writecache of `vg_name/cached_lv`.
pub fn writecache_detach(
    vg_name: &str,
    cached_lv: &str,
    destroy: bool,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    cache_detach(vg_name, cached_lv, destroy, extra)
}

/// Create a writecache-backed LV in one call: the cache LV, the data LV
/// and the attachment. Partial progress is reported; no rollback is
/// attempted.
pub fn writecache_create_cached_lv(
    vg_name: &str,
    lv_name: &str,
    data_size: u64,
    cache_size: u64,
    slow_pvs: &[&Utf8Path],
    fast_pvs: &[&Utf8Path],
) -> Result<(), LvmError> {
    let progress_id = report_started(&format!("Started 'create cached LV {vg_name}/{lv_name}'"));

    let cache_name = format!("{lv_name}_writecache");
    if let Err(e) = crate::lv_create(vg_name, &cache_name, cache_size, None, fast_pvs, &[]) {
        let e = LvmError::Fail(format!("Failed to create the cache LV '{cache_name}': {e}"));
        report_finished(progress_id, &e.to_string());
        return Err(e);
    }
    report_progress(progress_id, 33, Some("Cache LV created"));

    if let Err(e) = crate::lv_create(vg_name, lv_name, data_size, None, slow_pvs, &[]) {
        let e = LvmError::Fail(format!("Failed to create the data LV: {e}"));
        report_finished(progress_id, &e.to_string());
        return Err(e);
    }
    report_progress(progress_id, 66, Some("Data LV created"));

    if let Err(e) = writecache_attach(vg_name, lv_name, &cache_name, &[]) {
        let e = LvmError::Fail(format!(
            "Failed to attach the cache LV '{cache_name}' to the data LV: {e}"
        ));
        report_finished(progress_id, &e.to_string());
        return Err(e);
    }

    report_finished(progress_id, "Completed");
    Ok(())
}

/// Convert the LVs `data_lv` and `metadata_lv` into a new cache pool,
/// optionally renamed to `name`.
pub fn cache_pool_convert(
    vg_name: &str,
    data_lv: &str,
    metadata_lv: &str,
    name: Option<&str>,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    let data_lv_path = get_object_path(&format!("{vg_name}/{data_lv}"))?;
    let metadata_lv_path = get_object_path(&format!("{vg_name}/{metadata_lv}"))?;

    call_lvm_obj_method_sync(
        vg_name,
        VG_INTF,
        "CreateCachePool",
        vec![
            Param::ObjPath(metadata_lv_path),
            Param::ObjPath(data_lv_path),
        ],
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;

    if let Some(name) = name {
        crate::lv_rename(vg_name, data_lv, name, &[])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lv_type_from_flags() {
        assert_eq!(
            lv_type_from_flags(CachePoolFlags::STRIPED, false),
            Some("striped")
        );
        assert_eq!(
            lv_type_from_flags(CachePoolFlags::RAID6, false),
            Some("raid6")
        );
        assert_eq!(lv_type_from_flags(CachePoolFlags::STRIPED, true), None);
        assert_eq!(
            lv_type_from_flags(
                CachePoolFlags::STRIPED | CachePoolFlags::META_RAID1,
                true
            ),
            Some("raid1")
        );
        assert_eq!(lv_type_from_flags(CachePoolFlags::empty(), false), None);
    }
}

//! Logical volume operations.

use camino::Utf8Path;

use blockdev_utils::ExtraArg;

use crate::conn::{
    call_lv_method_sync, call_lvm_obj_method_sync, extra_i32, extra_str, get_existing_objects,
    get_lvm_object_properties, get_object_path, get_object_properties, CallConfig, Param,
};
use crate::props::{
    data_and_metadata_lvs, lv_from_props, pool_sub_lv_name, prop_strv, segs_from_devices,
    DbusResolver, LvData, PathResolver,
};
use crate::{LvmError, LVM_OBJ_PREFIX, LV_CMN_INTF, LV_INTF, VG_INTF};

/// Create a logical volume in `vg_name`, optionally of a specific segment
/// type and on specific PVs. For a striped LV the stripe count is derived
/// from the PV list.
pub fn lv_create(
    vg_name: &str,
    lv_name: &str,
    size: u64,
    lv_type: Option<&str>,
    pv_list: &[&Utf8Path],
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    let mut pvs = Vec::with_capacity(pv_list.len());
    for pv in pv_list {
        pvs.push((get_object_path(pv.as_str())?, 0u64, 0u64));
    }

    let mut extra_params = Vec::new();
    if let Some(lv_type) = lv_type {
        if !pv_list.is_empty() && lv_type == "striped" {
            extra_params.push(extra_i32("stripes", pv_list.len() as i32));
        } else {
            extra_params.push(extra_str("type", lv_type));
        }
    }

    call_lvm_obj_method_sync(
        vg_name,
        VG_INTF,
        "LvCreate",
        vec![
            Param::Str(lv_name.to_string()),
            Param::U64(size),
            Param::PvRanges(pvs),
        ],
        extra_params,
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Remove the LV `vg_name/lv_name`.
pub fn lv_remove(
    vg_name: &str,
    lv_name: &str,
    force: bool,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    // '--yes' is needed if DISCARD is enabled
    let mut extra_params = vec![extra_str("--yes", "")];
    if force {
        extra_params.push(extra_str("--force", ""));
    }
    call_lv_method_sync(
        vg_name,
        lv_name,
        LV_INTF,
        "Remove",
        Vec::new(),
        extra_params,
        extra,
    )?;
    Ok(())
}

/// Rename the LV `vg_name/lv_name` to `new_name`.
pub fn lv_rename(
    vg_name: &str,
    lv_name: &str,
    new_name: &str,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    call_lv_method_sync(
        vg_name,
        lv_name,
        LV_INTF,
        "Rename",
        vec![Param::Str(new_name.to_string())],
        Vec::new(),
        extra,
    )?;
    Ok(())
}

/// Resize the LV `vg_name/lv_name` to `size` bytes.
pub fn lv_resize(
    vg_name: &str,
    lv_name: &str,
    size: u64,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    // starting with 2.03.19 an extra option is needed to avoid any
    // filesystem related checks by lvresize
    let mut extra_params = Vec::new();
    if blockdev_utils::check_util_version(
        "lvm",
        Some("2.03.19"),
        Some("version"),
        Some(r"LVM version:\s+([\d\.]+)"),
    )
    .is_ok()
    {
        extra_params.push(extra_str("--fs", "ignore"));
    }
    call_lv_method_sync(
        vg_name,
        lv_name,
        LV_INTF,
        "Resize",
        vec![Param::U64(size), Param::PvRanges(Vec::new())],
        extra_params,
        extra,
    )?;
    Ok(())
}

/// Activate the LV `vg_name/lv_name`.
pub fn lv_activate(
    vg_name: &str,
    lv_name: &str,
    ignore_skip: bool,
    shared: bool,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    let mut extra_params = Vec::new();
    if ignore_skip {
        extra_params.push(extra_str("-K", ""));
    }
    // the activation mode: exclusive unless a shared activation is requested
    let control = if shared { 1u64 << 6 } else { 0 };
    call_lv_method_sync(
        vg_name,
        lv_name,
        LV_INTF,
        "Activate",
        vec![Param::U64(control)],
        extra_params,
        extra,
    )?;
    Ok(())
}

/// Deactivate the LV `vg_name/lv_name`.
pub fn lv_deactivate(vg_name: &str, lv_name: &str, extra: &[ExtraArg]) -> Result<(), LvmError> {
    call_lv_method_sync(
        vg_name,
        lv_name,
        LV_INTF,
        "Deactivate",
        vec![Param::U64(0)],
        Vec::new(),
        extra,
    )?;
    Ok(())
}

/// Create a snapshot of `vg_name/origin_name`; `size` 0 is only valid for
/// thin snapshots.
pub fn lv_snapshot_create(
    vg_name: &str,
    origin_name: &str,
    snapshot_name: &str,
    size: u64,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    call_lv_method_sync(
        vg_name,
        origin_name,
        LV_INTF,
        "Snapshot",
        vec![Param::Str(snapshot_name.to_string()), Param::U64(size)],
        Vec::new(),
        extra,
    )?;
    Ok(())
}

/// Merge the snapshot `vg_name/snapshot_name` back into its origin.
pub fn lv_snapshot_merge(
    vg_name: &str,
    snapshot_name: &str,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    call_lvm_obj_method_sync(
        &format!("{vg_name}/{snapshot_name}"),
        "com.redhat.lvmdbus1.Snapshot",
        "Merge",
        Vec::new(),
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// The origin LV name of the snapshot `vg_name/lv_name` ("" for LVs that
/// are not snapshots).
pub fn lv_origin(vg_name: &str, lv_name: &str) -> Result<Option<String>, LvmError> {
    let props = get_lvm_object_properties(&format!("{vg_name}/{lv_name}"), LV_CMN_INTF)?;
    let Some(origin_path) = crate::props::prop_path(&props, "OriginLv") else {
        return Ok(None);
    };
    Ok(DbusResolver.name_of(&origin_path, LV_CMN_INTF))
}

/// Add `tags` to the LV.
pub fn add_lv_tags(vg_name: &str, lv_name: &str, tags: &[String]) -> Result<(), LvmError> {
    call_lv_method_sync(
        vg_name,
        lv_name,
        LV_INTF,
        "TagsAdd",
        vec![Param::StrArray(tags.to_vec())],
        Vec::new(),
        &[],
    )?;
    Ok(())
}

/// Remove `tags` from the LV.
pub fn delete_lv_tags(vg_name: &str, lv_name: &str, tags: &[String]) -> Result<(), LvmError> {
    call_lv_method_sync(
        vg_name,
        lv_name,
        LV_INTF,
        "TagsDel",
        vec![Param::StrArray(tags.to_vec())],
        Vec::new(),
        &[],
    )?;
    Ok(())
}

/// Fill the pool internals and segments of an already decoded LV record.
fn fill_lv_tree(data: &mut LvData, obj_path: &str, resolver: &dyn PathResolver) {
    data.data_lv = pool_sub_lv_name(
        &data.vg_name,
        &data.lv_name,
        &data.segtype,
        "DataLv",
        resolver,
    );
    data.metadata_lv = pool_sub_lv_name(
        &data.vg_name,
        &data.lv_name,
        &data.segtype,
        "MetaDataLv",
        resolver,
    );

    if let Ok(devices) = resolver.property(obj_path, LV_CMN_INTF, "Devices") {
        data.segs = segs_from_devices(&*devices, resolver);
    }
    if let Ok(hidden) = resolver.property(obj_path, LV_CMN_INTF, "HiddenLvs") {
        let paths: Vec<String> = hidden
            .as_iter()
            .map(|it| it.filter_map(|p| p.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let (data_lvs, metadata_lvs) = data_and_metadata_lvs(&paths, resolver);
        data.data_lvs = data_lvs;
        data.metadata_lvs = metadata_lvs;
    }
}

/// Information about the LV `vg_name/lv_name`.
pub fn lv_info(vg_name: &str, lv_name: &str) -> Result<LvData, LvmError> {
    let props = get_lvm_object_properties(&format!("{vg_name}/{lv_name}"), LV_CMN_INTF)?;
    lv_from_props(&props, &DbusResolver)
}

/// Like [`lv_info`], additionally resolving pool data/metadata LVs, hidden
/// sub-LVs and physical segments.
pub fn lv_info_tree(vg_name: &str, lv_name: &str) -> Result<LvData, LvmError> {
    let obj_path = get_object_path(&format!("{vg_name}/{lv_name}"))?;
    let props = get_object_properties(&obj_path, LV_CMN_INTF)?;
    let mut data = lv_from_props(&props, &DbusResolver)?;
    fill_lv_tree(&mut data, &obj_path, &DbusResolver);
    Ok(data)
}

fn lvs_impl(vg_name: Option<&str>, tree: bool) -> Result<Vec<LvData>, LvmError> {
    let mut result = Vec::new();
    for prefix in ["Lv", "ThinPool", "CachePool", "VdoPool", "HiddenLv"] {
        let objects = match get_existing_objects(&format!("{LVM_OBJ_PREFIX}/{prefix}")) {
            Ok(objects) => objects,
            // not all object kinds exist on all lvmdbusd versions
            Err(_) => continue,
        };
        for obj_path in objects {
            let props = get_object_properties(&obj_path, LV_CMN_INTF)?;
            let mut data = lv_from_props(&props, &DbusResolver)?;
            if let Some(vg_name) = vg_name {
                if data.vg_name != vg_name {
                    continue;
                }
            }
            if tree {
                fill_lv_tree(&mut data, &obj_path, &DbusResolver);
            }
            result.push(data);
        }
    }
    Ok(result)
}

/// Information about all LVs (in `vg_name`, or everywhere).
pub fn lvs(vg_name: Option<&str>) -> Result<Vec<LvData>, LvmError> {
    lvs_impl(vg_name, false)
}

/// Like [`lvs`] but with pool internals and segments resolved.
pub fn lvs_tree(vg_name: Option<&str>) -> Result<Vec<LvData>, LvmError> {
    lvs_impl(vg_name, true)
}

/// lvrepair is not expressible over the LVM D-Bus API.
pub fn lv_repair(
    _vg_name: &str,
    _lv_name: &str,
    _pv_list: &[&Utf8Path],
    _extra: &[ExtraArg],
) -> Result<(), LvmError> {
    Err(LvmError::TechUnavail(
        "lvrepair is not supported by this implementation.".to_string(),
    ))
}

/// The roles of an LV, read from its common interface.
pub fn lv_roles(vg_name: &str, lv_name: &str) -> Result<Vec<String>, LvmError> {
    let props = get_lvm_object_properties(&format!("{vg_name}/{lv_name}"), LV_CMN_INTF)?;
    Ok(prop_strv(&props, "Roles"))
}

//! Volume group operations.

use camino::Utf8Path;

use blockdev_utils::ExtraArg;

use crate::conn::{
    call_lvm_method_sync, call_lvm_obj_method_sync, extra_str, get_existing_objects,
    get_lvm_object_properties, get_object_path, get_object_properties, CallConfig, Param,
};
use crate::props::{vg_from_props, VgData};
use crate::sizes::{size_str_param, DEFAULT_PE_SIZE};
use crate::{LvmError, LVM_OBJ_PREFIX, MANAGER_INTF, MANAGER_OBJ, VG_INTF};

/// Create a volume group named `name` from the given PVs, with the given
/// physical extent size (0 selects the 4 MiB default).
pub fn vg_create(
    name: &str,
    pv_list: &[&Utf8Path],
    pe_size: u64,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    let mut pvs = Vec::with_capacity(pv_list.len());
    for pv in pv_list {
        pvs.push(get_object_path(pv.as_str())?);
    }

    let pe_size = if pe_size == 0 { DEFAULT_PE_SIZE } else { pe_size };
    let extra_params = vec![extra_str(
        "--physicalextentsize",
        &size_str_param(pe_size),
    )];

    call_lvm_method_sync(
        MANAGER_OBJ,
        MANAGER_INTF,
        "VgCreate",
        vec![Param::Str(name.to_string()), Param::ObjPathArray(pvs)],
        extra_params,
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Remove the VG named `vg_name`.
pub fn vg_remove(vg_name: &str, extra: &[ExtraArg]) -> Result<(), LvmError> {
    call_lvm_obj_method_sync(
        vg_name,
        VG_INTF,
        "Remove",
        Vec::new(),
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Rename the VG `old_vg_name` to `new_vg_name`.
pub fn vg_rename(old_vg_name: &str, new_vg_name: &str, extra: &[ExtraArg]) -> Result<(), LvmError> {
    call_lvm_obj_method_sync(
        old_vg_name,
        VG_INTF,
        "Rename",
        vec![Param::Str(new_vg_name.to_string())],
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Activate the VG and its LVs.
pub fn vg_activate(vg_name: &str, extra: &[ExtraArg]) -> Result<(), LvmError> {
    call_lvm_obj_method_sync(
        vg_name,
        VG_INTF,
        "Activate",
        vec![Param::U64(0)],
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Deactivate the VG and its LVs.
pub fn vg_deactivate(vg_name: &str, extra: &[ExtraArg]) -> Result<(), LvmError> {
    call_lvm_obj_method_sync(
        vg_name,
        VG_INTF,
        "Deactivate",
        vec![Param::U64(0)],
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Add the PV on `device` to the VG.
pub fn vg_extend(vg_name: &str, device: &Utf8Path, extra: &[ExtraArg]) -> Result<(), LvmError> {
    let pv = get_object_path(device.as_str())?;
    call_lvm_obj_method_sync(
        vg_name,
        VG_INTF,
        "Extend",
        vec![Param::ObjPathArray(vec![pv])],
        Vec::new(),
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Remove the PV on `device` from the VG, or reduce the VG of its missing
/// PVs when `device` is `None`.
///
/// Note: extents are not moved off of the PV first; do that with
/// [`crate::pv_move`].
pub fn vg_reduce(
    vg_name: &str,
    device: Option<&Utf8Path>,
    extra: &[ExtraArg],
) -> Result<(), LvmError> {
    match device {
        Some(device) => {
            let pv = get_object_path(device.as_str())?;
            call_lvm_obj_method_sync(
                vg_name,
                VG_INTF,
                "Reduce",
                vec![Param::Bool(false), Param::ObjPathArray(vec![pv])],
                Vec::new(),
                extra,
                CallConfig::Global,
            )?;
        }
        None => {
            // no PV given: remove the missing ones
            let extra_params = vec![extra_str("--force", "")];
            call_lvm_obj_method_sync(
                vg_name,
                VG_INTF,
                "Reduce",
                vec![Param::Bool(true), Param::ObjPathArray(Vec::new())],
                extra_params,
                extra,
                CallConfig::Global,
            )?;
        }
    }
    Ok(())
}

fn vglock_start_stop(vg_name: &str, start: bool, extra: &[ExtraArg]) -> Result<(), LvmError> {
    let extra_params = vec![extra_str(if start { "--lockstart" } else { "--lockstop" }, "")];
    call_lvm_obj_method_sync(
        vg_name,
        VG_INTF,
        "Change",
        Vec::new(),
        extra_params,
        extra,
        CallConfig::Global,
    )?;
    Ok(())
}

/// Start the lockspace of a shared VG (see vgchange(8) --lockstart).
pub fn vg_lock_start(vg_name: &str, extra: &[ExtraArg]) -> Result<(), LvmError> {
    vglock_start_stop(vg_name, true, extra)
}

/// Stop the lockspace of a shared VG.
pub fn vg_lock_stop(vg_name: &str, extra: &[ExtraArg]) -> Result<(), LvmError> {
    vglock_start_stop(vg_name, false, extra)
}

/// Add `tags` to the VG.
pub fn add_vg_tags(vg_name: &str, tags: &[String]) -> Result<(), LvmError> {
    call_lvm_obj_method_sync(
        vg_name,
        VG_INTF,
        "TagsAdd",
        vec![Param::StrArray(tags.to_vec())],
        Vec::new(),
        &[],
        CallConfig::Global,
    )?;
    Ok(())
}

/// Remove `tags` from the VG.
pub fn delete_vg_tags(vg_name: &str, tags: &[String]) -> Result<(), LvmError> {
    call_lvm_obj_method_sync(
        vg_name,
        VG_INTF,
        "TagsDel",
        vec![Param::StrArray(tags.to_vec())],
        Vec::new(),
        &[],
        CallConfig::Global,
    )?;
    Ok(())
}

/// Information about the VG named `vg_name`.
pub fn vg_info(vg_name: &str) -> Result<VgData, LvmError> {
    let props = get_lvm_object_properties(vg_name, VG_INTF)?;
    vg_from_props(&props)
}

/// Information about all VGs in the system.
pub fn vgs() -> Result<Vec<VgData>, LvmError> {
    let mut result = Vec::new();
    for obj_path in get_existing_objects(&format!("{LVM_OBJ_PREFIX}/Vg"))? {
        let props = get_object_properties(&obj_path, VG_INTF)?;
        result.push(vg_from_props(&props)?);
    }
    Ok(result)
}

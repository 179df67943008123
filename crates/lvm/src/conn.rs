//! The D-Bus call machinery shared by all LVM operations.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use dbus::arg::{ArgType, IterAppend, PropMap, RefArg, Variant};
use dbus::blocking::stdintf::org_freedesktop_dbus::Properties;
use dbus::blocking::Connection;
use dbus::Message;

use blockdev_utils::{
    get_next_task_id, log_task_status, report_finished, report_progress, report_started, ExtraArg,
};

use crate::config::lock_config;
use crate::{LvmError, JOB_INTF, LVM_BUS_NAME, MANAGER_INTF, MANAGER_OBJ};

/// Per-call transport timeout; long operations exceed it by spawning a Job.
pub(crate) const METHOD_CALL_TIMEOUT: Duration = Duration::from_secs(5);
/// Delay between job progress samples.
const PROGRESS_WAIT: Duration = Duration::from_millis(500);

static BUS: Mutex<Option<Connection>> = Mutex::new(None);

/// Run `f` with the (lazily created) system bus connection.
pub(crate) fn with_conn<T>(
    f: impl FnOnce(&Connection) -> Result<T, LvmError>,
) -> Result<T, LvmError> {
    let mut guard = BUS.lock().unwrap_or_else(|e| e.into_inner());
    match &*guard {
        Some(conn) => f(conn),
        None => {
            let conn = Connection::new_system().map_err(|e| {
                LvmError::Fail(format!("Failed to connect to the system bus: {e}"))
            })?;
            let r = f(&conn);
            *guard = Some(conn);
            r
        }
    }
}

/// One positional parameter of an LVM method call.
#[derive(Debug, Clone)]
pub(crate) enum Param {
    Str(String),
    U64(u64),
    Bool(bool),
    ObjPath(String),
    /// `ao`
    ObjPathArray(Vec<String>),
    /// `as`
    StrArray(Vec<String>),
    /// `(tt)`
    Range(u64, u64),
    /// `a(ott)` PV specifications with extent ranges
    PvRanges(Vec<(String, u64, u64)>),
    /// `a(ii)` (major, minor) pairs
    MajMinArray(Vec<(i32, i32)>),
}

impl Param {
    fn append(&self, ia: &mut IterAppend) {
        match self {
            Param::Str(s) => ia.append(s.as_str()),
            Param::U64(v) => ia.append(*v),
            Param::Bool(b) => ia.append(*b),
            Param::ObjPath(p) => ia.append(dbus::Path::from(p.clone())),
            Param::ObjPathArray(paths) => {
                let paths: Vec<dbus::Path> =
                    paths.iter().map(|p| dbus::Path::from(p.clone())).collect();
                ia.append(paths);
            }
            Param::StrArray(strings) => ia.append(strings.clone()),
            Param::Range(start, end) => ia.append((*start, *end)),
            Param::PvRanges(ranges) => {
                let ranges: Vec<(dbus::Path, u64, u64)> = ranges
                    .iter()
                    .map(|(p, s, e)| (dbus::Path::from(p.clone()), *s, *e))
                    .collect();
                ia.append(ranges);
            }
            Param::MajMinArray(pairs) => ia.append(pairs.clone()),
        }
    }
}

/// A `{sv}` option dictionary for a method call.
pub(crate) type ExtraParams = Vec<(String, Box<dyn RefArg>)>;

pub(crate) fn extra_str(key: &str, value: &str) -> (String, Box<dyn RefArg>) {
    (key.to_string(), Box::new(value.to_string()))
}

pub(crate) fn extra_i32(key: &str, value: i32) -> (String, Box<dyn RefArg>) {
    (key.to_string(), Box::new(value))
}

/// Fold per-call extras, user extra args and the global config/devices
/// overrides into the final `a{sv}` dictionary. The config mutex must be
/// held by the caller.
fn build_option_dict(
    extra_params: ExtraParams,
    extra_args: &[ExtraArg],
    global_config: Option<&str>,
    devices_filter: Option<&str>,
) -> PropMap {
    let mut dict: PropMap = HashMap::new();
    for (key, value) in extra_params {
        dict.insert(key, Variant(value));
    }
    for arg in extra_args {
        dict.insert(
            arg.opt.clone(),
            Variant(Box::new(arg.val.clone()) as Box<dyn RefArg>),
        );
    }
    if let Some(config) = global_config {
        dict.insert(
            "--config".to_string(),
            Variant(Box::new(config.to_string()) as Box<dyn RefArg>),
        );
    }
    if let Some(devices) = devices_filter {
        dict.insert(
            "--devices".to_string(),
            Variant(Box::new(devices.to_string()) as Box<dyn RefArg>),
        );
    }
    dict
}

/// Decode a method reply into `(result_path, job_path)`; `/` paths are
/// mapped to `None`.
fn parse_reply(reply: &Message) -> Result<(Option<String>, Option<String>), LvmError> {
    let non_root = |p: dbus::Path| {
        let p = p.to_string();
        (p != "/").then_some(p)
    };
    let mut iter = reply.iter_init();
    match iter.arg_type() {
        // ((oo)): a pair of (result object path, job path)
        ArgType::Struct => {
            let mut sub = iter
                .recurse(ArgType::Struct)
                .ok_or_else(|| LvmError::Parse("Failed to parse the returned value!".to_string()))?;
            let result: dbus::Path = sub
                .read()
                .map_err(|_| LvmError::Parse("Failed to parse the returned value!".to_string()))?;
            let job: dbus::Path = sub
                .read()
                .map_err(|_| LvmError::Parse("Failed to parse the returned value!".to_string()))?;
            Ok((non_root(result), non_root(job)))
        }
        // (o): either a job to wait for or no result at all
        ArgType::ObjectPath => {
            let path: dbus::Path = iter
                .read()
                .map_err(|_| LvmError::Parse("Failed to parse the returned value!".to_string()))?;
            Ok((None, non_root(path)))
        }
        _ => Err(LvmError::Parse(
            "Failed to parse the returned value!".to_string(),
        )),
    }
}

/// Read one property as a boxed variant value. All typed accessors go
/// through this so the decoding works uniformly for every D-Bus type.
fn get_property_value(
    obj_path: &str,
    iface: &str,
    property: &str,
) -> Result<Box<dyn RefArg>, LvmError> {
    with_conn(|conn| {
        let proxy = conn.with_proxy(LVM_BUS_NAME, obj_path, METHOD_CALL_TIMEOUT);
        let (variant,): (Variant<Box<dyn RefArg>>,) = proxy
            .method_call(
                "org.freedesktop.DBus.Properties",
                "Get",
                (iface, property),
            )
            .map_err(|e| {
                LvmError::Fail(format!(
                    "Failed to get {property} property of the {obj_path} object: {e}"
                ))
            })?;
        Ok(variant.0)
    })
}

/// Poll `job_path` until completion, forwarding percentages to the
/// progress reporter. Returns the job's result object path, if any. The
/// job object is removed afterwards.
fn wait_for_job(
    obj: &str,
    method: &str,
    job_path: &str,
    task_id: u64,
    progress_id: u64,
) -> Result<Option<String>, LvmError> {
    log_task_status(task_id, &format!("Waiting for job '{job_path}' to finish"));

    loop {
        std::thread::sleep(PROGRESS_WAIT);
        let complete = get_property_value(job_path, JOB_INTF, "Complete")
            .map_err(|e| {
                LvmError::Fail(format!(
                    "Waiting for '{method}' method of the '{obj}' object to finish failed: {e}"
                ))
            })?
            .as_i64()
            .unwrap_or(0)
            != 0;
        if complete {
            break;
        }
        match get_property_value(job_path, JOB_INTF, "Percent") {
            Ok(percent) => {
                report_progress(progress_id, percent.as_f64().unwrap_or(0.0) as u8, None)
            }
            Err(e) => tracing::debug!("Got error when getting progress: {e}"),
        }
        log_task_status(task_id, &format!("Still waiting for job '{job_path}' to finish"));
    }
    log_task_status(task_id, &format!("Job '{job_path}' finished"));

    let result = get_property_value(job_path, JOB_INTF, "Result")
        .map_err(|e| {
            LvmError::Fail(format!(
                "Getting result after waiting for '{method}' method of the '{obj}' object \
                 failed: {e}"
            ))
        })?
        .as_str()
        .unwrap_or("/")
        .to_string();

    let outcome = if result != "/" {
        log_task_status(task_id, &format!("Got result: {result}"));
        Ok(Some(result))
    } else {
        // GetError is an (i, s) pair
        let error = get_property_value(job_path, JOB_INTF, "GetError")?;
        let (code, message) = match error.as_iter() {
            Some(mut fields) => (
                fields.next().and_then(|f| f.as_i64()).unwrap_or(0),
                fields
                    .next()
                    .and_then(|f| f.as_str())
                    .unwrap_or("")
                    .to_string(),
            ),
            None => (0, String::new()),
        };
        if code != 0 {
            log_task_status(task_id, &format!("Got error: {message}"));
            Err(LvmError::Fail(format!(
                "Running '{method}' method on the '{obj}' object failed: {message}"
            )))
        } else {
            log_task_status(task_id, "No result");
            Ok(None)
        }
    };

    // remove the job object and clean after ourselves
    remove_job(job_path);
    outcome
}

fn remove_job(job_path: &str) {
    let r = with_conn(|conn| {
        let proxy = conn.with_proxy(LVM_BUS_NAME, job_path, METHOD_CALL_TIMEOUT);
        proxy
            .method_call::<(), _, _, _>(JOB_INTF, "Remove", ())
            .map_err(LvmError::from)
    });
    if let Err(e) = r {
        tracing::debug!("Failed to remove job object {job_path}: {e}");
    }
}

/// How a call picks up the `--config`/`--devices` overrides.
pub(crate) enum CallConfig {
    /// Hold the config mutex while the call is assembled and issued and
    /// use the process-wide overrides.
    Global,
    /// The caller already holds the config mutex and supplies the
    /// (possibly amended) override values itself.
    Override {
        global_config: Option<String>,
        devices_filter: Option<String>,
    },
}

/// Call an LVM method and wait for its completion (polling the Job object
/// if one is spawned). Returns the result object path when the method
/// produces one.
pub(crate) fn call_lvm_method_sync(
    obj: &str,
    intf: &str,
    method: &str,
    params: Vec<Param>,
    extra_params: ExtraParams,
    extra_args: &[ExtraArg],
    call_config: CallConfig,
) -> Result<Option<String>, LvmError> {
    crate::avail::check_service_available()?;

    let task_id = get_next_task_id();

    // don't allow global config string changes during the run
    let reply = {
        let (config_guard, global_config, devices_filter) = match call_config {
            CallConfig::Global => {
                let guard = lock_config();
                let config = guard.global_config.clone();
                let devices = guard.devices_filter.clone();
                (Some(guard), config, devices)
            }
            CallConfig::Override {
                global_config,
                devices_filter,
            } => (None, global_config, devices_filter),
        };
        let _config_guard = config_guard;

        let mut msg = Message::new_method_call(LVM_BUS_NAME, obj, intf, method)
            .map_err(|e| LvmError::Invalid(format!("Invalid method call target: {e}")))?;
        {
            let mut ia = IterAppend::new(&mut msg);
            for param in &params {
                param.append(&mut ia);
            }
            // the in-daemon timeout spec (in seconds)
            ia.append(1i32);
            ia.append(build_option_dict(
                extra_params,
                extra_args,
                global_config.as_deref(),
                devices_filter.as_deref(),
            ));
        }

        log_task_status(
            task_id,
            &format!("Calling the '{intf}.{method}' method on the '{obj}' object"),
        );

        with_conn(|conn| {
            conn.channel()
                .send_with_reply_and_block(msg, METHOD_CALL_TIMEOUT)
                .map_err(|e| {
                    LvmError::Fail(format!(
                        "Failed to call the '{method}' method on the '{obj}' object: {e}"
                    ))
                })
        })
    };

    let progress_id = report_started(&format!(
        "Started the '{intf}.{method}' method on the '{obj}' object"
    ));

    let reply = match reply {
        Ok(reply) => reply,
        Err(e) => {
            log_task_status(task_id, &format!("Got error: {e}"));
            report_finished(progress_id, &e.to_string());
            return Err(e);
        }
    };

    let parsed = parse_reply(&reply);
    let r = match parsed {
        Ok((Some(result), job)) => {
            log_task_status(task_id, &format!("Got result: {result}"));
            if let Some(job) = job {
                remove_job(&job);
            }
            Ok(Some(result))
        }
        Ok((None, Some(job))) => wait_for_job(obj, method, &job, task_id, progress_id),
        Ok((None, None)) => {
            log_task_status(task_id, "No result, no job started");
            Ok(None)
        }
        Err(e) => Err(e),
    };

    match &r {
        Ok(_) => report_finished(progress_id, "Completed"),
        Err(e) => report_finished(progress_id, &e.to_string()),
    }
    r
}

/// Look up the object path for an LVM id (`vgname/lvname`, a PV device
/// path or a VG name).
pub(crate) fn get_object_path(obj_id: &str) -> Result<String, LvmError> {
    let path = with_conn(|conn| {
        let proxy = conn.with_proxy(LVM_BUS_NAME, MANAGER_OBJ, METHOD_CALL_TIMEOUT);
        let (path,): (String,) = proxy
            .method_call(MANAGER_INTF, "LookUpByLvmId", (obj_id,))
            .map_err(LvmError::from)?;
        Ok(path)
    })?;
    if path == "/" {
        return Err(LvmError::NoExist(format!(
            "The object with LVM ID '{obj_id}' doesn't exist"
        )));
    }
    Ok(path)
}

/// All properties of `iface` on the object at `obj_path`.
pub(crate) fn get_object_properties(obj_path: &str, iface: &str) -> Result<PropMap, LvmError> {
    with_conn(|conn| {
        let proxy = conn.with_proxy(LVM_BUS_NAME, obj_path, METHOD_CALL_TIMEOUT);
        proxy.get_all(iface).map_err(|e| {
            LvmError::Fail(format!(
                "Failed to get properties of the {obj_path} object: {e}"
            ))
        })
    })
}

/// All properties of `iface` on the object with LVM id `obj_id`.
pub(crate) fn get_lvm_object_properties(obj_id: &str, iface: &str) -> Result<PropMap, LvmError> {
    let obj_path = get_object_path(obj_id)?;
    get_object_properties(&obj_path, iface)
}

/// One property, as a boxed variant value.
pub(crate) fn get_object_property(
    obj_path: &str,
    iface: &str,
    property: &str,
) -> Result<Box<dyn RefArg>, LvmError> {
    get_property_value(obj_path, iface, property)
}

/// Convenience: call a method on the object with LVM id `obj_id`.
pub(crate) fn call_lvm_obj_method_sync(
    obj_id: &str,
    intf: &str,
    method: &str,
    params: Vec<Param>,
    extra_params: ExtraParams,
    extra_args: &[ExtraArg],
    call_config: CallConfig,
) -> Result<Option<String>, LvmError> {
    let obj_path = get_object_path(obj_id)?;
    call_lvm_method_sync(
        &obj_path,
        intf,
        method,
        params,
        extra_params,
        extra_args,
        call_config,
    )
}

/// Call a method on a `vgname/lvname` object via the given interface.
pub(crate) fn call_lv_method_sync(
    vg_name: &str,
    lv_name: &str,
    intf: &str,
    method: &str,
    params: Vec<Param>,
    extra_params: ExtraParams,
    extra_args: &[ExtraArg],
) -> Result<Option<String>, LvmError> {
    call_lvm_obj_method_sync(
        &format!("{vg_name}/{lv_name}"),
        intf,
        method,
        params,
        extra_params,
        extra_args,
        CallConfig::Global,
    )
}

/// Enumerate the children of `obj_prefix` (e.g. all PV objects) via D-Bus
/// introspection.
pub(crate) fn get_existing_objects(obj_prefix: &str) -> Result<Vec<String>, LvmError> {
    let xml = with_conn(|conn| {
        let proxy = conn.with_proxy(LVM_BUS_NAME, obj_prefix, METHOD_CALL_TIMEOUT);
        let (xml,): (String,) = proxy
            .method_call("org.freedesktop.DBus.Introspectable", "Introspect", ())
            .map_err(LvmError::from)?;
        Ok(xml)
    })?;
    Ok(parse_introspection_nodes(&xml)
        .into_iter()
        .map(|node| format!("{obj_prefix}/{node}"))
        .collect())
}

/// Extract child node names from introspection XML. A full XML parser
/// would be overkill for the fixed shape lvmdbusd emits.
fn parse_introspection_nodes(xml: &str) -> Vec<String> {
    let mut nodes = Vec::new();
    for part in xml.split("<node name=\"").skip(1) {
        if let Some(end) = part.find('"') {
            nodes.push(part[..end].to_string());
        }
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_introspection_nodes() {
        let xml = r#"
            <!DOCTYPE node PUBLIC "-//freedesktop//DTD D-BUS Object Introspection 1.0//EN">
            <node>
              <node name="0"/>
              <node name="1"/>
              <node name="2"/>
            </node>
        "#;
        assert_eq!(parse_introspection_nodes(xml), ["0", "1", "2"]);
        assert!(parse_introspection_nodes("<node></node>").is_empty());
    }

    #[test]
    fn test_build_option_dict() {
        let dict = build_option_dict(
            vec![extra_str("poolmetadatasize", "64b")],
            &[ExtraArg::new("--profile", "thin-performance")],
            Some("allocation { }"),
            Some("/dev/sda,/dev/sdb"),
        );
        assert_eq!(dict.len(), 4);
        assert_eq!(
            dict.get("--config").and_then(|v| v.0.as_str()),
            Some("allocation { }")
        );
        assert_eq!(
            dict.get("--devices").and_then(|v| v.0.as_str()),
            Some("/dev/sda,/dev/sdb")
        );
        assert_eq!(
            dict.get("poolmetadatasize").and_then(|v| v.0.as_str()),
            Some("64b")
        );
    }
}

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// A runtime dependency on an external utility, optionally with a minimum
/// version. `version_arg` is the argument that makes the tool print its
/// version and `version_regex` extracts the version string from that output.
#[derive(Debug, Clone, Copy)]
pub struct UtilDep {
    pub name: &'static str,
    pub version: Option<&'static str>,
    pub version_arg: Option<&'static str>,
    pub version_regex: Option<&'static str>,
}

impl UtilDep {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            version: None,
            version_arg: None,
            version_regex: None,
        }
    }

    pub const fn with_version(
        name: &'static str,
        version: &'static str,
        version_arg: &'static str,
        version_regex: &'static str,
    ) -> Self {
        Self {
            name,
            version: Some(version),
            version_arg: Some(version_arg),
            version_regex: Some(version_regex),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DepError {
    #[error("The '{0}' utility is not available")]
    MissingUtil(String),
    #[error("Too low version of {util}: {found}. At least {required} required.")]
    LowVersion {
        util: String,
        found: String,
        required: String,
    },
    #[error("Failed to determine the version of '{util}'")]
    UnknownVersion { util: String },
}

impl DepError {
    /// The utility the error relates to.
    pub fn util(&self) -> &str {
        match self {
            DepError::MissingUtil(util)
            | DepError::LowVersion { util, .. }
            | DepError::UnknownVersion { util } => util,
        }
    }
}

/// Cached availability bitmask for one module's utility dependencies.
/// Bits are populated on first check and read lock-free afterwards.
pub struct DepsCache {
    avail: AtomicU32,
    lock: Mutex<()>,
}

impl DepsCache {
    pub const fn new() -> Self {
        Self {
            avail: AtomicU32::new(0),
            lock: Mutex::new(()),
        }
    }
}

impl Default for DepsCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Compare two dotted version strings component-wise.
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.')
            .map(|c| {
                c.chars()
                    .take_while(|ch| ch.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };
    let (va, vb) = (parse(a), parse(b));
    let len = va.len().max(vb.len());
    for i in 0..len {
        let (ca, cb) = (va.get(i).copied().unwrap_or(0), vb.get(i).copied().unwrap_or(0));
        match ca.cmp(&cb) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

/// Extract a version string from tool output using `regex`.
fn extract_version(output: &str, regex: &str) -> Option<String> {
    let re = regex::Regex::new(regex).ok()?;
    for line in output.lines() {
        if let Some(caps) = re.captures(line) {
            if let Some(m) = caps.get(1) {
                return Some(m.as_str().to_string());
            }
        }
    }
    None
}

/// Check that `name` exists in PATH and, when a minimum `version` is given,
/// that the installed version is at least that.
pub fn check_util_version(
    name: &str,
    version: Option<&str>,
    version_arg: Option<&str>,
    version_regex: Option<&str>,
) -> Result<(), DepError> {
    if which::which(name).is_err() {
        return Err(DepError::MissingUtil(name.to_string()));
    }
    let Some(required) = version else {
        return Ok(());
    };

    let output = Command::new(name)
        .args(version_arg)
        .stdin(Stdio::null())
        .output()
        .map_err(|_| DepError::UnknownVersion {
            util: name.to_string(),
        })?;
    // Some tools print their version to stderr.
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    let found = match version_regex {
        Some(re) => extract_version(&text, re),
        None => text.split_whitespace().next_back().map(|s| s.to_string()),
    }
    .ok_or_else(|| DepError::UnknownVersion {
        util: name.to_string(),
    })?;

    if compare_versions(&found, required) == std::cmp::Ordering::Less {
        return Err(DepError::LowVersion {
            util: name.to_string(),
            found,
            required: required.to_string(),
        });
    }
    tracing::trace!("utility '{name}' version {found} satisfies >= {required}");
    Ok(())
}

/// Verify that all dependencies selected by the `required` bitmask are
/// available, using (and populating) the per-module `cache`.
pub fn check_deps(cache: &DepsCache, required: u32, deps: &[UtilDep]) -> Result<(), DepError> {
    if cache.avail.load(Ordering::Acquire) & required == required {
        return Ok(());
    }
    let _guard = cache.lock.lock().unwrap_or_else(|e| e.into_inner());
    for (i, dep) in deps.iter().enumerate() {
        let mask = 1u32 << i;
        if required & mask == 0 || cache.avail.load(Ordering::Acquire) & mask != 0 {
            continue;
        }
        check_util_version(dep.name, dep.version, dep.version_arg, dep.version_regex)?;
        cache.avail.fetch_or(mask, Ordering::Release);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_versions() {
        use std::cmp::Ordering::*;
        assert_eq!(compare_versions("1.11.0", "1.11.0"), Equal);
        assert_eq!(compare_versions("1.10.9", "1.11.0"), Less);
        assert_eq!(compare_versions("1.12", "1.11.0"), Greater);
        assert_eq!(compare_versions("2.02.116", "2.03.19"), Less);
        assert_eq!(compare_versions("2.03.19", "2.03"), Greater);
    }

    #[test]
    fn test_extract_version() {
        let out = "fsck.f2fs 1.14.0 (2021-01-04)";
        assert_eq!(
            extract_version(out, r"fsck.f2fs\s+([\d\.]+).+").as_deref(),
            Some("1.14.0")
        );
        let out = "  LVM version:     2.03.11(2) (2021-01-08)";
        assert_eq!(
            extract_version(out, r"LVM version:\s+([\d\.]+)").as_deref(),
            Some("2.03.11")
        );
        assert_eq!(extract_version("nonsense", r"version ([\d\.]+)"), None);
    }

    #[test]
    fn test_check_deps_missing_tool() {
        static DEPS: &[UtilDep] = &[UtilDep::new("definitely-not-a-real-tool-42")];
        let cache = DepsCache::new();
        let err = check_deps(&cache, 1 << 0, DEPS).unwrap_err();
        assert_eq!(err.util(), "definitely-not-a-real-tool-42");
    }

    #[test]
    fn test_check_deps_caches() {
        // `sh` is everywhere; a second check must hit the cached bit.
        static DEPS: &[UtilDep] = &[UtilDep::new("sh")];
        let cache = DepsCache::new();
        check_deps(&cache, 1 << 0, DEPS).unwrap();
        assert_eq!(cache.avail.load(Ordering::Relaxed) & 1, 1);
        check_deps(&cache, 1 << 0, DEPS).unwrap();
    }
}

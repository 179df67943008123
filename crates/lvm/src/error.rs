use blockdev_utils::{DepError, ExecError};

/// Errors reported by LVM operations. The variants are stable kinds;
/// messages carry the object and method context.
#[derive(Debug, thiserror::Error)]
pub enum LvmError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Fail(String),
    #[error("{0}")]
    NoExist(String),
    #[error("{0}")]
    NotSupported(String),
    #[error("{0}")]
    TechUnavail(String),
    #[error("{0}")]
    CacheInvalid(String),
    #[error("{0}")]
    CacheNoCache(String),
    #[error("{0}")]
    VdoPolicyInvalid(String),
    #[error("{0}")]
    NotRoot(String),
    #[error("{0}")]
    DmError(String),
    #[error("{0}")]
    DevicesDisabled(String),
}

impl From<ExecError> for LvmError {
    fn from(e: ExecError) -> Self {
        LvmError::Fail(e.to_string())
    }
}

impl From<DepError> for LvmError {
    fn from(e: DepError) -> Self {
        LvmError::TechUnavail(e.to_string())
    }
}

impl From<dbus::Error> for LvmError {
    fn from(e: dbus::Error) -> Self {
        LvmError::Fail(e.to_string())
    }
}

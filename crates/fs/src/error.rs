use blockdev_mount::MountError;
use blockdev_probe::ProbeError;
use blockdev_utils::{DepError, ExecError};

/// Errors reported by filesystem operations. The variants are stable kinds;
/// messages carry the device and operation context.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Fail(String),
    #[error("{0}")]
    NoFilesystem(String),
    #[error("{0}")]
    Pipe(String),
    #[error("{0}")]
    UnmountFail(String),
    #[error("{0}")]
    NotSupported(String),
    #[error("{0}")]
    NotMounted(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    TechUnavail(String),
    #[error("{0}")]
    LabelInvalid(String),
    #[error("{0}")]
    UuidInvalid(String),
}

impl From<ExecError> for FsError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Spawn { .. } => FsError::Pipe(e.to_string()),
            ExecError::Failed { .. } | ExecError::NonUtf8 { .. } => FsError::Fail(e.to_string()),
        }
    }
}

impl From<DepError> for FsError {
    fn from(e: DepError) -> Self {
        FsError::TechUnavail(e.to_string())
    }
}

impl From<ProbeError> for FsError {
    fn from(e: ProbeError) -> Self {
        match e {
            ProbeError::Fail(m) => FsError::Fail(m),
            ProbeError::Invalid(m) => FsError::Invalid(m),
            ProbeError::NoFilesystem(m) => FsError::NoFilesystem(m),
            ProbeError::Parse(m) => FsError::Parse(m),
            ProbeError::Exec(e) => e.into(),
        }
    }
}

impl From<MountError> for FsError {
    fn from(e: MountError) -> Self {
        match e {
            MountError::Fail(m) => FsError::Fail(m),
            MountError::Invalid(m) => FsError::Invalid(m),
            MountError::Auth(m) => FsError::Auth(m),
            MountError::NotMounted(m) => FsError::NotMounted(m),
            MountError::Parse(m) => FsError::Parse(m),
            MountError::Exec(e) => e.into(),
        }
    }
}

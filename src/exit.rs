use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Usage,
    ParseFailed,
    DataInvalid,
    IoFailed,
    Failed,
}

impl ExitCode {
    pub const fn as_i32(self) -> i32 {
        match self {
            ExitCode::Usage => 1,
            ExitCode::ParseFailed => 10,
            ExitCode::DataInvalid => 11,
            ExitCode::IoFailed => 12,
            ExitCode::Failed => 20,
        }
    }
}

#[derive(Debug)]
pub struct ExitError {
    pub code: ExitCode,
    pub err: anyhow::Error,
}

impl ExitError {
    pub fn new(code: ExitCode, err: anyhow::Error) -> Self {
        Self { code, err }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.err.fmt(f)
    }
}

impl std::error::Error for ExitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.err.as_ref())
    }
}

pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(exit) = err.downcast_ref::<ExitError>() {
        return exit.code.as_i32();
    }
    ExitCode::Failed.as_i32()
}

pub fn usage(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::Usage, anyhow::anyhow!(message.into())).into()
}

pub fn usage_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::Usage, err).into()
}

pub fn parse_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::ParseFailed, err).into()
}

pub fn data_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::DataInvalid, err).into()
}

pub fn io_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::IoFailed, err).into()
}

//! Error taxonomy per distilled spec §7: Transport / Protocol / State /
//! Domain / Cancelled, aggregated into `CoreError` so `?` composes across
//! component boundaries without each component hand-rolling conversions.

use std::fmt;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("end of stream")]
    Eof,
    #[error("i/o error: {0}")]
    Io(String),
    #[error("timed out")]
    TimedOut,
    #[error("interrupted")]
    Interrupted,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported")]
    Unsupported,
    #[error("stub error E{0:02x}: {1}")]
    StubError(u8, String),
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("unexpected reply kind: expected {expected}, got {got}")]
    UnexpectedReplyKind { expected: String, got: String },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("wrong process state: expected one of {expected:?}, was {actual}")]
    WrongProcessState {
        expected: Vec<String>,
        actual: String,
    },
    #[error("invalid handle")]
    InvalidHandle,
    #[error("invalid address: {0:#x}")]
    InvalidAddress(u64),
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainErrorKind {
    HardwareExhausted,
    SizeUnsupported,
    Permission,
    Other,
}

impl fmt::Display for DomainErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DomainErrorKind::HardwareExhausted => "hardware-exhausted",
            DomainErrorKind::SizeUnsupported => "size-unsupported",
            DomainErrorKind::Permission => "permission",
            DomainErrorKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("breakpoint install failed ({kind}): {detail}")]
    BreakpointInstallFailed {
        kind: DomainErrorKind,
        detail: String,
    },
    #[error("watchpoint install failed ({kind}): {detail}")]
    WatchpointInstallFailed {
        kind: DomainErrorKind,
        detail: String,
    },
    #[error("allocate failed: {0}")]
    AllocateFailed(String),
    #[error("memory read/write failed at {addr:#x}: {detail} ({bytes_done} of {bytes_requested} bytes done)")]
    MemoryFailed {
        addr: u64,
        detail: String,
        bytes_done: usize,
        bytes_requested: usize,
    },
    #[error("invalid target for operation")]
    InvalidTarget,
    #[error("invalid process for operation")]
    InvalidProcess,
    #[error("invalid thread {0} for operation")]
    InvalidThread(u64),
    #[error("invalid frame {0} for operation")]
    InvalidFrame(u32),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("operation cancelled")]
    Cancelled,
}

pub type CoreResult<T> = Result<T, CoreError>;

/// A user-visible result: operations return a status plus an append-only
/// diagnostic stream, per §7 "User-visible failure" — both success and
/// failure carry text suitable for direct display.
#[derive(Debug, Clone)]
pub struct OperationOutcome<T> {
    pub result: Result<T, CoreError>,
    pub diagnostics: Vec<String>,
}

impl<T> OperationOutcome<T> {
    pub fn ok(value: T) -> Self {
        OperationOutcome {
            result: Ok(value),
            diagnostics: Vec::new(),
        }
    }

    pub fn err(error: CoreError) -> Self {
        OperationOutcome {
            result: Err(error),
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostic(mut self, line: impl Into<String>) -> Self {
        self.diagnostics.push(line.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn display(&self) -> String {
        let mut s = match &self.result {
            Ok(_) => "ok".to_string(),
            Err(e) => format!("error: {}", e),
        };
        for d in &self.diagnostics {
            s.push('\n');
            s.push_str(d);
        }
        s
    }
}

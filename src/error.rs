use std::fmt;
use std::io;
use thiserror::Error;

/// The bounded taxonomy callers branch on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// No Opal ioctls or no locking support; fall back to software encryption.
    Unsupported,
    /// Wrong key, PSID or owner. Retry with other credentials.
    Unauthorized,
    /// Bad parameters, protocol failure or a failed post-condition.
    Invalid,
    /// The block device could not be opened.
    Io,
    /// A secure buffer could not be allocated.
    ResourceExhausted,
}

/// One attribute of a locking range that does not read back as expected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Mismatch {
    Offset { actual: u64, expected: u64 },
    Length { actual: u64, expected: u64 },
    LockingDisabled { read_lock_enabled: bool, write_lock_enabled: bool },
    ReadLock { actual: bool, expected: bool },
    WriteLock { actual: bool, expected: bool },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Offset { actual, expected } => {
                write!(f, "offset {actual} does not match expected value {expected}")
            }
            Mismatch::Length { actual, expected } => {
                write!(f, "length {actual} does not match device length {expected}")
            }
            Mismatch::LockingDisabled { read_lock_enabled, write_lock_enabled } => write!(
                f,
                "locking is disabled (RLE={}, WLE={})",
                u8::from(*read_lock_enabled),
                u8::from(*write_lock_enabled)
            ),
            Mismatch::ReadLock { actual, .. } => {
                write!(f, "read lock is {}locked", if *actual { "" } else { "not " })
            }
            Mismatch::WriteLock { actual, .. } => {
                write!(f, "write lock is {}locked", if *actual { "" } else { "not " })
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum OpalError {
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Invalid(String),
    #[error("OPAL range {segment} does not match its configuration ({} mismatch(es))", .mismatches.len())]
    Mismatch { segment: u32, mismatches: Vec<Mismatch> },
    #[error("cannot open {device}: {source}")]
    Io {
        device: String,
        #[source]
        source: io::Error,
    },
    #[error("secure buffer allocation failed")]
    ResourceExhausted,
}

impl OpalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OpalError::Unsupported(_) => ErrorKind::Unsupported,
            OpalError::Unauthorized(_) => ErrorKind::Unauthorized,
            OpalError::Invalid(_) | OpalError::Mismatch { .. } => ErrorKind::Invalid,
            OpalError::Io { .. } => ErrorKind::Io,
            OpalError::ResourceExhausted => ErrorKind::ResourceExhausted,
        }
    }

    /// Whether retrying with different credentials can succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unauthorized
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        OpalError::Invalid(msg.into())
    }
}

pub type Result<T, E = OpalError> = core::result::Result<T, E>;

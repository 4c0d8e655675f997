//! Opal locking range lifecycle.
//!
//! Every public entry point opens its own control handle, so nothing about
//! the drive's security state is cached between calls.

mod lock;
mod query;
mod reset;
mod setup;
mod verify;

pub use lock::{lock, set_lock, unlock};
pub use query::{geometry, locking_enabled, status, supported, Geometry, StatusFlags};
pub use reset::{factory_reset, reset_segment};
pub use setup::{setup_range, SetupStep};
pub use verify::{verify, RangeAttributes, RangeExpectations};

use crate::device::{Drive, OpalControl};
use crate::error::{OpalError, Result};
use crate::ioctl::{opal_key, OPAL_INCLUDED};
use crate::status::{Status, StatusClass};
use log::debug;

/// Bytes per sector at the public boundary.
pub const SECTOR_SIZE: u64 = 512;

/// Longest key the kernel accepts; `opal_key.key_len` is a single byte.
pub const MAX_KEY_LEN: usize = u8::MAX as usize;

/// Locking ranges managed here. Range 0 is the global range and is never
/// handed out.
pub const FIRST_SEGMENT: u32 = 1;
pub const LAST_SEGMENT: u32 = 8;

// ───── Argument validation ───────────────────────────────────────────────────

fn check_key(what: &str, key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(OpalError::invalid(format!("empty {what}")));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(OpalError::invalid(format!(
            "{what} is {} bytes, at most {MAX_KEY_LEN} are supported",
            key.len()
        )));
    }
    Ok(())
}

fn check_segment(segment: u32) -> Result<()> {
    if !(FIRST_SEGMENT..=LAST_SEGMENT).contains(&segment) {
        return Err(OpalError::invalid(format!(
            "OPAL segment {segment} is outside {FIRST_SEGMENT}..={LAST_SEGMENT}"
        )));
    }
    Ok(())
}

/// Copy `key` into a kernel key block addressed at range `lr`.
///
/// Callers validate the key length first.
fn fill_key(dst: &mut opal_key, lr: u32, key: &[u8]) {
    let n = key.len().min(MAX_KEY_LEN);
    dst.lr = lr as u8;
    dst.key_type = OPAL_INCLUDED;
    dst.key_len = n as u8;
    dst.key[..n].copy_from_slice(&key[..n]);
}

// ───── Handles and status checks ─────────────────────────────────────────────

fn open<D: Drive + ?Sized>(drive: &D) -> Result<Box<dyn OpalControl + '_>> {
    drive.open().map_err(|source| OpalError::Io { device: drive.name(), source })
}

/// Check a protocol step. System errors mean the step could not be issued.
fn check(st: Status, what: &str, device: &str) -> Result<()> {
    match st.class() {
        StatusClass::Success => Ok(()),
        StatusClass::NotAuthorized => {
            debug!("Failed to {what} on OPAL device '{device}': permission denied");
            Err(OpalError::Unauthorized(format!("{what} on {device}: not authorized")))
        }
        StatusClass::Failed | StatusClass::System => {
            debug!("Failed to {what} on OPAL device '{device}': ({}) {st}", st.raw());
            Err(OpalError::invalid(format!("failed to {what} on {device}: {st}")))
        }
    }
}

/// Like [`check`], for the first call that opens a session: a system error
/// there means the kernel has no Opal support.
fn check_entry(st: Status, what: &str, device: &str) -> Result<()> {
    if st.class() == StatusClass::System {
        debug!("OPAL not supported on this kernel version, refusing ({st}).");
        return Err(OpalError::Unsupported(format!(
            "{device}: OPAL is not supported by this kernel ({st})"
        )));
    }
    check(st, what, device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_bounds() {
        assert!(check_key("key", b"k").is_ok());
        assert!(check_key("key", &[7u8; MAX_KEY_LEN]).is_ok());
        assert!(check_key("key", &[7u8; MAX_KEY_LEN + 1]).is_err());
        assert!(check_key("key", b"").is_err());
    }

    #[test]
    fn segment_bounds() {
        assert!(check_segment(0).is_err());
        assert!(check_segment(1).is_ok());
        assert!(check_segment(8).is_ok());
        assert!(check_segment(9).is_err());
    }

    #[test]
    fn fill_key_sets_length_and_range() {
        let mut k = opal_key::default();
        fill_key(&mut k, 3, b"secret");
        assert_eq!(k.lr, 3);
        assert_eq!(k.key_len, 6);
        assert_eq!(&k.key[..6], b"secret");
        assert!(k.key[6..].iter().all(|b| *b == 0));
    }

    #[test]
    fn status_mapping() {
        use crate::error::ErrorKind;
        use nix::errno::Errno;

        assert!(check(Status::SUCCESS, "x", "d").is_ok());
        assert_eq!(check(Status::NOT_AUTHORIZED, "x", "d").unwrap_err().kind(), ErrorKind::Unauthorized);
        assert_eq!(check(Status::FAIL, "x", "d").unwrap_err().kind(), ErrorKind::Invalid);
        let sys = Status::from_errno(Errno::ENOTTY);
        assert_eq!(check(sys, "x", "d").unwrap_err().kind(), ErrorKind::Invalid);
        assert_eq!(check_entry(sys, "x", "d").unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(
            check_entry(Status::NOT_AUTHORIZED, "x", "d").unwrap_err().kind(),
            ErrorKind::Unauthorized
        );
    }
}

//! Translation of control call results.
//!
//! Every Opal ioctl returns either a non-negative TCG method status or a
//! negative errno. This module is the only place that interprets those raw
//! numbers.

use nix::errno::Errno;
use std::fmt;

/// TCG Core Spec 2.01, section 5.1.5, table 166.
pub const OPAL_STATUS_SUCCESS: i32 = 0x00;
pub const OPAL_STATUS_NOT_AUTHORIZED: i32 = 0x01;
pub const OPAL_STATUS_SP_BUSY: i32 = 0x03;
pub const OPAL_STATUS_INVALID_PARAMETER: i32 = 0x0B;
pub const OPAL_STATUS_AUTHORITY_LOCKED_OUT: i32 = 0x11;
pub const OPAL_STATUS_FAIL: i32 = 0x3F;

const STATUS_TEXT: [Option<&str>; 0x12] = [
    Some("success"),
    Some("not authorized"),
    Some("obsolete"),
    Some("SP busy"),
    Some("SP failed"),
    Some("SP disabled"),
    Some("SP frozen"),
    Some("no sessions available"),
    Some("uniqueness conflict"),
    Some("insufficient space"),
    Some("insufficient rows"),
    Some("invalid parameter"),
    Some("obsolete"),
    Some("obsolete"),
    Some("TPer malfunction"),
    Some("transaction failure"),
    Some("response overflow"),
    Some("authority locked out"),
];

/// How a result steers control flow.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StatusClass {
    Success,
    NotAuthorized,
    /// Any other protocol status, including the generic failure code.
    Failed,
    /// The call never reached the drive (negative errno).
    System,
}

/// Raw result of one control call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Status(i32);

impl Status {
    pub const SUCCESS: Status = Status(OPAL_STATUS_SUCCESS);
    pub const NOT_AUTHORIZED: Status = Status(OPAL_STATUS_NOT_AUTHORIZED);
    pub const FAIL: Status = Status(OPAL_STATUS_FAIL);

    pub const fn from_raw(raw: i32) -> Self {
        Status(raw)
    }

    /// A system error, stored as a negative errno.
    pub fn from_errno(errno: Errno) -> Self {
        Status(-(errno as i32))
    }

    /// Fold the result of a `nix` ioctl wrapper into a status.
    pub fn from_ioctl(res: nix::Result<i32>) -> Self {
        match res {
            Ok(raw) => Status(raw),
            Err(errno) => Status::from_errno(errno),
        }
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    pub fn class(self) -> StatusClass {
        match self.0 {
            OPAL_STATUS_SUCCESS => StatusClass::Success,
            OPAL_STATUS_NOT_AUTHORIZED => StatusClass::NotAuthorized,
            n if n < 0 => StatusClass::System,
            _ => StatusClass::Failed,
        }
    }

    pub fn is_success(self) -> bool {
        self.class() == StatusClass::Success
    }

    pub fn text(self) -> &'static str {
        match self.0 {
            n if n < 0 => Errno::from_raw(n.saturating_neg()).desc(),
            OPAL_STATUS_FAIL => "unknown failure",
            n => STATUS_TEXT
                .get(n as usize)
                .copied()
                .flatten()
                .unwrap_or("unknown error"),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

use super::query::{query_geometry, Geometry};
use super::{check, check_key, check_segment, fill_key, open};
use crate::device::{Drive, OpalControl};
use crate::error::{Mismatch, OpalError, Result};
use crate::ioctl::{opal_lr_status, Authority, LockState, OPAL_LK, OPAL_RO};
use crate::secure::SecureBox;
use log::{debug, error};

/// Values a locking range is expected to report. `None` fields are not
/// checked.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RangeExpectations {
    pub offset_sectors: Option<u64>,
    pub length_sectors: Option<u64>,
    pub read_locked: Option<bool>,
    pub write_locked: Option<bool>,
}

impl RangeExpectations {
    /// A range at `offset`/`length` that is fully locked.
    pub fn locked_range(offset_sectors: u64, length_sectors: u64) -> Self {
        Self {
            offset_sectors: Some(offset_sectors),
            length_sectors: Some(length_sectors),
            read_locked: Some(true),
            write_locked: Some(true),
        }
    }
}

/// What a locking range reported, in sectors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RangeAttributes {
    pub offset_sectors: u64,
    pub length_sectors: u64,
    pub read_lock_enabled: bool,
    pub write_lock_enabled: bool,
    pub state: Option<LockState>,
    pub read_locked: bool,
    pub write_locked: bool,
}

impl RangeAttributes {
    fn from_status(lrs: &opal_lr_status, geo: &Geometry) -> Self {
        Self {
            offset_sectors: geo.blocks_to_sectors(lrs.range_start),
            length_sectors: geo.blocks_to_sectors(lrs.range_length),
            read_lock_enabled: lrs.RLE != 0,
            write_lock_enabled: lrs.WLE != 0,
            state: LockState::from_raw(lrs.l_state),
            read_locked: lrs.l_state == OPAL_LK,
            write_locked: lrs.l_state & (OPAL_RO | OPAL_LK) != 0,
        }
    }

    /// Every way these attributes differ from `want`. Disabled locking is
    /// always reported.
    pub fn mismatches(&self, want: &RangeExpectations) -> Vec<Mismatch> {
        let mut out = Vec::new();
        if let Some(expected) = want.offset_sectors {
            if self.offset_sectors != expected {
                out.push(Mismatch::Offset { actual: self.offset_sectors, expected });
            }
        }
        if let Some(expected) = want.length_sectors {
            if self.length_sectors != expected {
                out.push(Mismatch::Length { actual: self.length_sectors, expected });
            }
        }
        if !self.read_lock_enabled || !self.write_lock_enabled {
            out.push(Mismatch::LockingDisabled {
                read_lock_enabled: self.read_lock_enabled,
                write_lock_enabled: self.write_lock_enabled,
            });
        }
        if let Some(expected) = want.read_locked {
            if self.read_locked != expected {
                out.push(Mismatch::ReadLock { actual: self.read_locked, expected });
            }
        }
        if let Some(expected) = want.write_locked {
            if self.write_locked != expected {
                out.push(Mismatch::WriteLock { actual: self.write_locked, expected });
            }
        }
        out
    }
}

pub(super) fn verify_on(
    ctl: &mut dyn OpalControl,
    device: &str,
    key: &[u8],
    segment: u32,
    want: &RangeExpectations,
) -> Result<RangeAttributes> {
    let geo = query_geometry(ctl, device)?;

    let user = Authority::for_segment(segment);
    let mut lrs = SecureBox::<opal_lr_status>::new_with(|lrs| {
        lrs.session.who = user.who();
        fill_key(&mut lrs.session.opal_key, segment, key);
    })?;

    let st = ctl.get_range_status(&mut lrs);
    if !st.is_success() {
        debug!("Failed to get locking range status on device '{device}'.");
    }
    check(st, &format!("read OPAL range {segment} status"), device)?;

    let attrs = RangeAttributes::from_status(&lrs, &geo);
    drop(lrs);

    let mismatches = attrs.mismatches(want);
    if mismatches.is_empty() {
        return Ok(attrs);
    }
    for m in &mismatches {
        if matches!(m, Mismatch::ReadLock { .. } | Mismatch::WriteLock { .. }) {
            debug!("OPAL range {segment} {m}.");
            error!("Unexpected OPAL range {segment} lock state.");
        } else {
            error!("OPAL range {segment} {m}.");
        }
    }
    Err(OpalError::Mismatch { segment, mismatches })
}

/// Read back locking range `segment` as its user authority and compare it
/// with `want`.
///
/// All mismatches are logged and returned together. RLE and WLE must both be
/// set whatever `want` says.
pub fn verify<D: Drive + ?Sized>(
    drive: &D,
    key: &[u8],
    segment: u32,
    want: &RangeExpectations,
) -> Result<RangeAttributes> {
    check_key("user key", key)?;
    check_segment(segment)?;
    let mut ctl = open(drive)?;
    verify_on(ctl.as_mut(), &drive.name(), key, segment, want)
}

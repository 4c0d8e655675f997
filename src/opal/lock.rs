use super::query::query_flags;
use super::{check_entry, check_key, check_segment, fill_key, open};
use crate::device::Drive;
use crate::error::{OpalError, Result};
use crate::ioctl::{opal_lock_unlock, Authority, LockState, OPAL_SAVE_FOR_LOCK};
use crate::secure::SecureBox;
use log::{debug, info, warn};

/// Lock or unlock range `segment` as its user authority.
///
/// Unlocking needs the user `key`; locking must not be given one, the kernel
/// reuses the key it saved on the last unlock. Locking therefore only
/// authenticates once the range was unlocked through here since boot; before
/// that it is `Unauthorized` even if the range is already locked. A drive
/// whose status cannot be read counts as unsupported. After a successful unlock
/// the kernel is asked to keep the key for suspend/resume. If that fails
/// the range stays unlocked and only a warning is logged.
pub fn set_lock<D: Drive + ?Sized>(drive: &D, segment: u32, locked: bool, key: Option<&[u8]>) -> Result<()> {
    check_segment(segment)?;
    match (locked, key) {
        (false, None) => return Err(OpalError::invalid("unlocking an OPAL range requires its key")),
        (false, Some(key)) => check_key("user key", key)?,
        (true, Some(_)) => return Err(OpalError::invalid("locking an OPAL range does not take a key")),
        (true, None) => {}
    }

    let device = drive.name();
    let mut ctl = open(drive)?;
    let supported = match query_flags(ctl.as_mut(), &device) {
        Ok(flags) => flags.supported(),
        Err(OpalError::Invalid(_)) => false,
        Err(e) => return Err(e),
    };
    if !supported {
        return Err(OpalError::Unsupported(format!("{device} does not support OPAL locking")));
    }

    let state = if locked { LockState::Locked } else { LockState::ReadWrite };
    let verb = if locked { "lock" } else { "unlock" };
    let mut lu = SecureBox::<opal_lock_unlock>::new_with(|lu| {
        lu.session.who = Authority::for_segment(segment).who();
        lu.session.opal_key.lr = segment as u8;
        if let Some(key) = key {
            fill_key(&mut lu.session.opal_key, segment, key);
        }
        lu.l_state = state.raw();
    })?;

    check_entry(ctl.lock_unlock(&lu), &format!("{verb} OPAL locking range {segment}"), &device)?;

    if !locked {
        lu.flags = OPAL_SAVE_FOR_LOCK;
        let st = ctl.save(&lu);
        if !st.is_success() {
            warn!(
                "Failed to prepare OPAL device '{device}' for sleep resume, be aware before suspending: {st}"
            );
        } else {
            debug!("OPAL range {segment} key saved for resume and locking");
        }
    }
    info!("OPAL locking range {segment} on '{device}' {verb}ed");
    Ok(())
}

/// Lock range `segment`.
pub fn lock<D: Drive + ?Sized>(drive: &D, segment: u32) -> Result<()> {
    set_lock(drive, segment, true, None)
}

/// Unlock range `segment` with its user key.
pub fn unlock<D: Drive + ?Sized>(drive: &D, segment: u32, key: &[u8]) -> Result<()> {
    set_lock(drive, segment, false, Some(key))
}

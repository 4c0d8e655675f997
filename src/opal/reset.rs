use super::{check, check_entry, check_key, check_segment, fill_key, open};
use super::query::query_flags;
use crate::device::{Drive, OpalControl};
use crate::error::{OpalError, Result};
use crate::ioctl::{opal_key, opal_session_info, opal_user_lr_setup, Authority};
use crate::secure::SecureBox;
use crate::status::StatusClass;
use log::{debug, info};

/// Which erase method wiped a range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(super) enum Erased {
    /// `IOC_OPAL_ERASE_LR`; also disables the range.
    Plain,
    /// `IOC_OPAL_SECURE_ERASE_LR`; leaves the range configuration in place.
    Secure,
}

/// Erase range `segment` as Admin1, falling back to a secure erase when the
/// plain erase is refused.
pub(super) fn erase_range(
    ctl: &mut dyn OpalControl,
    device: &str,
    segment: u32,
    session: &opal_session_info,
) -> Result<Erased> {
    let st = ctl.erase_range(session);
    if st.is_success() {
        return Ok(Erased::Plain);
    }
    debug!("Failed to reset (erase) OPAL locking range {segment} on device '{device}': {st}");

    let st = ctl.secure_erase_range(session);
    if !st.is_success() {
        debug!("Failed to reset (secure erase) OPAL locking range {segment} on device '{device}': {st}");
    }
    check(st, &format!("erase OPAL locking range {segment}"), device)?;
    Ok(Erased::Secure)
}

fn admin_session(segment: u32, password: &[u8]) -> Result<SecureBox<opal_session_info>> {
    SecureBox::<opal_session_info>::new_with(|s| {
        s.who = Authority::Admin1.who();
        fill_key(&mut s.opal_key, segment, password);
    })
}

/// Revert `drive` to its factory state with the PSID printed on the label.
///
/// Ownership, every locking range and all data behind them are gone
/// afterwards. A wrong PSID is reported as [`ErrorKind::Unauthorized`] so the
/// caller can ask again.
///
/// [`ErrorKind::Unauthorized`]: crate::error::ErrorKind::Unauthorized
pub fn factory_reset<D: Drive + ?Sized>(drive: &D, psid: &[u8]) -> Result<()> {
    check_key("PSID", psid)?;
    let device = drive.name();
    let mut ctl = open(drive)?;

    let reset = SecureBox::<opal_key>::new_with(|k| fill_key(k, 0, psid))?;
    let st = ctl.psid_revert(&reset);
    drop(reset);

    if st.class() == StatusClass::NotAuthorized {
        debug!("Failed to reset OPAL device '{device}', incorrect PSID?");
        return Err(OpalError::Unauthorized(format!("{device}: PSID was not accepted")));
    }
    check_entry(st, "reset with PSID", &device)?;
    info!("OPAL device '{device}' reverted to factory state");
    Ok(())
}

/// Wipe locking range `segment` and leave it disabled.
///
/// Locking must already be enabled on the drive. When only the secure erase
/// succeeds the range is additionally shrunk to zero length with both lock
/// enables cleared, which a plain erase does on its own.
pub fn reset_segment<D: Drive + ?Sized>(drive: &D, segment: u32, admin_password: &[u8]) -> Result<()> {
    check_key("admin password", admin_password)?;
    check_segment(segment)?;
    let device = drive.name();
    let mut ctl = open(drive)?;

    if !query_flags(ctl.as_mut(), &device)?.locking_enabled() {
        return Err(OpalError::invalid(format!(
            "{device}: OPAL locking is not enabled, nothing to reset"
        )));
    }

    let session = admin_session(segment, admin_password)?;
    if erase_range(ctl.as_mut(), &device, segment, &session)? == Erased::Secure {
        let setup = SecureBox::<opal_user_lr_setup>::new_with(|s| {
            s.range_start = 0;
            s.range_length = 0;
            s.RLE = 0;
            s.WLE = 0;
            s.session.who = Authority::Admin1.who();
            fill_key(&mut s.session.opal_key, segment, admin_password);
        })?;
        check(
            ctl.setup_range(&setup),
            &format!("disable OPAL locking range {segment}"),
            &device,
        )?;
    }
    info!("OPAL locking range {segment} on '{device}' reset");
    Ok(())
}

use super::query::{query_flags, query_geometry};
use super::reset::erase_range;
use super::verify::{verify_on, RangeExpectations};
use super::{check, check_entry, check_key, check_segment, fill_key, open, LAST_SEGMENT};
use crate::device::{Drive, OpalControl};
use crate::error::{OpalError, Result};
use crate::ioctl::*;
use crate::secure::SecureBox;
use log::{debug, info};

/// One protocol step of provisioning a locking range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SetupStep {
    /// Install the admin key as the drive owner (SID) secret.
    TakeOwnership,
    /// Activate the Locking SP with ranges 1..=8.
    ActivateLockingSp,
    /// Wipe the range on a drive that is already in use.
    EraseRange,
    ActivateUser,
    GrantReadOnly,
    GrantReadWrite,
    SetUserPassword,
    ConfigureRange,
    LockRange,
    Verify,
}

const FIRST_USE: &[SetupStep] = &[
    SetupStep::TakeOwnership,
    SetupStep::ActivateLockingSp,
    SetupStep::ActivateUser,
    SetupStep::GrantReadOnly,
    SetupStep::GrantReadWrite,
    SetupStep::SetUserPassword,
    SetupStep::ConfigureRange,
    SetupStep::LockRange,
    SetupStep::Verify,
];

const REUSE: &[SetupStep] = &[
    SetupStep::EraseRange,
    SetupStep::ActivateUser,
    SetupStep::GrantReadOnly,
    SetupStep::GrantReadWrite,
    SetupStep::SetUserPassword,
    SetupStep::ConfigureRange,
    SetupStep::LockRange,
    SetupStep::Verify,
];

impl SetupStep {
    /// Steps run for a drive whose locking was (or was never) enabled.
    pub fn plan(locking_enabled: bool) -> &'static [SetupStep] {
        if locking_enabled {
            REUSE
        } else {
            FIRST_USE
        }
    }
}

struct Provisioner<'a> {
    ctl: &'a mut dyn OpalControl,
    device: &'a str,
    segment: u32,
    user: Authority,
    admin_key: &'a [u8],
    volume_key: &'a [u8],
    start_sectors: u64,
    length_sectors: u64,
    start_blocks: u64,
    length_blocks: u64,
}

impl<'a> Provisioner<'a> {
    fn admin_session(&self, lr: u32) -> impl FnOnce(&mut opal_session_info) + 'a {
        let admin_key = self.admin_key;
        move |s| {
            s.who = Authority::Admin1.who();
            fill_key(&mut s.opal_key, lr, admin_key);
        }
    }

    fn run(&mut self, step: SetupStep) -> Result<()> {
        let segment = self.segment;
        let device = self.device;
        match step {
            SetupStep::TakeOwnership => {
                let key = SecureBox::<opal_key>::new_with(|k| fill_key(k, 0, self.admin_key))?;
                check_entry(self.ctl.take_ownership(&key), "take ownership", device)
            }
            SetupStep::ActivateLockingSp => {
                let act = SecureBox::<opal_lr_act>::new_with(|a| {
                    fill_key(&mut a.key, 0, self.admin_key);
                    a.num_lrs = LAST_SEGMENT as u8;
                    for (slot, lr) in a.lr.iter_mut().zip(1..=LAST_SEGMENT as u8) {
                        *slot = lr;
                    }
                })?;
                check(self.ctl.activate_lsp(&act), "activate the Locking SP", device)
            }
            SetupStep::EraseRange => {
                let session = SecureBox::<opal_session_info>::new_with(self.admin_session(segment))?;
                let how = erase_range(self.ctl, device, segment, &session)?;
                debug!("OPAL locking range {segment} wiped ({how:?} erase)");
                Ok(())
            }
            SetupStep::ActivateUser => {
                let user = self.user;
                let session = SecureBox::<opal_session_info>::new_with(|s| {
                    s.who = user.who();
                    fill_key(&mut s.opal_key, 0, self.admin_key);
                })?;
                check(self.ctl.activate_user(&session), &format!("activate OPAL {user}"), device)
            }
            SetupStep::GrantReadOnly | SetupStep::GrantReadWrite => {
                let (state, label) = match step {
                    SetupStep::GrantReadOnly => (LockState::ReadOnly, "RO"),
                    _ => (LockState::ReadWrite, "RW"),
                };
                let user = self.user;
                let grant = SecureBox::<opal_lock_unlock>::new_with(|g| {
                    g.session.who = user.who();
                    fill_key(&mut g.session.opal_key, segment, self.admin_key);
                    g.l_state = state.raw();
                })?;
                check(
                    self.ctl.add_user_to_range(&grant),
                    &format!("add OPAL {user} to locking range {segment} ({label})"),
                    device,
                )
            }
            SetupStep::SetUserPassword => {
                let user = self.user;
                debug!("User authority key length: {}", self.volume_key.len());
                let new_pw = SecureBox::<opal_new_pw>::new_with(|p| {
                    p.session.who = Authority::Admin1.who();
                    fill_key(&mut p.session.opal_key, segment, self.admin_key);
                    p.new_user_pw.who = user.who();
                    fill_key(&mut p.new_user_pw.opal_key, segment, self.volume_key);
                })?;
                check(self.ctl.set_password(&new_pw), "set OPAL user password", device)
            }
            SetupStep::ConfigureRange => {
                let (start, length) = (self.start_blocks, self.length_blocks);
                let setup = SecureBox::<opal_user_lr_setup>::new_with(|s| {
                    s.range_start = start;
                    s.range_length = length;
                    // Some drives leave new ranges with locking disabled; a
                    // later lock then succeeds without locking anything.
                    s.RLE = 1;
                    s.WLE = 1;
                    s.session.who = Authority::Admin1.who();
                    fill_key(&mut s.session.opal_key, segment, self.admin_key);
                })?;
                check(
                    self.ctl.setup_range(&setup),
                    &format!("set up locking range of length {length} at offset {start}"),
                    device,
                )
            }
            SetupStep::LockRange => {
                let user = self.user;
                let lock = SecureBox::<opal_lock_unlock>::new_with(|l| {
                    l.session.who = user.who();
                    fill_key(&mut l.session.opal_key, segment, self.volume_key);
                    l.l_state = LockState::Locked.raw();
                })?;
                check(self.ctl.lock_unlock(&lock), &format!("lock OPAL locking range {segment}"), device)
            }
            SetupStep::Verify => {
                let want = RangeExpectations::locked_range(self.start_sectors, self.length_sectors);
                verify_on(self.ctl, device, self.volume_key, segment, &want).map(|_| ())
            }
        }
    }
}

/// Provision locking range `segment` over `range_start`/`range_length`
/// (in 512-byte sectors) and leave it locked under `volume_key`.
///
/// A drive whose locking was never enabled is taken over with `admin_key`
/// first; otherwise `admin_key` must be the current Admin1 password and the
/// range is wiped before it is reconfigured. Steps are never rolled back: a
/// failure leaves the drive as the last successful step left it, and a retry
/// must use the same `admin_key`.
pub fn setup_range<D: Drive + ?Sized>(
    drive: &D,
    volume_key: &[u8],
    range_start: u64,
    range_length: u64,
    segment: u32,
    admin_key: &[u8],
) -> Result<()> {
    check_key("admin key", admin_key)?;
    check_key("volume key", volume_key)?;
    check_segment(segment)?;
    if range_length == 0 {
        return Err(OpalError::invalid("OPAL locking range length must not be zero"));
    }

    let device = drive.name();
    let mut ctl = open(drive)?;

    let flags = query_flags(ctl.as_mut(), &device)?;
    let geo = query_geometry(ctl.as_mut(), &device)?;
    let misaligned = |what: &str, v: u64| {
        OpalError::invalid(format!(
            "OPAL range {what} {v} is not a multiple of the {}-byte logical block size",
            geo.logical_block_size
        ))
    };
    let start_blocks = geo
        .sectors_to_blocks(range_start)
        .ok_or_else(|| misaligned("offset", range_start))?;
    let length_blocks = geo
        .sectors_to_blocks(range_length)
        .ok_or_else(|| misaligned("length", range_length))?;

    let mut p = Provisioner {
        ctl: ctl.as_mut(),
        device: &device,
        segment,
        user: Authority::for_segment(segment),
        admin_key,
        volume_key,
        start_sectors: range_start,
        length_sectors: range_length,
        start_blocks,
        length_blocks,
    };
    for step in SetupStep::plan(flags.locking_enabled()) {
        debug!("OPAL setup of range {segment} on '{device}': {step:?}");
        p.run(*step)?;
    }

    info!("OPAL locking range {segment} on '{device}' provisioned and locked");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::secure::live_buffers;
    use crate::sim::{ControlOp, SimulatedDrive};
    use crate::status::Status;

    const ADMIN: &[u8] = b"admin-password";
    const VOLUME: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn plans_differ_only_in_the_prelude() {
        assert_eq!(&SetupStep::plan(false)[..2], &[SetupStep::TakeOwnership, SetupStep::ActivateLockingSp]);
        assert_eq!(SetupStep::plan(true)[0], SetupStep::EraseRange);
        assert_eq!(SetupStep::plan(false)[2..], SetupStep::plan(true)[1..]);
        assert_eq!(SetupStep::plan(true).last(), Some(&SetupStep::Verify));
    }

    #[test]
    fn first_use_takes_ownership_then_locks() {
        let drive = SimulatedDrive::new("setup0").with_block_size(4096);
        setup_range(&drive, VOLUME, 2048, 8192, 1, ADMIN).unwrap();

        let ops = drive.ops();
        let first_range_call = ops
            .iter()
            .position(|op| op.is_range_specific())
            .unwrap();
        let take = ops.iter().position(|op| *op == ControlOp::TakeOwnership).unwrap();
        assert!(take < first_range_call);
        assert!(!ops.contains(&ControlOp::EraseRange));

        let r = drive.range(1);
        assert_eq!((r.start, r.length), (256, 1024));
        assert!(r.read_lock_enabled && r.write_lock_enabled);
        assert_eq!(r.state, OPAL_LK);
        assert!(drive.locking_is_enabled());
        assert_eq!(live_buffers(), 0);
    }

    #[test]
    fn grants_read_only_before_read_write() {
        let drive = SimulatedDrive::new("setup1");
        setup_range(&drive, VOLUME, 0, 4096, 3, ADMIN).unwrap();
        let grants: Vec<_> = drive
            .calls()
            .into_iter()
            .filter(|c| c.op == ControlOp::AddUserToRange)
            .map(|c| (c.who, c.lr, c.state))
            .collect();
        assert_eq!(grants, vec![(4, 3, OPAL_RO), (4, 3, OPAL_RW)]);
    }

    #[test]
    fn unauthorized_take_ownership_stops_everything() {
        let drive = SimulatedDrive::new("setup2");
        drive.inject(ControlOp::TakeOwnership, Status::NOT_AUTHORIZED);
        let err = setup_range(&drive, VOLUME, 0, 4096, 1, ADMIN).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(drive.ops().last(), Some(&ControlOp::TakeOwnership));
        assert!(!drive.ops().iter().any(|op| op.is_range_specific()));
        assert_eq!(live_buffers(), 0);
    }

    #[test]
    fn owned_by_someone_else_is_unauthorized() {
        let drive = SimulatedDrive::new("setup3");
        drive.force_sid(b"previous-owner");
        let err = setup_range(&drive, VOLUME, 0, 4096, 1, ADMIN).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn reuse_erases_before_reconfiguring() {
        let drive = SimulatedDrive::new("setup4");
        setup_range(&drive, VOLUME, 0, 4096, 1, ADMIN).unwrap();
        drive.clear_calls();

        setup_range(&drive, b"second volume key", 4096, 4096, 1, ADMIN).unwrap();
        let ops = drive.ops();
        assert!(!ops.contains(&ControlOp::TakeOwnership));
        let erase = ops.iter().position(|op| *op == ControlOp::EraseRange).unwrap();
        let activate = ops.iter().position(|op| *op == ControlOp::ActivateUser).unwrap();
        assert!(erase < activate);
        assert_eq!(drive.range(1).erase_count, 1);
        assert_eq!(drive.range(1).start, 4096);
    }

    #[test]
    fn reuse_falls_back_to_secure_erase() {
        let drive = SimulatedDrive::new("setup5");
        setup_range(&drive, VOLUME, 0, 4096, 2, ADMIN).unwrap();
        drive.clear_calls();
        drive.inject(ControlOp::EraseRange, Status::FAIL);

        setup_range(&drive, VOLUME, 0, 4096, 2, ADMIN).unwrap();
        let ops = drive.ops();
        assert!(ops.contains(&ControlOp::SecureEraseRange));
        assert_eq!(drive.range(2).state, OPAL_LK);
    }

    #[test]
    fn failed_lock_aborts_before_verify() {
        let drive = SimulatedDrive::new("setup6");
        drive.inject(ControlOp::LockUnlock, Status::FAIL);
        let err = setup_range(&drive, VOLUME, 0, 4096, 1, ADMIN).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(drive.ops().last(), Some(&ControlOp::LockUnlock));
        assert!(!drive.ops().contains(&ControlOp::GetRangeStatus));
        // No rollback: ownership and the configured range stay in place.
        assert!(drive.is_owned());
        assert_eq!(drive.range(1).length, 4096);
    }

    #[test]
    fn silent_lock_failure_is_caught_by_verification() {
        let drive = SimulatedDrive::new("setup7");
        drive.ignore_lock_requests(true);
        let err = setup_range(&drive, VOLUME, 0, 4096, 1, ADMIN).unwrap_err();
        assert!(matches!(err, OpalError::Mismatch { segment: 1, .. }));
        assert_eq!(live_buffers(), 0);
    }

    #[test]
    fn drive_side_rounding_is_a_failure() {
        let drive = SimulatedDrive::new("setup8").with_granularity(8);
        let err = setup_range(&drive, VOLUME, 4, 4092, 1, ADMIN).unwrap_err();
        match err {
            OpalError::Mismatch { mismatches, .. } => assert!(!mismatches.is_empty()),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn misaligned_range_is_rejected_before_any_mutation() {
        let drive = SimulatedDrive::new("setup9").with_block_size(4096);
        let err = setup_range(&drive, VOLUME, 3, 4096, 1, ADMIN).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(drive.ops(), vec![ControlOp::GetStatus, ControlOp::GetGeometry]);
    }

    #[test]
    fn oversized_keys_never_reach_the_drive() {
        let drive = SimulatedDrive::new("setup10");
        let long = vec![0xAA; MAX_KEY_LEN_PLUS_ONE];
        assert_eq!(
            setup_range(&drive, VOLUME, 0, 4096, 1, &long).unwrap_err().kind(),
            ErrorKind::Invalid
        );
        assert_eq!(
            setup_range(&drive, &long, 0, 4096, 1, ADMIN).unwrap_err().kind(),
            ErrorKind::Invalid
        );
        assert!(drive.calls().is_empty());
    }

    #[test]
    fn segment_zero_is_reserved() {
        let drive = SimulatedDrive::new("setup11");
        assert_eq!(
            setup_range(&drive, VOLUME, 0, 4096, 0, ADMIN).unwrap_err().kind(),
            ErrorKind::Invalid
        );
        assert!(drive.calls().is_empty());
    }

    const MAX_KEY_LEN_PLUS_ONE: usize = crate::opal::MAX_KEY_LEN + 1;
}

use sed_range::ioctl::{OPAL_LK, OPAL_RW};
use sed_range::opal::{self, RangeExpectations};
use sed_range::secure::live_buffers;
use sed_range::sim::{ControlOp, SimulatedDrive};
use sed_range::status::Status;
use sed_range::{
    do_check, do_factory_reset, do_lock, do_reset_segment, do_setup, do_status, do_unlock, mock_drive,
    use_mock_backend, ErrorKind, OpalError,
};
use std::io::Write;
use tempfile::NamedTempFile;

const ADMIN: &str = "admin-password";
const KEY: &str = "volume-key";

fn provisioned(dev: &str, segment: u32) {
    use_mock_backend();
    do_setup(dev.into(), segment, 0, 4096, Some(KEY.into()), Some(ADMIN.into())).unwrap();
}

#[test]
fn status_succeeds_under_mock() {
    use_mock_backend();
    assert!(do_status("/dev/nvme0n1".into()).is_ok());
}

#[test]
fn status_fails_for_non_opal_device() {
    use_mock_backend();
    assert!(do_status("/dev/sda".into()).is_err());
}

#[test]
fn setup_leaves_range_locked() {
    provisioned("/dev/nvme1n1", 1);
    let drive = mock_drive("/dev/nvme1n1");
    let r = drive.range(1);
    assert_eq!((r.start, r.length), (0, 4096));
    assert_eq!(r.state, OPAL_LK);
    assert!(drive.locking_is_enabled());
}

#[test]
fn unlock_reads_key_from_file_then_lock() {
    provisioned("/dev/nvme2n1", 2);
    let mut tmp = NamedTempFile::new().unwrap();
    writeln!(tmp, "{KEY}").unwrap();
    let path = tmp.path().display().to_string();

    do_unlock("/dev/nvme2n1".into(), 2, Some(path)).unwrap();
    assert_eq!(mock_drive("/dev/nvme2n1").range(2).state, OPAL_RW);

    do_lock("/dev/nvme2n1".into(), 2).unwrap();
    do_lock("/dev/nvme2n1".into(), 2).unwrap();
    assert_eq!(mock_drive("/dev/nvme2n1").range(2).state, OPAL_LK);
}

#[test]
fn unlock_with_wrong_key_is_unauthorized() {
    provisioned("/dev/nvme3n1", 1);
    let err = do_unlock("/dev/nvme3n1".into(), 1, Some("wrong".into())).unwrap_err();
    let opal = err.downcast_ref::<OpalError>().unwrap();
    assert_eq!(opal.kind(), ErrorKind::Unauthorized);
}

#[test]
fn check_matches_provisioned_layout() {
    provisioned("/dev/nvme4n1", 3);
    do_check("/dev/nvme4n1".into(), 3, Some(0), Some(4096), Some(KEY.into())).unwrap();
    assert!(do_check("/dev/nvme4n1".into(), 3, Some(8), None, Some(KEY.into())).is_err());
}

#[test]
fn reset_segment_then_factory_reset() {
    provisioned("/dev/nvme5n1", 4);
    do_reset_segment("/dev/nvme5n1".into(), 4, Some(ADMIN.into())).unwrap();
    let drive = mock_drive("/dev/nvme5n1");
    assert_eq!(drive.range(4).length, 0);
    assert!(!drive.range(4).read_lock_enabled);

    let psid = String::from_utf8(SimulatedDrive::DEFAULT_PSID.to_vec()).unwrap();
    assert!(do_factory_reset("/dev/nvme5n1".into(), Some("wrong-psid".into())).is_err());
    do_factory_reset("/dev/nvme5n1".into(), Some(psid)).unwrap();
    assert!(!drive.is_owned());
}

#[test]
fn unlock_fails_when_no_key_is_provided() {
    use_mock_backend();
    std::env::remove_var("SED_RANGE_KEY");
    assert!(do_unlock("/dev/nvme6n1".into(), 1, None).is_err());
    assert!(mock_drive("/dev/nvme6n1").calls().is_empty());
}

// Library API on private drives.

#[test]
fn setup_then_verify_reports_locked_layout() {
    let drive = SimulatedDrive::new("lib0").with_block_size(4096);
    opal::setup_range(&drive, b"k", 8, 2048, 5, b"a").unwrap();
    let attrs = opal::verify(&drive, b"k", 5, &RangeExpectations::locked_range(8, 2048)).unwrap();
    assert_eq!((attrs.offset_sectors, attrs.length_sectors), (8, 2048));
    assert!(attrs.read_locked && attrs.write_locked);
    assert_eq!(live_buffers(), 0);
}

#[test]
fn second_tenant_on_same_drive() {
    let drive = SimulatedDrive::new("lib1");
    opal::setup_range(&drive, b"first", 0, 1024, 1, b"admin").unwrap();
    opal::setup_range(&drive, b"second", 1024, 1024, 2, b"admin").unwrap();

    opal::unlock(&drive, 2, b"second").unwrap();
    assert_eq!(drive.range(1).state, OPAL_LK);
    assert_eq!(drive.range(2).state, OPAL_RW);
    assert_eq!(opal::unlock(&drive, 1, b"second").unwrap_err().kind(), ErrorKind::Unauthorized);
}

#[test]
fn reuse_with_wrong_admin_key_is_unauthorized() {
    let drive = SimulatedDrive::new("lib2");
    opal::setup_range(&drive, b"k", 0, 1024, 1, b"admin").unwrap();
    drive.clear_calls();
    let err = opal::setup_range(&drive, b"k", 0, 1024, 1, b"other").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert!(!drive.ops().contains(&ControlOp::ActivateUser));
    assert_eq!(live_buffers(), 0);
}

#[test]
fn busy_take_ownership_can_be_retried() {
    let drive = SimulatedDrive::new("lib3");
    drive.inject(ControlOp::TakeOwnership, Status::from_raw(sed_range::status::OPAL_STATUS_SP_BUSY));
    let err = opal::setup_range(&drive, b"k", 0, 1024, 1, b"admin").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    opal::setup_range(&drive, b"k", 0, 1024, 1, b"admin").unwrap();
}

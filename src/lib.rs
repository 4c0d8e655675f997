//! sed-range library entry point.
//!
//! Provisioning, locking and resetting of TCG Opal locking ranges through
//! the Linux `sed-opal` ioctls.

pub mod actions;
pub mod args;
pub mod device;
pub mod error;
pub mod ioctl;
pub mod opal;
pub mod secure;
pub mod sim;
pub mod status;

pub use actions::{
    do_check, do_factory_reset, do_geometry, do_lock, do_reset_segment, do_setup, do_status, do_unlock,
};
pub use device::{BlockDevice, Drive, OpalControl};
pub use error::{ErrorKind, Mismatch, OpalError, Result};
pub use status::{Status, StatusClass};

use once_cell::sync::{Lazy, OnceCell};
use sim::SimulatedDrive;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

//
// ─── BACKEND SELECTION ───────────────────────────────────────────────────────
//

/// Shared drive handle handed out by a backend.
pub type SharedDrive = Arc<dyn Drive + Send + Sync>;

// Make trait object usable in a static: must be Sync.
trait DriveBackend: Sync {
    fn drive(&self, dev: &str) -> SharedDrive;
}

struct RealBackend;

impl DriveBackend for RealBackend {
    fn drive(&self, dev: &str) -> SharedDrive {
        Arc::new(BlockDevice::new(dev))
    }
}

static BACKEND: OnceCell<&'static (dyn DriveBackend + Sync)> = OnceCell::new();
static REAL: RealBackend = RealBackend;

fn backend() -> &'static (dyn DriveBackend + Sync) {
    *BACKEND.get_or_init(|| &REAL as &(dyn DriveBackend + Sync))
}

/// Resolve a device path through the selected backend.
pub fn open_drive(dev: &str) -> SharedDrive {
    backend().drive(dev)
}

/// Switch the library to the built-in simulated backend.
///
/// Meant for integration tests so they never touch real hardware. It is a
/// no-op if the backend was already chosen.
pub fn use_mock_backend() {
    static MOCK: BuiltinMockBackend = BuiltinMockBackend;
    BACKEND.get_or_init(|| &MOCK);
}

static MOCK_DRIVES: Lazy<Mutex<HashMap<String, Arc<SimulatedDrive>>>> = Lazy::new(Default::default);

/// The simulated drive behind `dev` in the mock backend, created on first
/// use. Only nvme-like nodes support Opal.
pub fn mock_drive(dev: &str) -> Arc<SimulatedDrive> {
    let mut drives = MOCK_DRIVES.lock().unwrap_or_else(PoisonError::into_inner);
    drives
        .entry(dev.to_string())
        .or_insert_with(|| {
            let drive = if dev.starts_with("/dev/nvme") {
                SimulatedDrive::new(dev)
            } else {
                SimulatedDrive::unsupported(dev)
            };
            Arc::new(drive)
        })
        .clone()
}

struct BuiltinMockBackend;

impl DriveBackend for BuiltinMockBackend {
    fn drive(&self, dev: &str) -> SharedDrive {
        mock_drive(dev)
    }
}

//! The control transport: opening a drive and submitting parameter blocks.

use crate::ioctl::*;
use crate::status::Status;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One open control handle. Each method submits a fully built parameter
/// block and returns the drive's raw answer.
pub trait OpalControl {
    fn take_ownership(&mut self, key: &opal_key) -> Status;
    fn activate_lsp(&mut self, act: &opal_lr_act) -> Status;
    fn set_password(&mut self, pw: &opal_new_pw) -> Status;
    fn activate_user(&mut self, session: &opal_session_info) -> Status;
    fn setup_range(&mut self, setup: &opal_user_lr_setup) -> Status;
    fn add_user_to_range(&mut self, grant: &opal_lock_unlock) -> Status;
    fn erase_range(&mut self, session: &opal_session_info) -> Status;
    fn secure_erase_range(&mut self, session: &opal_session_info) -> Status;
    fn psid_revert(&mut self, psid: &opal_key) -> Status;
    fn lock_unlock(&mut self, lu: &opal_lock_unlock) -> Status;
    fn save(&mut self, lu: &opal_lock_unlock) -> Status;
    fn get_status(&mut self, st: &mut opal_status) -> Status;
    fn get_geometry(&mut self, geo: &mut opal_geometry) -> Status;
    fn get_range_status(&mut self, lrs: &mut opal_lr_status) -> Status;
}

/// Something that can be opened for Opal control calls.
pub trait Drive {
    fn open(&self) -> io::Result<Box<dyn OpalControl + '_>>;

    /// Display name used in log messages.
    fn name(&self) -> String;
}

impl<D: Drive + ?Sized> Drive for Arc<D> {
    fn open(&self) -> io::Result<Box<dyn OpalControl + '_>> {
        (**self).open()
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

impl<D: Drive + ?Sized> Drive for &D {
    fn open(&self) -> io::Result<Box<dyn OpalControl + '_>> {
        (**self).open()
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

/// A block device node such as `/dev/nvme0n1`.
#[derive(Debug, Clone)]
pub struct BlockDevice {
    path: PathBuf,
}

impl BlockDevice {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drive for BlockDevice {
    fn open(&self) -> io::Result<Box<dyn OpalControl + '_>> {
        let file = File::options().read(true).write(true).open(&self.path)?;
        Ok(Box::new(IoctlHandle { file }))
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}

/// Read-write handle; the descriptor closes when the handle drops.
struct IoctlHandle {
    #[allow(dead_code)]
    file: File,
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        use std::os::fd::AsRawFd;

        impl IoctlHandle {
            fn fd(&self) -> std::os::raw::c_int {
                self.file.as_raw_fd()
            }
        }

        // SAFETY (all methods): the descriptor stays open for the lifetime of
        // `self` and every pointer comes from a live reference to a `repr(C)`
        // block of the size encoded in the request.
        impl OpalControl for IoctlHandle {
            fn take_ownership(&mut self, key: &opal_key) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_take_ownership(self.fd(), key) })
            }
            fn activate_lsp(&mut self, act: &opal_lr_act) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_activate_lsp(self.fd(), act) })
            }
            fn set_password(&mut self, pw: &opal_new_pw) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_set_pw(self.fd(), pw) })
            }
            fn activate_user(&mut self, session: &opal_session_info) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_activate_usr(self.fd(), session) })
            }
            fn setup_range(&mut self, setup: &opal_user_lr_setup) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_lr_setup(self.fd(), setup) })
            }
            fn add_user_to_range(&mut self, grant: &opal_lock_unlock) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_add_usr_to_lr(self.fd(), grant) })
            }
            fn erase_range(&mut self, session: &opal_session_info) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_erase_lr(self.fd(), session) })
            }
            fn secure_erase_range(&mut self, session: &opal_session_info) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_secure_erase_lr(self.fd(), session) })
            }
            fn psid_revert(&mut self, psid: &opal_key) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_psid_revert_tpr(self.fd(), psid) })
            }
            fn lock_unlock(&mut self, lu: &opal_lock_unlock) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_lock_unlock(self.fd(), lu) })
            }
            fn save(&mut self, lu: &opal_lock_unlock) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_save(self.fd(), lu) })
            }
            fn get_status(&mut self, st: &mut opal_status) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_get_status(self.fd(), st) })
            }
            fn get_geometry(&mut self, geo: &mut opal_geometry) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_get_geometry(self.fd(), geo) })
            }
            fn get_range_status(&mut self, lrs: &mut opal_lr_status) -> Status {
                Status::from_ioctl(unsafe { ioc_opal_get_lr_status(self.fd(), lrs) })
            }
        }
    } else {
        use nix::errno::Errno;

        const NO_OPAL: Status = Status::from_raw(-(Errno::ENOTTY as i32));

        // Opal ioctls only exist on Linux.
        impl OpalControl for IoctlHandle {
            fn take_ownership(&mut self, _: &opal_key) -> Status { NO_OPAL }
            fn activate_lsp(&mut self, _: &opal_lr_act) -> Status { NO_OPAL }
            fn set_password(&mut self, _: &opal_new_pw) -> Status { NO_OPAL }
            fn activate_user(&mut self, _: &opal_session_info) -> Status { NO_OPAL }
            fn setup_range(&mut self, _: &opal_user_lr_setup) -> Status { NO_OPAL }
            fn add_user_to_range(&mut self, _: &opal_lock_unlock) -> Status { NO_OPAL }
            fn erase_range(&mut self, _: &opal_session_info) -> Status { NO_OPAL }
            fn secure_erase_range(&mut self, _: &opal_session_info) -> Status { NO_OPAL }
            fn psid_revert(&mut self, _: &opal_key) -> Status { NO_OPAL }
            fn lock_unlock(&mut self, _: &opal_lock_unlock) -> Status { NO_OPAL }
            fn save(&mut self, _: &opal_lock_unlock) -> Status { NO_OPAL }
            fn get_status(&mut self, _: &mut opal_status) -> Status { NO_OPAL }
            fn get_geometry(&mut self, _: &mut opal_geometry) -> Status { NO_OPAL }
            fn get_range_status(&mut self, _: &mut opal_lr_status) -> Status { NO_OPAL }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_node_fails_to_open() {
        let dev = BlockDevice::new("/dev/this-device-does-not-exist");
        assert_eq!(dev.name(), "/dev/this-device-does-not-exist");
        assert!(dev.open().is_err());
    }
}

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]

mod bindings;
pub use bindings::*;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        use nix::{ioctl_read, ioctl_write_ptr};
        use std::os::raw::c_int;

        ioctl_write_ptr!(ioc_opal_save, b'p', 220, opal_lock_unlock);
        ioctl_write_ptr!(ioc_opal_lock_unlock, b'p', 221, opal_lock_unlock);
        ioctl_write_ptr!(ioc_opal_take_ownership, b'p', 222, opal_key);
        ioctl_write_ptr!(ioc_opal_activate_lsp, b'p', 223, opal_lr_act);
        ioctl_write_ptr!(ioc_opal_set_pw, b'p', 224, opal_new_pw);
        ioctl_write_ptr!(ioc_opal_activate_usr, b'p', 225, opal_session_info);
        ioctl_write_ptr!(ioc_opal_lr_setup, b'p', 227, opal_user_lr_setup);
        ioctl_write_ptr!(ioc_opal_add_usr_to_lr, b'p', 228, opal_lock_unlock);
        ioctl_write_ptr!(ioc_opal_erase_lr, b'p', 230, opal_session_info);
        ioctl_write_ptr!(ioc_opal_secure_erase_lr, b'p', 231, opal_session_info);
        ioctl_write_ptr!(ioc_opal_psid_revert_tpr, b'p', 232, opal_key);

        ioctl_read!(ioc_opal_get_status, b'p', 236, opal_status);
        ioctl_read!(ioc_opal_get_geometry, b'p', 238, opal_geometry);

        /// `IOC_OPAL_GET_LR_STATUS` is declared `_IOW` in the UAPI header but the
        /// kernel copies the range state back into the same block, so the
        /// pointer must be mutable.
        pub unsafe fn ioc_opal_get_lr_status(fd: c_int, data: *mut opal_lr_status) -> nix::Result<c_int> {
            let request = nix::request_code_write!(b'p', 237, std::mem::size_of::<opal_lr_status>());
            nix::errno::Errno::result(libc::ioctl(fd, request, data))
        }
    }
}

// ─────────────────────────────────────────────────────────────
// Zeroed construction and authority / lock state wrappers
// ─────────────────────────────────────────────────────────────

use core::mem::zeroed;

/// Parameter blocks for which the all-zero bit pattern is a valid value.
///
/// `SecureBox` relies on this to hand out zero-filled allocations.
pub unsafe trait Plain {}

macro_rules! impl_default_zeroed {
    ($($t:ty),+ $(,)?) => {
        $(
            impl Default for $t {
                fn default() -> Self { unsafe { zeroed() } }
            }
            unsafe impl Plain for $t {}
        )+
    };
}

impl_default_zeroed!(
    opal_key,
    opal_session_info,
    opal_lock_unlock,
    opal_new_pw,
    opal_user_lr_setup,
    opal_lr_act,
    opal_lr_status,
    opal_status,
    opal_geometry,
);

/// An identity within the Locking SP.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Authority {
    Admin1,
    /// `User(n)` with `n` in `1..=9`.
    User(u32),
}

impl Authority {
    /// The user authority that owns locking range `segment`.
    pub fn for_segment(segment: u32) -> Self {
        Authority::User(segment + 1)
    }

    pub fn who(self) -> u32 {
        match self {
            Authority::Admin1 => OPAL_ADMIN1,
            Authority::User(n) => n,
        }
    }
}

impl std::fmt::Display for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authority::Admin1 => f.write_str("Admin1"),
            Authority::User(n) => write!(f, "User{n}"),
        }
    }
}

#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LockState {
    ReadOnly = OPAL_RO,
    ReadWrite = OPAL_RW,
    Locked = OPAL_LK,
}

impl LockState {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            OPAL_RO => Some(LockState::ReadOnly),
            OPAL_RW => Some(LockState::ReadWrite),
            OPAL_LK => Some(LockState::Locked),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        self as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn layouts_match_uapi_header() {
        assert_eq!(size_of::<opal_key>(), 264);
        assert_eq!(size_of::<opal_lr_act>(), 280);
        assert_eq!(size_of::<opal_session_info>(), 272);
        assert_eq!(size_of::<opal_user_lr_setup>(), 296);
        assert_eq!(size_of::<opal_lr_status>(), 304);
        assert_eq!(size_of::<opal_lock_unlock>(), 280);
        assert_eq!(size_of::<opal_new_pw>(), 544);
        assert_eq!(size_of::<opal_status>(), 8);
        assert_eq!(size_of::<opal_geometry>(), 32);
    }

    #[test]
    fn default_blocks_are_zeroed() {
        let k = opal_key::default();
        assert_eq!(k.key_len, 0);
        assert!(k.key.iter().all(|b| *b == 0));
        let lu = opal_lock_unlock::default();
        assert_eq!(lu.l_state, 0);
        assert_eq!(lu.session.who, OPAL_ADMIN1);
    }

    #[test]
    fn segment_authority_is_offset_by_one() {
        assert_eq!(Authority::for_segment(0).who(), OPAL_USER1);
        assert_eq!(Authority::for_segment(8).who(), OPAL_USER9);
        assert_eq!(Authority::for_segment(2).to_string(), "User3");
        assert_eq!(Authority::Admin1.who(), OPAL_ADMIN1);
    }

    #[test]
    fn lock_state_round_trips_kernel_values() {
        for s in [LockState::ReadOnly, LockState::ReadWrite, LockState::Locked] {
            assert_eq!(LockState::from_raw(s.raw()), Some(s));
        }
        assert_eq!(LockState::from_raw(0), None);
        assert_eq!(LockState::from_raw(3), None);
    }
}

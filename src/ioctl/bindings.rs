//! Parameter blocks of `linux/sed-opal.h`.
//!
//! Field order, widths and explicit padding follow the kernel UAPI header so
//! each struct can be handed to the ioctl as-is.

use zeroize::Zeroize;

pub const OPAL_KEY_MAX: usize = 256;
pub const OPAL_MAX_LRS: usize = 9;

pub const OPAL_ADMIN1: u32 = 0x00;
pub const OPAL_USER1: u32 = 0x01;
pub const OPAL_USER9: u32 = 0x09;

pub const OPAL_RO: u32 = 0x01;
pub const OPAL_RW: u32 = 0x02;
pub const OPAL_LK: u32 = 0x04;

pub const OPAL_SAVE_FOR_LOCK: u16 = 0x01;

pub const OPAL_INCLUDED: u8 = 0;

pub const OPAL_FL_SUPPORTED: u32 = 0x0000_0001;
pub const OPAL_FL_LOCKING_SUPPORTED: u32 = 0x0000_0002;
pub const OPAL_FL_LOCKING_ENABLED: u32 = 0x0000_0004;
pub const OPAL_FL_LOCKED: u32 = 0x0000_0008;
pub const OPAL_FL_MBR_ENABLED: u32 = 0x0000_0010;
pub const OPAL_FL_MBR_DONE: u32 = 0x0000_0020;
pub const OPAL_FL_SUM_SUPPORTED: u32 = 0x0000_0040;

#[repr(C)]
#[derive(Clone, Zeroize)]
pub struct opal_key {
    pub lr: u8,
    pub key_len: u8,
    pub key_type: u8,
    pub __align: [u8; 5],
    pub key: [u8; OPAL_KEY_MAX],
}

#[repr(C)]
#[derive(Clone, Zeroize)]
pub struct opal_lr_act {
    pub key: opal_key,
    pub sum: u32,
    pub num_lrs: u8,
    pub lr: [u8; OPAL_MAX_LRS],
    pub align: [u8; 2],
}

#[repr(C)]
#[derive(Clone, Zeroize)]
pub struct opal_session_info {
    pub sum: u32,
    pub who: u32,
    pub opal_key: opal_key,
}

#[repr(C)]
#[derive(Clone, Zeroize)]
pub struct opal_user_lr_setup {
    pub range_start: u64,
    pub range_length: u64,
    pub RLE: u32,
    pub WLE: u32,
    pub session: opal_session_info,
}

#[repr(C)]
#[derive(Clone, Zeroize)]
pub struct opal_lr_status {
    pub session: opal_session_info,
    pub range_start: u64,
    pub range_length: u64,
    pub RLE: u32,
    pub WLE: u32,
    pub l_state: u32,
    pub align: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Zeroize)]
pub struct opal_lock_unlock {
    pub session: opal_session_info,
    pub l_state: u32,
    pub flags: u16,
    pub __align: [u8; 2],
}

#[repr(C)]
#[derive(Clone, Zeroize)]
pub struct opal_new_pw {
    pub session: opal_session_info,
    pub new_user_pw: opal_session_info,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct opal_status {
    pub flags: u32,
    pub reserved: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct opal_geometry {
    pub align: u8,
    pub logical_block_size: u32,
    pub alignment_granularity: u64,
    pub lowest_aligned_lba: u64,
    pub __align: [u8; 3],
}

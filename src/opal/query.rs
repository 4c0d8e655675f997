use super::{open, SECTOR_SIZE};
use crate::device::{Drive, OpalControl};
use crate::error::{OpalError, Result};
use crate::ioctl::*;
use crate::status::StatusClass;
use log::debug;

/// The `OPAL_FL_*` word reported by `IOC_OPAL_GET_STATUS`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StatusFlags(pub u32);

impl StatusFlags {
    fn has(self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    /// Opal or its locking feature is advertised. Drives set the two bits
    /// inconsistently, so either one counts.
    pub fn supported(self) -> bool {
        self.0 & (OPAL_FL_SUPPORTED | OPAL_FL_LOCKING_SUPPORTED) != 0
    }

    /// Ownership was taken and the Locking SP activated at some point.
    pub fn locking_enabled(self) -> bool {
        self.has(OPAL_FL_LOCKING_ENABLED)
    }

    pub fn locked(self) -> bool {
        self.has(OPAL_FL_LOCKED)
    }

    pub fn mbr_enabled(self) -> bool {
        self.has(OPAL_FL_MBR_ENABLED)
    }

    pub fn mbr_done(self) -> bool {
        self.has(OPAL_FL_MBR_DONE)
    }

    pub fn sum_supported(self) -> bool {
        self.has(OPAL_FL_SUM_SUPPORTED)
    }
}

/// Addressing constraints reported by `IOC_OPAL_GET_GEOMETRY`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Geometry {
    pub fixed_address_alignment_required: bool,
    pub logical_block_size: u32,
    pub alignment_granularity_blocks: u64,
    pub lowest_aligned_lba_blocks: u64,
}

impl Geometry {
    /// Convert a sector count into native blocks, refusing anything that is
    /// not a whole number of blocks.
    pub fn sectors_to_blocks(&self, sectors: u64) -> Option<u64> {
        let bytes = sectors.checked_mul(SECTOR_SIZE)?;
        let bs = u64::from(self.logical_block_size);
        if bs == 0 || bytes % bs != 0 {
            return None;
        }
        Some(bytes / bs)
    }

    pub fn blocks_to_sectors(&self, blocks: u64) -> u64 {
        blocks.saturating_mul(u64::from(self.logical_block_size)) / SECTOR_SIZE
    }
}

pub(super) fn query_flags(ctl: &mut dyn OpalControl, device: &str) -> Result<StatusFlags> {
    let mut st = opal_status::default();
    let res = ctl.get_status(&mut st);
    if res.class() == StatusClass::System {
        debug!("OPAL status query failed on device '{device}': {res}");
        return Err(OpalError::invalid(format!("{device}: OPAL status query failed: {res}")));
    }
    Ok(StatusFlags(st.flags))
}

pub(super) fn query_geometry(ctl: &mut dyn OpalControl, device: &str) -> Result<Geometry> {
    let mut geo = opal_geometry::default();
    let res = ctl.get_geometry(&mut geo);
    if !res.is_success() {
        debug!("OPAL geometry query failed on device '{device}': {res}");
        return Err(OpalError::invalid(format!("{device}: OPAL geometry query failed: {res}")));
    }
    if geo.logical_block_size == 0 {
        return Err(OpalError::invalid(format!("{device}: drive reports a zero logical block size")));
    }
    Ok(Geometry {
        fixed_address_alignment_required: geo.align == 1,
        logical_block_size: geo.logical_block_size,
        alignment_granularity_blocks: geo.alignment_granularity,
        lowest_aligned_lba_blocks: geo.lowest_aligned_lba,
    })
}

/// Read the raw status flags of `drive`.
pub fn status<D: Drive + ?Sized>(drive: &D) -> Result<StatusFlags> {
    let mut ctl = open(drive)?;
    query_flags(ctl.as_mut(), &drive.name())
}

/// Whether `drive` advertises Opal with the locking feature.
pub fn supported<D: Drive + ?Sized>(drive: &D) -> Result<bool> {
    Ok(status(drive)?.supported())
}

/// Whether locking was ever enabled on `drive`.
pub fn locking_enabled<D: Drive + ?Sized>(drive: &D) -> Result<bool> {
    Ok(status(drive)?.locking_enabled())
}

pub fn geometry<D: Drive + ?Sized>(drive: &D) -> Result<Geometry> {
    let mut ctl = open(drive)?;
    query_geometry(ctl.as_mut(), &drive.name())
}

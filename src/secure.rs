//! Zero-on-release storage for parameter blocks that carry key material.

use crate::error::{OpalError, Result};
use crate::ioctl::Plain;
use std::alloc::{alloc_zeroed, Layout};
use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use zeroize::Zeroize;

thread_local! {
    static LIVE: Cell<usize> = const { Cell::new(0) };
}

/// Number of `SecureBox`es alive on the calling thread.
///
/// Every operation releases all of its buffers before returning, so this is
/// back to its previous value once a call completes.
pub fn live_buffers() -> usize {
    LIVE.with(Cell::get)
}

/// A zero-filled heap allocation that is wiped when dropped.
pub struct SecureBox<T: Plain + Zeroize> {
    inner: Box<T>,
}

impl<T: Plain + Zeroize> SecureBox<T> {
    /// Allocate a zeroed `T`. Allocation failure is reported rather than
    /// aborting the process.
    pub fn zeroed() -> Result<Self> {
        let layout = Layout::new::<T>();
        debug_assert!(layout.size() > 0);
        // SAFETY: the layout is non-zero sized and `T: Plain` makes the
        // all-zero bit pattern a valid `T`.
        let inner = unsafe {
            let ptr = alloc_zeroed(layout) as *mut T;
            if ptr.is_null() {
                return Err(OpalError::ResourceExhausted);
            }
            Box::from_raw(ptr)
        };
        LIVE.with(|n| n.set(n.get() + 1));
        Ok(Self { inner })
    }

    /// Allocate and initialise in place.
    pub fn new_with(init: impl FnOnce(&mut T)) -> Result<Self> {
        let mut b = Self::zeroed()?;
        init(&mut b);
        Ok(b)
    }
}

impl<T: Plain + Zeroize> Deref for SecureBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Plain + Zeroize> DerefMut for SecureBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: Plain + Zeroize> Drop for SecureBox<T> {
    fn drop(&mut self) {
        self.inner.zeroize();
        LIVE.with(|n| n.set(n.get().saturating_sub(1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ioctl::{opal_key, opal_session_info};

    #[test]
    fn starts_zeroed_and_tracks_lifetime() {
        let before = live_buffers();
        {
            let k = SecureBox::<opal_key>::zeroed().unwrap();
            assert!(k.key.iter().all(|b| *b == 0));
            let _s = SecureBox::<opal_session_info>::zeroed().unwrap();
            assert_eq!(live_buffers(), before + 2);
        }
        assert_eq!(live_buffers(), before);
    }

    #[test]
    fn zeroize_wipes_key_bytes() {
        let mut k = SecureBox::<opal_key>::new_with(|k| {
            k.key_len = 4;
            k.key[..4].copy_from_slice(b"abcd");
        })
        .unwrap();
        assert_eq!(&k.key[..4], b"abcd");
        k.zeroize();
        assert_eq!(k.key_len, 0);
        assert!(k.key.iter().all(|b| *b == 0));
    }
}

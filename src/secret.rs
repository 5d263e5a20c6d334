//! Scoped secret storage. Replaces the "password in an ordinary buffer"
//! pattern: the bytes are copied exactly once into memory locked for the
//! lifetime of this value, and are zeroised unconditionally on drop. The
//! type deliberately has no `Clone`, `Debug`, or `Display` impl, and no
//! accessor that returns an owned copy — callers borrow the bytes.

use std::ptr::NonNull;

use nix::sys::mman::{mlock, munlock};
use zeroize::Zeroize;

pub struct LockedSecret {
    buf: Vec<u8>,
    locked: bool,
}

impl LockedSecret {
    /// Copies `bytes` into a freshly allocated, `mlock`ed buffer. Locking
    /// failures are logged but not fatal: a secret that could not be
    /// locked still gets zeroised on drop, it just may have been briefly
    /// swappable under memory pressure.
    pub fn new(bytes: &[u8]) -> Self {
        let mut buf = vec![0u8; bytes.len()];
        buf.copy_from_slice(bytes);

        let locked = if buf.is_empty() {
            false
        } else {
            match NonNull::new(buf.as_mut_ptr()) {
                Some(ptr) => match unsafe { mlock(ptr, buf.len()) } {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::warn!(%err, "failed to mlock secret buffer");
                        false
                    }
                },
                None => false,
            }
        };

        LockedSecret { buf, locked }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Drop for LockedSecret {
    fn drop(&mut self) {
        self.buf.zeroize();
        if self.locked {
            if let Some(ptr) = NonNull::new(self.buf.as_mut_ptr()) {
                let _ = unsafe { munlock(ptr, self.buf.len()) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_exact_bytes_until_dropped() {
        let secret = LockedSecret::new(b"hunter2");
        assert_eq!(secret.as_bytes(), b"hunter2");
        assert_eq!(secret.len(), 7);
    }

    #[test]
    fn empty_secret_is_empty() {
        let secret = LockedSecret::new(b"");
        assert!(secret.is_empty());
        assert_eq!(secret.len(), 0);
    }
}
